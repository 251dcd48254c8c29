//! WebSocket upgrade
//!
//! Runs the HTTP upgrade handshake with a bounded timeout, applies the origin
//! check, and captures the request headers used for diagnostics.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use super::address::{client_ip, header_lossy};

/// Upper bound on the upgrade handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum inbound message and frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur while upgrading a connection
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("websocket handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("origin not allowed: {0:?}")]
    OriginRejected(String),

    #[error("websocket upgrade failed: {0}")]
    Handshake(#[from] WsError),
}

/// Request details captured during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Declared `Origin` header, empty if absent
    pub origin: String,
    /// `User-Agent` header, empty if absent
    pub user_agent: String,
    /// Attributed client IP (proxy headers first, then peer address)
    pub client_ip: String,
    /// Transport-level peer address
    pub remote_addr: String,
}

/// Socket settings applied to every upgraded connection
pub fn websocket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);
    config
}

/// Upgrade a raw stream to a WebSocket.
///
/// `check_origin` receives the request's `Origin` header (empty when absent)
/// and decides whether the upgrade proceeds. Rejected requests get a 403.
pub async fn upgrade<S, F>(
    stream: S,
    remote_addr: SocketAddr,
    check_origin: F,
) -> Result<(WebSocketStream<S>, HandshakeInfo), UpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(&str) -> bool + Unpin,
{
    let mut info = HandshakeInfo {
        remote_addr: remote_addr.to_string(),
        ..Default::default()
    };
    let mut rejected = false;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request.headers();
        info.origin = header_lossy(headers, "origin");
        info.user_agent = header_lossy(headers, "user-agent");
        info.client_ip = client_ip(headers, &info.remote_addr);

        if check_origin(&info.origin) {
            Ok(response)
        } else {
            rejected = true;
            Err(forbidden())
        }
    };

    let handshake = accept_hdr_async_with_config(stream, callback, Some(websocket_config()));
    let result = time::timeout(HANDSHAKE_TIMEOUT, handshake).await;

    match result {
        Err(_) => Err(UpgradeError::Timeout(HANDSHAKE_TIMEOUT)),
        Ok(Err(_)) if rejected => Err(UpgradeError::OriginRejected(info.origin)),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(ws)) => Ok((ws, info)),
    }
}

fn forbidden() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Origin not allowed".to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::origin::AllowedOrigins;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::Message;

    type UpgradeOutcome = Result<HandshakeInfo, UpgradeError>;

    /// Accept one connection and report the upgrade outcome
    async fn serve_once(origins: AllowedOrigins) -> (SocketAddr, oneshot::Receiver<UpgradeOutcome>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            match upgrade(stream, peer, |origin| origins.is_allowed(origin)).await {
                Ok((mut ws, info)) => {
                    let _ = tx.send(Ok(info));
                    // Echo one frame so the client can confirm the socket works
                    if let Some(Ok(msg)) = ws.next().await {
                        let _ = ws.send(msg).await;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        (addr, rx)
    }

    fn request_with_headers(
        addr: SocketAddr,
        headers: &[(&'static str, &'static str)],
    ) -> Request {
        let mut request = format!("ws://{}/rpc", addr).into_client_request().unwrap();
        for (name, value) in headers {
            request
                .headers_mut()
                .insert(*name, HeaderValue::from_static(value));
        }
        request
    }

    #[tokio::test]
    async fn test_allowed_origin_upgrades() {
        let (addr, outcome) = serve_once(AllowedOrigins::new(["https://www.walletlink.org"])).await;
        let request = request_with_headers(
            addr,
            &[
                ("origin", "https://www.walletlink.org"),
                ("user-agent", "relay-test/1.0"),
                ("x-forwarded-for", "1.2.3.4, 5.6.7.8"),
            ],
        );

        let (mut client, _) = connect_async(request).await.unwrap();
        let info = outcome.await.unwrap().unwrap();
        assert_eq!(info.origin, "https://www.walletlink.org");
        assert_eq!(info.user_agent, "relay-test/1.0");
        assert_eq!(info.client_ip, "1.2.3.4");
        assert!(info.remote_addr.starts_with("127.0.0.1:"));

        client.send(Message::Text("ping".to_string())).await.unwrap();
        let echoed = client.next().await.unwrap().unwrap();
        assert_eq!(echoed, Message::Text("ping".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_origin_fails_handshake() {
        let (addr, outcome) = serve_once(AllowedOrigins::new(["https://www.walletlink.org"])).await;
        let request = request_with_headers(addr, &[("origin", "https://evil.example")]);

        let result = connect_async(request).await;
        match result {
            Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
            other => panic!("Expected HTTP 403, got {:?}", other.map(|_| ())),
        }

        match outcome.await.unwrap() {
            Err(UpgradeError::OriginRejected(origin)) => assert_eq!(origin, "https://evil.example"),
            other => panic!("Expected OriginRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_ascii_origin_is_still_checked() {
        let (addr, outcome) = serve_once(AllowedOrigins::new(["https://www.walletlink.org"])).await;

        let mut request = format!(
            "GET /rpc HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Origin: https://evil",
            addr
        )
        .into_bytes();
        request.push(0xE9);
        request.extend_from_slice(b".example\r\n\r\n");

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&request).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(
            response.starts_with("HTTP/1.1 403"),
            "Expected 403, got {:?}",
            response
        );

        match outcome.await.unwrap() {
            Err(UpgradeError::OriginRejected(origin)) => {
                assert_eq!(origin, "https://evil\u{FFFD}.example")
            }
            other => panic!("Expected OriginRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_origin_is_accepted() {
        let (addr, outcome) = serve_once(AllowedOrigins::new(["https://www.walletlink.org"])).await;
        let request = request_with_headers(addr, &[]);

        let (_client, _) = connect_async(request).await.unwrap();
        let info = outcome.await.unwrap().unwrap();
        assert_eq!(info.origin, "");
        assert_eq!(info.client_ip, "127.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_handshake_times_out() {
        let (_client, server) = tokio::io::duplex(1024);
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();

        let result = upgrade(server, peer, |_| true).await;
        assert!(matches!(result, Err(UpgradeError::Timeout(d)) if d == HANDSHAKE_TIMEOUT));
    }

    #[test]
    fn test_websocket_config_limits() {
        let config = websocket_config();
        assert_eq!(config.max_message_size, Some(1024 * 1024));
        assert_eq!(config.max_frame_size, Some(1024 * 1024));
    }
}
