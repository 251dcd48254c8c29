//! Client address attribution

use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::http::HeaderMap;

/// Header set by reverse proxies with the originating client chain
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Header set by some proxies with the single originating client address
pub const X_REAL_IP: &str = "x-real-ip";

/// Best-effort client IP for diagnostics.
///
/// Uses the first entry of `X-Forwarded-For`, then `X-Real-Ip`, then the host
/// portion of the transport peer address. Returns an empty string when none of
/// them yield a value.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str) -> String {
    let forwarded = header_str(headers, X_FORWARDED_FOR);
    let first_hop = forwarded.split(',').next().unwrap_or_default().trim();
    if !first_hop.is_empty() {
        return first_hop.to_string();
    }

    let real_ip = header_str(headers, X_REAL_IP).trim();
    if !real_ip.is_empty() {
        return real_ip.to_string();
    }

    remote_addr
        .trim()
        .parse::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

/// Header value as a string, empty when missing or not valid ASCII
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Raw header value, with invalid UTF-8 replaced. Empty only when the header
/// is missing or has no bytes.
pub fn header_lossy(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}
