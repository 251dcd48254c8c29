//! WebSocket server module
//!
//! Accepts upgrade requests, validates origins, and relays frames between each
//! peer and its message handler.

mod address;
mod origin;
mod outbound;
mod relay;
mod session;
mod upgrade;
mod websocket;

pub use address::*;
pub use origin::*;
pub use outbound::*;
pub use relay::*;
pub use session::*;
pub use upgrade::*;
pub use websocket::*;
