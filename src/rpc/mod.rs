//! RPC message handling
//!
//! The per-connection message handler and the process-wide collaborators it
//! talks to: session store, publish/subscribe bus, and webhook dispatch.

mod handler;
mod protocol;
mod pubsub;
mod store;
mod webhook;

pub use handler::*;
pub use protocol::*;
pub use pubsub::*;
pub use store::*;
pub use webhook::*;
