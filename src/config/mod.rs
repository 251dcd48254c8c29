//! Configuration module
//!
//! Loads the relay server configuration from a TOML file and merges CLI overrides.

mod server;

pub use server::*;
