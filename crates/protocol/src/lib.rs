//! Parley Protocol
//!
//! Shared types for communication between the Parley server, the CLI relay
//! and browser clients. Every message travels as a JSON envelope
//! `{"id": ..., "type": ..., "payload": ...}`.

use uuid::Uuid;

pub mod client;
pub mod envelope;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use envelope::{peek_id, DecodeError, Envelope, Payload};
pub use server::ServerMessage;
pub use types::*;

/// Websocket endpoint browsers connect to.
pub const WS_PATH: &str = "/api/v1/ws";

/// Endpoint a CLI process POSTs encoded server envelopes to.
pub const RELAY_PATH: &str = "/api/v1/relay";

/// Header carrying the relayed envelope's correlation id.
pub const RELAY_ID_HEADER: &str = "id";

/// Generate a fresh correlation id (random 128-bit, hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
