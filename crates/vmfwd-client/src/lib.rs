//! vmfwd-client: stream providers that reach a virtual machine through the
//! cluster API server.
//!
//! [`KubevirtStreamProvider`] opens one WebSocket per stream against the
//! `portforward` subresource and exposes it as a plain byte stream.

pub mod websocket;

pub use websocket::{KubevirtStreamProvider, SUBPROTOCOL};
