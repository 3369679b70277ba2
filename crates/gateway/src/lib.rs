//! Orchestrating service facade.
//!
//! Owns the wiring between registry, connectors and the relay: every
//! readiness transition re-attaches the relay's message handler, disconnects
//! force-end the session's ongoing conversations, and status queries fall
//! back to the reconciler when no live connector exists. The HTTP layer
//! consumes these operations; it is not part of this crate.

pub mod service;

pub use service::{ChannelService, DisconnectResponse, MessagesPage, StatusResponse};
