//! Protocol bridge client.
//!
//! The chat network's wire protocol lives in a separate bridge process;
//! this crate implements [`courier_connector::ProtocolClient`] over a JSON
//! WebSocket connection to it. One socket per session; lifecycle events
//! stream in, send/status requests are correlated by request id.

pub mod client;
pub mod wire;

pub use {
    client::{BridgeClient, BridgeClientFactory, DEFAULT_BRIDGE_URL},
    wire::{BridgeCommand, BridgeEvent},
};
