//! Inbound message relay and connection-status reconciliation.
//!
//! The relay maps each deduplicated inbound message to a conversation
//! (creating one under a distributed lock on first contact), forwards it to
//! the remote agent backend and sends the agent's reply back through the
//! owning connector. Failures on this path never escape: the contact gets a
//! single best-effort apology instead.

pub mod error;
pub mod reconcile;
pub mod relay;

pub use {
    error::{Error, Result},
    reconcile::{StatusReconciler, StatusReport, StatusSource},
    relay::{MessageRelay, RelayOutcome},
};
