use std::{path::Path, sync::Arc};

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use courier_common::SessionKey;

use crate::types::{ClientEvent, SessionInfo};

/// Sender half of a client's event channel.
///
/// Handed to the client at construction so every callback is wired before
/// `start` is issued — a cached session that authenticates immediately can
/// fire `Ready` before the caller would otherwise have attached a listener.
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// The channel-protocol client seam.
///
/// The wire protocol itself is the collaborator library's responsibility;
/// the connector only relies on this surface. Implementations persist and
/// restore pairing credentials from the artifact directory they were built
/// with.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Issue the connection/pairing routine. Returns once the start call has
    /// been issued; progress is reported through the event channel.
    async fn start(&self) -> Result<()>;

    /// Tear down the underlying session. Callers treat failures as
    /// best-effort.
    async fn teardown(&self) -> Result<()>;

    /// Probe the live session for its identity. `None` means the client is
    /// up but holds no paired identity.
    async fn session_info(&self) -> Result<Option<SessionInfo>>;

    /// Send a text message. Returns the provider's message identifier.
    async fn send_text(&self, to: &str, body: &str) -> Result<String>;
}

/// Builds protocol clients bound to an artifact directory and event channel.
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        session_key: &SessionKey,
        artifact_dir: &Path,
        events: EventSender,
    ) -> Arc<dyn ProtocolClient>;
}
