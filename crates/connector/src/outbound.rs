use {async_trait::async_trait, std::sync::Arc};

use crate::{connector::Connector, error::Result};

/// Send messages back out through a channel session.
///
/// The relay consumes this instead of the concrete connector so tests can
/// substitute a recording sink.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Send a text message. Returns the provider's message identifier.
    async fn send_text(&self, to: &str, body: &str) -> Result<String>;
}

#[async_trait]
impl ChannelOutbound for Connector {
    async fn send_text(&self, to: &str, body: &str) -> Result<String> {
        self.send_message(to, body).await
    }
}

#[async_trait]
impl<T: ChannelOutbound + ?Sized> ChannelOutbound for Arc<T> {
    async fn send_text(&self, to: &str, body: &str) -> Result<String> {
        (**self).send_text(to, body).await
    }
}
