use std::error::Error as StdError;

/// Crate-wide result type for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed connector errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither ready nor auth-failure arrived within the initialization
    /// ceiling.
    #[error("channel initialization timed out after {seconds}s")]
    InitializationTimeout { seconds: u64 },

    /// The protocol client reported a pairing/authentication failure.
    #[error("channel authentication failed: {reason}")]
    AuthenticationFailure { reason: String },

    /// No QR image was rendered within the QR ceiling.
    #[error("timed out waiting for QR code")]
    QrTimeout,

    /// Send attempted while the session is not connected.
    #[error("channel is not connected")]
    NotConnected,

    /// The protocol client failed to deliver an outbound message.
    #[error("failed to send message: {message}")]
    SendFailure { message: String },

    /// Wrapped source error from the protocol client or filesystem.
    #[error("connector operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn auth_failure(reason: impl std::fmt::Display) -> Self {
        Self::AuthenticationFailure {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn send_failure(message: impl std::fmt::Display) -> Self {
        Self::SendFailure {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
