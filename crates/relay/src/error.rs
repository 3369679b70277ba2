/// Crate-wide result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures on the relay path.
///
/// All of these are caught inside [`crate::MessageRelay::handle`] and
/// answered with an apology message; none escape to the caller. A creation
/// lock that cannot be acquired is deliberately *not* an error — the relay
/// degrades to lock-free creation with a warning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent backend call failed: {0}")]
    Backend(#[from] courier_backend::Error),

    #[error("conversation persistence failed: {0}")]
    Store(anyhow::Error),

    #[error("channel send failed: {0}")]
    Send(#[from] courier_connector::Error),
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}
