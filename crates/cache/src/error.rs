use std::error::Error as StdError;

/// Crate-wide result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed cache errors.
///
/// Callers on the relay path treat every variant as non-fatal: dedup fails
/// open, lock acquisition fails open with a warning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cache backend cannot be reached.
    #[error("cache unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from an external dependency.
    #[error("cache operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
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
