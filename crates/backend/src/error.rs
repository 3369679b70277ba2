/// Crate-wide result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors for the remote agent backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend cannot be reached or returned a server-side failure.
    #[error("agent backend unavailable: {message}")]
    Unavailable { message: String },

    /// The backend rejected the request (bad conversation id, bad payload).
    #[error("agent backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The backend answered with a payload we could not decode.
    #[error("malformed backend response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }
}
