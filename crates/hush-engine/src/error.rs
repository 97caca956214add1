use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error taxonomy.
///
/// `Authentication` and `Corrupt` never cross the public [`crate::Lifecycle`]
/// API: they are logged and surfaced as `NotFound` so callers cannot
/// distinguish a wrong credential from a missing or damaged record.
#[derive(Debug, Error)]
pub enum Error {
    /// Id absent, expired, exhausted, or never existed.
    #[error("secret not found")]
    NotFound,
    /// Credential digest mismatch or AEAD open failure.
    #[error("authentication failed")]
    Authentication,
    /// Malformed creation request (bounds, metadata).
    #[error("{0}")]
    Validation(String),
    /// Transient backend failure; safe to retry, never assumed committed.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// Stored record fails structural decode; unrecoverable for that record.
    #[error("stored record is corrupt")]
    Corrupt,
    /// `store` would overwrite an existing id.
    #[error("secret id already exists")]
    Duplicate,
    /// Compare-and-swap view-count update lost to a concurrent consumer.
    #[error("concurrent modification")]
    Conflict,
}

impl Error {
    pub(crate) fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }

    /// True for failures the caller may retry without risking a double view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backend(_) | Error::Conflict)
    }
}
