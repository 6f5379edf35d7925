use thiserror::Error;

/// Errors raised by domain operations.
///
/// The transport layer maps each variant to an HTTP status (or WebSocket
/// close code); see `parley-gateway`. Variants carry a human-readable
/// message that is safe to return to clients.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or semantically invalid input.
    #[error("{0}")]
    Validation(String),

    /// Missing, malformed, or expired credentials.
    #[error("{0}")]
    Auth(String),

    /// The caller is authenticated but lacks permission.
    #[error("{0}")]
    Authz(String),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint was violated (duplicate username,
    /// duplicate one-to-one chat).
    #[error("{0}")]
    Conflict(String),

    /// The blob storage subsystem failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The backing store is unavailable or rejected the operation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    #[must_use]
    pub fn authz(message: impl Into<String>) -> Self {
        Self::Authz(message.into())
    }

    /// `entity` names what was missing, e.g. `"chat"` or `"message"`.
    #[must_use]
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound(entity.into())
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Persistence(source.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Persistence(source.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
