//! Error taxonomy shared by the client, the store and the session gate

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No bearer token, or the server rejected the one we sent
    #[error("authentication required")]
    Unauthenticated,

    /// Login refused; carries the server message when one was provided
    #[error("login failed: {0}")]
    Unauthorized(String),

    #[error("server error: {0}")]
    ServerError(u16),

    #[error("invalid server response: {0}")]
    DecodingError(String),

    #[error("local storage failure: {0}")]
    PersistenceError(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("network unavailable: {0}")]
    Network(String),
}

impl Error {
    /// True for transport-level trouble, as opposed to a broken server contract
    /// or a local failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Network(_) | Error::ServerError(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::DecodingError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::DecodingError(err.to_string())
        } else if let Some(status) = err.status() {
            Error::ServerError(status.as_u16())
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::PersistenceError(format!("storage task failed: {err}"))
    }
}
