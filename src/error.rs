// src/error.rs

//! Error types shared by the engine, the admin API and the storage backends

use thiserror::Error;

/// Errors produced while resolving manifests or mutating update state
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    /// Missing or incorrect admin token
    #[error("Unauthorized")]
    Unauthorized,

    /// Promote/rollback preconditions not met
    #[error("{0}")]
    NotFound(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Signing key misconfigured or signing failed
    #[error("signing error: {0}")]
    Signing(String),

    /// I/O error from a filesystem backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// HTTP status code for this error class
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::Storage(_) | Self::Signing(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("x").status_code(), 400);
        assert_eq!(Error::Unauthorized.status_code(), 401);
        assert_eq!(Error::not_found("x").status_code(), 404);
        assert_eq!(Error::Storage("down".into()).status_code(), 500);
        assert_eq!(Error::Signing("bad key".into()).status_code(), 500);
    }

    #[test]
    fn test_display_passes_message_through() {
        assert_eq!(
            Error::validation("missing required fields").to_string(),
            "missing required fields"
        );
    }
}
