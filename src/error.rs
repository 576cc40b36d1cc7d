// Error taxonomy shared by the store, the vote engine and the HTTP layer.
//
// NotFound / InvalidArgument / Forbidden are permanent and never retried.
// ConflictRetry only surfaces after the engine has exhausted its retries.

use thiserror::Error;

use crate::entities::EntityKind;

pub type Result<T> = std::result::Result<T, TownhallError>;

#[derive(Error, Debug)]
pub enum TownhallError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("{kind} {id} kept changing underneath the vote, gave up after {attempts} attempts")]
    ConflictRetry {
        kind: EntityKind,
        id: String,
        attempts: u32,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TownhallError {
    pub fn not_found(kind: EntityKind, id: &str) -> Self {
        TownhallError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        TownhallError::InvalidArgument(message.into())
    }

    /// Client errors are permanent: retrying the same request cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TownhallError::NotFound { .. }
                | TownhallError::InvalidArgument(_)
                | TownhallError::Forbidden(_)
        )
    }
}
