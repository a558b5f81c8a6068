//! Typed error hierarchy for the hospital administration back-end.
//!
//! The data layer returns `anyhow::Result` and raises `AdminError` for domain
//! failures; the HTTP layer recovers it with `downcast_ref` to choose a
//! status code.

use thiserror::Error;

/// Domain failures surfaced to API callers.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot move {entity} from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Missing or unknown staff identity")]
    Unauthorized,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdminError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Lift an `Option` from a lookup into a `NotFound` error.
pub fn require<T>(value: Option<T>, entity: &'static str, id: i64) -> anyhow::Result<T> {
    value.ok_or_else(|| AdminError::not_found(entity, id).into())
}
