//! Error Types
//!
//! Typed failures returned to the calling boundary. `CaseError::kind()` maps
//! every variant onto the coarse taxonomy a transport layer renders.

use serde::Serialize;
use uuid::Uuid;

use crate::model::CaseStatus;

/// Coarse error classification used by boundary layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    EditNotAllowed,
    Conflict,
    Storage,
}

/// A validation message attributed to a single input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by a [`CaseStore`](crate::store::CaseStore) backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique key taken or compare-and-write lost
    #[error("Store conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Backend unreachable or timed out; the operation may be retried
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors returned by case operations
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: CaseStatus, to: CaseStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Case not found: {0}")]
    NotFound(Uuid),

    #[error("Case cannot be edited while {status}")]
    EditNotAllowed { status: CaseStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CaseError {
    /// Single-field validation failure
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::MissingRequiredFields(_)
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::EditNotAllowed { .. } => ErrorKind::EditNotAllowed,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Field-attributed messages for rendering to the caller
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            Self::Validation(errors) => errors.clone(),
            Self::MissingRequiredFields(missing) => missing
                .iter()
                .map(|key| FieldError::new(format!("payload.{key}"), "required for submission"))
                .collect(),
            Self::InvalidTransition { from, to } => vec![FieldError::new(
                "status",
                format!("cannot move from {from} to {to}"),
            )],
            _ => Vec::new(),
        }
    }
}
