//! The error taxonomy of §7: stable string codes, mapped to HTTP only at the
//! edge (never inside this crate).

use serde_json::Value;
use thiserror::Error;

/// A tagged error value, carrying a stable `code()` string plus a
/// human-readable message and optional structured details.
#[derive(Debug, Error)]
pub enum DfError {
    /// The request violates schema or constraints.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The addressed entity is absent.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// An idempotency or uniqueness collision occurred.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The queue hand-off failed.
    #[error("infra unavailable: {message}")]
    InfraUnavailable { message: String },

    /// An unexpected handler failure (engine/upscaler/object store).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DfError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn infra_unavailable(message: impl Into<String>) -> Self {
        Self::InfraUnavailable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The stable string code for this error, as used in the job's
    /// `error_code` column and the HTTP error envelope.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InfraUnavailable { .. } => "infra_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::InfraUnavailable { message }
            | Self::Internal { message } => message,
        }
    }

    /// Serialize to the `{code, message}` JSON shape stored in
    /// `Job::error_message` when a job transitions to `failed`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.message(),
        })
    }
}

pub type DfResult<T> = Result<T, DfError>;
