use serde_json::json;
use thiserror::Error;

/// Errors raised by the results pipeline and its stores.
///
/// Every variant is local to one record's operation; none of them should take
/// the sidecar down.
#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("{0}")]
    Validation(String),

    #[error("cannot {action} while {current}")]
    InvalidStateTransition { action: String, current: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DataIntegrity(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResultsError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn transition(action: impl ToString, current: impl ToString) -> Self {
        Self::InvalidStateTransition {
            action: action.to_string(),
            current: current.to_string(),
        }
    }

    /// Stable error code reported over IPC.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::NotFound(_) => "not_found",
            Self::DataIntegrity(_) => "data_integrity",
            Self::Db(_) => "db_query_failed",
            Self::Json(_) => "bad_json",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidStateTransition { action, current } => Some(json!({
                "attempted": action,
                "current": current,
            })),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ResultsError>;
