//! Core domain errors.

use thiserror::Error;

/// Core domain errors for dashpull.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A report definition is unusable.
    #[error("Invalid report definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
