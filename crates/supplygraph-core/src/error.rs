//! Error types for SupplyGraph

use thiserror::Error;

/// Result type alias using SupplyGraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// SupplyGraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Graph entity errors (E001-E099)
    #[error("Node '{0}' not found. Register it with `supplygraph register` before recording transactions.")]
    NodeNotFound(String),

    #[error("Relationship '{0}' not found.")]
    RelationshipNotFound(String),

    #[error("Node '{0}' already exists.")]
    DuplicateNode(String),

    // Schema and query errors (E100-E199)
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Invalid traversal query: {0}")]
    InvalidQuery(String),

    // Storage errors (E400-E499)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound(_) => "E001",
            Self::RelationshipNotFound(_) => "E002",
            Self::DuplicateNode(_) => "E003",
            Self::SchemaViolation(_) => "E100",
            Self::InvalidQuery(_) => "E101",
            Self::Storage(_) => "E400",
            Self::DatabaseError(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NodeNotFound(node) => {
                Some(format!("supplygraph register {}", node.replacen(':', " ", 1)))
            }
            Self::DuplicateNode(_) => {
                Some("Register without --strict to update attributes".to_string())
            }
            Self::InvalidQuery(_) => {
                Some("supplygraph config get traversal.max_hops_limit".to_string())
            }
            Self::ConfigError(_) => Some("supplygraph config list".to_string()),
            _ => None,
        }
    }

    /// Whether the same request may succeed if sent again
    ///
    /// Missing endpoints and schema violations are never retryable; the
    /// request (or the graph) has to change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::DatabaseError(_) | Self::Io(_))
    }
}
