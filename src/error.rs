//! Error types for the attention engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A gateway query exceeded its time budget
    #[error("Query `{query}` timed out after {millis}ms")]
    Timeout { query: &'static str, millis: u128 },

    /// One of the bulk reads behind a batch load failed
    #[error("Batch load failed on `{query}`: {source}")]
    BatchLoad {
        query: &'static str,
        #[source]
        source: Box<EngineError>,
    },

    /// A persisted value could not be mapped back onto the domain model
    #[error("Invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Tag an error with the bulk read it came from.
    pub fn in_batch(self, query: &'static str) -> Self {
        EngineError::BatchLoad {
            query,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
