//! Error types for the Performance Engine

use thiserror::Error;

/// Result type for Performance Engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the Performance Engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown metric '{name}' referenced in {context}")]
    UnknownMetric { name: String, context: String },

    #[error("Malformed record for player {player_id} (game {game_id}): {reason}")]
    MalformedRecord { player_id: i64, game_id: i64, reason: String },

    #[error("Record for player {player_id} dated {date} arrived after {previous}")]
    OutOfOrder { player_id: i64, date: chrono::NaiveDate, previous: chrono::NaiveDate },

    #[error("PCA error: {0}")]
    Pca(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),
}

impl EngineError {
    /// Whether the error is confined to a single entity's stream
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self, EngineError::MalformedRecord { .. } | EngineError::OutOfOrder { .. })
    }
}
