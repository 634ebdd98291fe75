//! Error types for telegate.

use std::io;
use thiserror::Error;

/// Result type alias for telegate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in telegate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// State file I/O error.
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Agent API request failure.
    #[error("Agent API error: {0}")]
    Api(#[from] reqwest::Error),

    /// Telegram API failure.
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Response kind the agent would reject for this action.
    #[error("Response '{response}' not allowed for action '{action}'")]
    ResponseNotAllowed { action: String, response: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
