//! Error types for bobbin

use thiserror::Error;

/// Result type alias for bobbin operations
pub type BobbinResult<T> = Result<T, BobbinError>;

/// Main error type for bobbin
#[derive(Error, Debug, Clone)]
pub enum BobbinError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport faults (connection or child-process failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool execution errors
    #[error("Tool error: {tool_name}: {message}")]
    Tool { tool_name: String, message: String },

    /// Orchestrator state errors
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The conversation was cancelled
    #[error("Conversation was cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl BobbinError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new tool error
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new orchestrator error
    pub fn orchestrator(message: impl Into<String>) -> Self {
        Self::Orchestrator(message.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<anyhow::Error> for BobbinError {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(error.to_string())
    }
}

impl From<std::io::Error> for BobbinError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for BobbinError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<reqwest::Error> for BobbinError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}
