//! Unified error handling for ORCHARD
//!
//! One error type for the whole runtime. Transport failures are kept in
//! their own variant so the subscription loop can recover from them locally
//! while every other failure reaches the caller.

use thiserror::Error;

/// Main error type for ORCHARD operations
#[derive(Debug, Error)]
pub enum OrchardError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection to the registry/bus backend lost or unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame or unexpected reply on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No pid on record for the node
    #[error("Node '{name}' in mesh '{mesh}' did not self-register")]
    NotRegistered { mesh: String, name: String },

    /// Spawning or signalling a process failed
    #[error("Process error: {0}")]
    Process(String),

    /// Parameter store errors
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// A topic handler failed
    #[error("Handler for '{topic}' failed: {message}")]
    Handler { topic: String, message: String },

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl OrchardError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        OrchardError::Config(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        OrchardError::Transport(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        OrchardError::Protocol(msg.into())
    }

    pub fn handler<T: Into<String>, S: Into<String>>(topic: T, msg: S) -> Self {
        OrchardError::Handler {
            topic: topic.into(),
            message: msg.into(),
        }
    }

    /// True for failures the subscription loop recovers by renewing the connection
    pub fn is_transport(&self) -> bool {
        matches!(self, OrchardError::Transport(_))
    }
}

/// Convenience type alias for Results using OrchardError
pub type OrchardResult<T> = std::result::Result<T, OrchardError>;

impl From<serde_json::Error> for OrchardError {
    fn from(err: serde_json::Error) -> Self {
        OrchardError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for OrchardError {
    fn from(err: bincode::Error) -> Self {
        OrchardError::Protocol(format!("bincode: {}", err))
    }
}

impl From<toml::de::Error> for OrchardError {
    fn from(err: toml::de::Error) -> Self {
        OrchardError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_yaml::Error> for OrchardError {
    fn from(err: serde_yaml::Error) -> Self {
        OrchardError::Config(format!("YAML parse error: {}", err))
    }
}
