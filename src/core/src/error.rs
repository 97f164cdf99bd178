use thiserror::Error;

/// A3S Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Malformed RecordIO framing
    #[error("RecordIO error: {0}")]
    RecordIoError(String),

    /// A pipe end failed or went away
    #[error("Pipe error: {0}")]
    PipeError(String),

    /// A call or message failed schema validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Container runtime error
    #[error("Containerizer error: {0}")]
    ContainerizerError(String),

    /// Authorization backend error
    #[error("Authorization error: {0}")]
    AuthorizationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}

impl From<prost::DecodeError> for AgentError {
    fn from(err: prost::DecodeError) -> Self {
        AgentError::SerializationError(err.to_string())
    }
}

/// Result type alias for A3S Agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
