use thiserror::Error;

use crate::taxonomy::{DomainError, DomainErrorCode};

/// Result type alias for PayMesh operations
pub type Result<T> = std::result::Result<T, PaymeshError>;

/// Error types for the PayMesh bridge
#[derive(Error, Debug)]
pub enum PaymeshError {
    /// AMQP connection, channel, publish or consume errors
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Transport failures that do not come from lapin
    #[error("Transport error: {0}")]
    Transport(String),

    /// Message serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller gave up waiting for a reply
    #[error("RPC call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Malformed envelope or reply body
    #[error("Invalid message format: {reason}")]
    InvalidMessage { reason: String },

    /// Structured failure reported by the remote handler
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// Internal framework errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Network I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tokio join errors
    #[error("Join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PaymeshError {
    /// Create a new transport error
    pub fn transport_error<T: ToString>(message: T) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create a new internal error
    pub fn internal_error<T: ToString>(message: T) -> Self {
        Self::Internal(message.to_string())
    }

    /// Create a new invalid message error
    pub fn invalid_message<T: ToString>(reason: T) -> Self {
        Self::InvalidMessage {
            reason: reason.to_string(),
        }
    }

    /// Check if error is recoverable (should be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Amqp(_) | Self::Transport(_) | Self::Io(_))
    }

    /// Check if error is a caller-side timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// View this error through the domain taxonomy. Everything that is not a
    /// remote domain failure is reported as `INTERNAL`.
    pub fn domain_error(&self) -> DomainError {
        match self {
            Self::Domain(err) => err.clone(),
            Self::Timeout { .. } => DomainError::internal("service did not respond in time"),
            other => DomainError::new(DomainErrorCode::Internal, other.to_string()),
        }
    }

    pub fn http_status(&self) -> http::StatusCode {
        self.domain_error().http_status()
    }

    pub fn rpc_code(&self) -> tonic::Code {
        self.domain_error().rpc_code()
    }
}

impl From<PaymeshError> for tonic::Status {
    fn from(err: PaymeshError) -> Self {
        err.domain_error().into()
    }
}
