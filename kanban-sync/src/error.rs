//! Error types for the sync engine

use crate::types::{ColumnId, InvalidId, TaskId};
use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure reported by the REST collaborator.
///
/// `Network` means the request never got an answer (connect failure, timeout);
/// `Status` means the authority answered and rejected it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The authority could not be reached
    #[error("network error: {message}")]
    Network { message: String },

    /// The authority rejected the request
    #[error("request rejected ({status}): {message}")]
    Status {
        status: u16,
        /// Machine-readable code such as `VERSION_CONFLICT`, when the authority sends one
        code: Option<String>,
        message: String,
    },

    /// The authority answered with a body that could not be decoded
    #[error("invalid response: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a rejection with the given HTTP status
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// A 409 version conflict, as returned for a stale write
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Status {
            status: 409,
            code: Some("VERSION_CONFLICT".to_string()),
            message: message.into(),
        }
    }

    /// HTTP status, if the authority answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this is a stale-version rejection
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Check if the entity does not exist on the authority
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Check if the request never reached the authority
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Failure of the push-channel transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection attempt did not complete in time
    #[error("connection attempt timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// The remote end closed the connection
    #[error("connection closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed { reason: Option<String> },

    /// Socket-level failure
    #[error("socket error: {message}")]
    Socket { message: String },

    /// Reconnection was abandoned
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

impl TransportError {
    /// Create a socket error
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
        }
    }

    /// Only exhaustion is surfaced to callers; everything else is retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
    }
}

/// A push message that failed shape validation. Logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    /// The frame was not a JSON object
    #[error("message is not a JSON object: {message}")]
    NotJson { message: String },

    /// The object has no string `type` field
    #[error("message has no type discriminator")]
    MissingDiscriminator,

    /// The discriminator was recognised but the payload did not match
    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: String, message: String },
}

/// Coarse classification for rendering a failure to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Application,
    Network,
    Validation,
    NotFound,
    Configuration,
}

/// Errors that can occur in sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// REST collaborator failure
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Push channel failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed board identifier
    #[error("invalid board id: {0}")]
    InvalidId(#[from] InvalidId),

    /// Caller-side misuse detected before any network attempt
    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },

    /// The active workflow forbids the move
    #[error("moving from column {from} to column {to} is not allowed by the workflow")]
    TransitionNotAllowed { from: ColumnId, to: ColumnId },

    /// Task not present in the local mirror
    #[error("task not found: {id}")]
    TaskNotFound { id: TaskId },

    /// Column not present in the local mirror
    #[error("column not found: {id}")]
    ColumnNotFound { id: ColumnId },

    /// An operation needing a loaded board was called before `load_board`
    #[error("no board is loaded")]
    NoActiveBoard,

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl SyncError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(ApiError::Network { .. }) => ErrorKind::Network,
            Self::Api(e) if e.is_not_found() => ErrorKind::NotFound,
            Self::Api(_) => ErrorKind::Application,
            Self::Transport(_) => ErrorKind::Transport,
            Self::InvalidId(_) | Self::Validation { .. } | Self::TransitionNotAllowed { .. } => {
                ErrorKind::Validation
            }
            Self::TaskNotFound { .. } | Self::ColumnNotFound { .. } | Self::NoActiveBoard => {
                ErrorKind::NotFound
            }
            Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Check if the authority rejected a stale version
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_conflict())
    }

    /// Check if retrying the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_network(),
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = TaskId::parse("22222222-2222-4222-8222-222222222222").unwrap();
        let err = SyncError::TaskNotFound { id };
        assert_eq!(
            err.to_string(),
            "task not found: 22222222-2222-4222-8222-222222222222"
        );
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(
            TransportError::Closed { reason: None }.to_string(),
            "connection closed"
        );
        assert_eq!(
            TransportError::Closed {
                reason: Some("going away".into())
            }
            .to_string(),
            "connection closed: going away"
        );
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            SyncError::from(ApiError::network("refused")).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            SyncError::from(ApiError::conflict("stale")).kind(),
            ErrorKind::Application
        );
        assert_eq!(
            SyncError::from(ApiError::status(404, "gone")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SyncError::validation("neighbours", "unknown task").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SyncError::from(TransportError::RetriesExhausted { attempts: 5 }).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_retryable() {
        assert!(SyncError::from(ApiError::network("timeout")).is_retryable());
        assert!(!SyncError::from(ApiError::conflict("stale")).is_retryable());
        assert!(!TransportError::RetriesExhausted { attempts: 5 }.is_retryable());
        assert!(TransportError::ConnectTimeout { timeout_ms: 10 }.is_retryable());
    }

    #[test]
    fn test_conflict() {
        assert!(SyncError::from(ApiError::conflict("stale")).is_conflict());
        assert!(!SyncError::from(ApiError::status(403, "workflow")).is_conflict());
    }
}
