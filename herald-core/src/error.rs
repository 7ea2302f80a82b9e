//! Herald error types.

use std::fmt;
use thiserror::Error;

/// Result type for Herald operations.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// Errors raised while resolving descriptors, building requests, or driving
/// a request through the interceptor chain.
#[derive(Debug, Clone, Error)]
pub enum HeraldError {
    /// A `:name` token in the path has no matching path argument.
    #[error("Path variable not match: {0}")]
    PathVariableNotMatch(String),

    /// A query-map argument is not a key/value object, or a query value cannot be rendered.
    #[error("Query param not match: {0}")]
    QueryParamNotMatch(String),

    /// A static or mapped header is malformed.
    #[error("Header not match: {0}")]
    HeaderNotMatch(String),

    /// A body, field or part argument has the wrong shape.
    #[error("Body not match: {0}")]
    BodyNotMatch(String),

    /// The descriptor is structurally invalid.
    #[error("Illegal request: {0}")]
    IllegalRequest(String),

    /// The dispatch or chain API was misused.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// An argument could not be interpreted.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A declared argument position exceeds the call arity.
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(String),

    /// The request was cancelled by the caller.
    #[error("Request cancelled: {0}")]
    RequestCancelled(String),

    /// The request timed out or was aborted by the transport.
    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Failure reported by the transport collaborator.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fieldless discriminant of [`HeraldError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PathVariableNotMatch,
    QueryParamNotMatch,
    HeaderNotMatch,
    BodyNotMatch,
    IllegalRequest,
    IllegalState,
    IllegalArgument,
    IndexOutOfBounds,
    RequestCancelled,
    RequestTimeout,
    Io,
    Json,
    Transport,
}

impl HeraldError {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathVariableNotMatch(_) => ErrorKind::PathVariableNotMatch,
            Self::QueryParamNotMatch(_) => ErrorKind::QueryParamNotMatch,
            Self::HeaderNotMatch(_) => ErrorKind::HeaderNotMatch,
            Self::BodyNotMatch(_) => ErrorKind::BodyNotMatch,
            Self::IllegalRequest(_) => ErrorKind::IllegalRequest,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::IllegalArgument(_) => ErrorKind::IllegalArgument,
            Self::IndexOutOfBounds(_) => ErrorKind::IndexOutOfBounds,
            Self::RequestCancelled(_) => ErrorKind::RequestCancelled,
            Self::RequestTimeout(_) => ErrorKind::RequestTimeout,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Check if this error is a caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::RequestCancelled(_))
            || matches!(self, Self::Transport(e) if e.kind == TransportErrorKind::Cancelled)
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout(_))
            || matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Get the transport error if this failure came from the transport.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// Failure codes a transport must be able to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The cancellation token fired while the call was in flight.
    Cancelled,
    /// The call exceeded its timeout.
    TimedOut,
    /// The connection was aborted.
    Aborted,
    /// Any other transport failure.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Aborted => write!(f, "aborted"),
            Self::Other => write!(f, "failed"),
        }
    }
}

/// Error reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error)]
#[error("Transport {kind}: {message}")]
pub struct TransportError {
    /// Failure code.
    pub kind: TransportErrorKind,
    /// Human readable message.
    pub message: String,
}

impl TransportError {
    /// Create a transport error of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The in-flight call was cancelled.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Cancelled, message)
    }

    /// The in-flight call timed out.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::TimedOut, message)
    }

    /// Generic transport failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Check if this is a timeout or abort code.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::TimedOut | TransportErrorKind::Aborted
        )
    }
}
