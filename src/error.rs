//! Error types for the shardgate crate.
//!
//! All fallible operations return [`GatewayError`] through the crate-wide
//! [`Result`] alias. Errors raised by a single backend agent never leave the
//! core unwrapped: they are converted into [`GatewayError::AgentFailure`],
//! which carries the name of the agent that produced them.
//!
//! # Examples
//!
//! ```
//! use shardgate::error::{ErrorCode, GatewayError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(GatewayError::invalid_argument("vector dimension 1 is too small"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => assert_eq!(e.code(), ErrorCode::InvalidArgument),
//! }
//! ```

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code attached to every error, modelled on the gRPC status codes the
/// transport layer maps onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Cancelled,
    DeadlineExceeded,
    NotFound,
    InvalidArgument,
    AlreadyExists,
    Aborted,
    Internal,
    Unavailable,
    ResourceExhausted,
    Unimplemented,
    Unknown,
}

impl ErrorCode {
    /// Whether an agent answering with this code should count against quorum.
    ///
    /// `NotFound`, `Aborted` and `InvalidArgument` mean the agent is healthy but
    /// has nothing to contribute; everything else is a real failure.
    pub fn is_agent_failure(self) -> bool {
        !matches!(
            self,
            ErrorCode::NotFound | ErrorCode::Aborted | ErrorCode::InvalidArgument
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Internal => "internal",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The main error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// One target agent returned an error or timed out.
    #[error("agent {agent} failed ({code}): {message}")]
    AgentFailure {
        agent: String,
        code: ErrorCode,
        message: String,
    },

    /// Fewer agents succeeded than the configured success ratio requires.
    #[error(
        "quorum not met: {succeeded} of {targets} agents succeeded ({failed} failed), {required} required"
    )]
    QuorumFailure {
        succeeded: usize,
        failed: usize,
        required: usize,
        targets: usize,
    },

    /// Fewer merged results than the request's minimum.
    #[error("insufficient search results: required {required}, found {found}")]
    InsufficientResults { required: usize, found: usize },

    /// The inbound or outbound stream itself failed.
    #[error("stream aborted: {0}")]
    StreamAbort(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for operations that may fail with [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Create an agent failure carrying which agent failed.
    pub fn agent<A: Into<String>, M: Into<String>>(agent: A, code: ErrorCode, message: M) -> Self {
        GatewayError::AgentFailure {
            agent: agent.into(),
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GatewayError::InvalidArgument(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        GatewayError::InvalidConfig(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        GatewayError::NotFound(msg.into())
    }

    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        GatewayError::AlreadyExists(msg.into())
    }

    pub fn deadline_exceeded<S: Into<String>>(msg: S) -> Self {
        GatewayError::DeadlineExceeded(msg.into())
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        GatewayError::Cancelled(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }

    pub fn stream_abort<S: Into<String>>(msg: S) -> Self {
        GatewayError::StreamAbort(msg.into())
    }

    /// The status code the transport should report for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::AgentFailure { code, .. } => *code,
            GatewayError::QuorumFailure { .. } => ErrorCode::Unavailable,
            GatewayError::InsufficientResults { .. } => ErrorCode::NotFound,
            GatewayError::StreamAbort(_) => ErrorCode::Aborted,
            GatewayError::InvalidArgument(_) | GatewayError::InvalidConfig(_) => {
                ErrorCode::InvalidArgument
            }
            GatewayError::NotFound(_) => ErrorCode::NotFound,
            GatewayError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            GatewayError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            GatewayError::Cancelled(_) => ErrorCode::Cancelled,
            GatewayError::Internal(_) | GatewayError::Io(_) | GatewayError::Json(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Name of the agent that caused this error, if any.
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            GatewayError::AgentFailure { agent, .. } => Some(agent),
            _ => None,
        }
    }
}
