use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error identifiers exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ModelUnavailable,
    StreamInterrupted,
    ToolLoopExceeded,
    ToolExecutionFailed,
    UnknownTool,
}

/// Failures local to a single tool call. These never end a run; they are
/// handed back to the model as a tool result.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {name}: {message}")]
    InvalidArguments { name: String, message: String },

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("tool {name} timed out after {secs}s")]
    Timeout { name: String, secs: u64 },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            _ => ErrorKind::ToolExecutionFailed,
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures that terminate a relay run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("tool loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            RelayError::StreamInterrupted(_) => ErrorKind::StreamInterrupted,
            RelayError::ToolLoopExceeded(_) => ErrorKind::ToolLoopExceeded,
        }
    }
}
