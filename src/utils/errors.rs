//! Error types for the engine
//!
//! Everything fallible in this crate returns [`Result`]. The error kinds
//! mirror the three failure classes callers branch on: interpreter-side
//! faults, timeouts, and host-side faults. The engine boundary converts
//! these into the `error` field of an execution result instead of
//! re-raising them across the call.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// The interpreter raised a fault while evaluating a command.
    /// Carries the interpreter's own error report.
    #[error("{0}")]
    Interpreter(String),

    /// Execution exceeded the configured time budget
    #[error("MATLAB execution timed out after {seconds} seconds. Command may be stuck in infinite loop.")]
    ExecutionTimeout { seconds: u64 },

    /// Failed to spawn or attach to an interpreter process
    #[error("failed to start MATLAB process: {0}")]
    ProcessSpawnFailed(String),

    /// A script file referenced by path does not exist
    #[error("script not found: {0}")]
    ScriptNotFound(PathBuf),

    /// Script names must be valid interpreter identifiers
    #[error("script name must be a valid MATLAB identifier: {0}")]
    InvalidScriptName(String),

    /// Configuration failed validation or could not be loaded
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Figure rendering or post-processing failed
    #[error("figure rendering failed: {0}")]
    RenderFailed(String),

    /// Host-side runtime fault (threads, channels, protocol framing)
    #[error("{0}")]
    RuntimeError(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse error classification attached to execution results so callers
/// branch on data rather than on error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    InterpreterFault,
    HostFault,
}

impl EngineError {
    /// Classify this error into the three caller-visible kinds
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ExecutionTimeout { .. } => ErrorKind::Timeout,
            EngineError::Interpreter(_) => ErrorKind::InterpreterFault,
            _ => ErrorKind::HostFault,
        }
    }

    /// Render the kind-tagged message placed in `ExecutionResult::error`
    pub fn tagged_message(&self) -> String {
        match self.kind() {
            ErrorKind::Timeout => format!("Execution Timeout: {self}"),
            ErrorKind::InterpreterFault => format!("MATLAB Error: {self}"),
            ErrorKind::HostFault => format!("Host Error: {self}"),
        }
    }
}
