//! MATLAB Bridge Engine Library
//!
//! Execution and resource-management core for driving scripted MATLAB
//! sessions on behalf of tool-calling clients. The engine accepts
//! untrusted, arbitrarily long-running script fragments, runs them
//! against a stateful interpreter process, enforces time and memory
//! budgets, captures rendered figures, and returns size-bounded
//! workspace snapshots.
//!
//! # Architecture
//!
//! - **engine**: execution core, figure capture, workspace
//!   summarization, memory guard
//! - **pool**: bounded LRU pool of live interpreter connections
//! - **interpreter**: the narrow session API plus the process-backed
//!   implementation
//! - **sections**: script section location and extraction
//! - **scripts**: durable script file library
//! - **models**: result, figure, and status types
//! - **observability**: tracing setup helper
//! - **utils**: configuration and error types
//!
//! The tool-calling protocol layer is external: it constructs one
//! [`ConnectionPool`], one [`Engine`] per logical caller, and maps each
//! exposed operation onto the plain async methods here.

pub mod engine;
pub mod interpreter;
pub mod models;
pub mod observability;
pub mod pool;
pub mod scripts;
pub mod sections;
pub mod utils;

// Re-export commonly used types
pub use engine::{Engine, WorkspaceVars, DEFAULT_CLEAR_THRESHOLD_MB};
pub use models::{
    ConnectionStatus, ExecutionResult, FigureData, FigureFormat, MemoryStatus, SectionInfo,
    VariableSummary,
};
pub use pool::ConnectionPool;
pub use scripts::ScriptLibrary;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, ErrorKind, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
