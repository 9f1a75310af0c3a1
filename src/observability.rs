//! Tracing initialization
//!
//! The embedding process owns logging setup; this helper is what it
//! calls. `MATLAB_BRIDGE_DEBUG=1` raises the default level to `debug`;
//! `RUST_LOG` wins when set. Output goes to stderr so a stdio-based
//! protocol layer keeps stdout to itself.

use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::EnvFilter;

/// Environment variable toggling verbose diagnostics
pub const DEBUG_ENV_VAR: &str = "MATLAB_BRIDGE_DEBUG";

/// Initialize the tracing subscriber. Idempotent callers should invoke
/// this once at startup; a second call returns an error from the
/// underlying subscriber registry.
pub fn init_tracing() -> Result<()> {
    let default_level = if debug_enabled() { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| EngineError::RuntimeError(format!("failed to init tracing: {e}")))
}

fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV_VAR)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_parsing() {
        std::env::remove_var(DEBUG_ENV_VAR);
        assert!(!debug_enabled());

        std::env::set_var(DEBUG_ENV_VAR, "1");
        assert!(debug_enabled());

        std::env::set_var(DEBUG_ENV_VAR, "true");
        assert!(debug_enabled());

        std::env::set_var(DEBUG_ENV_VAR, "0");
        assert!(!debug_enabled());

        std::env::remove_var(DEBUG_ENV_VAR);
    }
}
