//! Interpreter connection pool
//!
//! Interpreter processes are expensive and scarce, so the pool bounds
//! how many are live at once and hands out reusable handles keyed by
//! connection id. Under saturation the least-recently-used handle is
//! shared rather than spawning past the limit; callers must tolerate
//! handle sharing. One mutex guards the whole map so the
//! check-then-create sequence can never exceed `max_connections` under
//! a race.

use crate::interpreter::{Interpreter, InterpreterFactory};
use crate::utils::config::PoolConfig;
use crate::utils::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Generate a fresh connection identifier
pub fn generate_connection_id() -> String {
    Ulid::new().to_string()
}

struct PoolEntry {
    handle: Arc<dyn Interpreter>,
    last_used: Instant,
}

/// Bounded pool of live interpreter handles
pub struct ConnectionPool {
    factory: Arc<dyn InterpreterFactory>,
    config: PoolConfig,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn InterpreterFactory>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> Arc<dyn InterpreterFactory> {
        self.factory.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get or create a handle.
    ///
    /// A known id returns its existing handle. Below the limit a new
    /// session is created and registered (factory failure propagates;
    /// callers fall back to an unmanaged handle). At the limit the
    /// least-recently-used entry is shared.
    pub async fn acquire(&self, id: Option<&str>) -> Result<Arc<dyn Interpreter>> {
        let mut entries = self.entries.lock().await;

        if let Some(id) = id {
            if let Some(entry) = entries.get_mut(id) {
                entry.last_used = Instant::now();
                debug!("Reusing pooled connection {id}");
                return Ok(entry.handle.clone());
            }
        }

        if entries.len() < self.config.max_connections {
            let factory = self.factory.clone();
            let handle = tokio::task::spawn_blocking(move || factory.create())
                .await
                .map_err(|e| EngineError::RuntimeError(format!("factory task failed: {e}")))??;

            let id = id.map(str::to_string).unwrap_or_else(generate_connection_id);
            entries.insert(
                id.clone(),
                PoolEntry {
                    handle: handle.clone(),
                    last_used: Instant::now(),
                },
            );
            info!(
                "Registered interpreter connection {id} ({}/{})",
                entries.len(),
                self.config.max_connections
            );
            return Ok(handle);
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            if let Some(entry) = entries.get_mut(&id) {
                entry.last_used = Instant::now();
                warn!("Pool saturated, sharing least recently used connection {id}");
                return Ok(entry.handle.clone());
            }
        }

        // max_connections is validated to be at least 1, so an empty
        // map was handled by the create branch above
        Err(EngineError::RuntimeError(
            "connection pool has no capacity".into(),
        ))
    }

    /// Remove and terminate entries idle longer than `idle_for`.
    /// Termination failures are logged, never raised.
    pub async fn evict_idle(&self, idle_for: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) > idle_for)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            if let Some(entry) = entries.remove(&id) {
                evicted += 1;
                terminate_logged(&id, entry.handle).await;
                info!("Cleaned up idle connection {id}");
            }
        }
        evicted
    }

    /// Terminate and remove every entry. One stuck process cannot block
    /// shutdown of the rest.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (id, entry) in entries.drain() {
            terminate_logged(&id, entry.handle).await;
            info!("Closed connection {id}");
        }
    }

    pub async fn live_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

async fn terminate_logged(id: &str, handle: Arc<dyn Interpreter>) {
    let result = tokio::task::spawn_blocking(move || handle.terminate()).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Error terminating connection {id}: {e}"),
        Err(e) => warn!("Termination task for connection {id} failed: {e}"),
    }
}
