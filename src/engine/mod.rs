//! Execution core
//!
//! Drives one interpreter call at a time through a fixed lifecycle:
//! initialize the connection (pooled, with a stale-probe fallback to a
//! direct one), clear prior figures, inject caller variables, enforce
//! the memory budget, dispatch under the configured timeout, then
//! capture figures, summarize the workspace, and snapshot memory.
//!
//! Every failure mode comes back as a well-formed [`ExecutionResult`]
//! with a kind-tagged error; nothing re-raises across the `execute`
//! boundary except `execute_section`'s fail-fast missing-file check.
//!
//! Timeout contract: the blocking interpreter call runs on its own
//! execution thread while this task polls completion at a fixed short
//! interval. On deadline a best-effort interrupt is issued and the
//! background call is abandoned, never relied upon.
//!
//! The interpreter is not reentrant. Concurrent `execute` calls against
//! one engine instance must be prevented by the caller, either by
//! single-flighting or by giving each caller its own connection id.

pub mod figures;
pub mod memory;
pub mod workspace;

pub use figures::FigureCapture;
pub use memory::{MemoryGuard, DEFAULT_CLEAR_THRESHOLD_MB};
pub use workspace::WorkspaceSummarizer;

use crate::interpreter::{commands, EvalOutcome, InjectedValue, Interpreter};
use crate::models::{
    ConnectionStatus, ErrorDetail, ExecutionResult, FigureData, MemoryStatus, WorkspaceSnapshot,
};
use crate::pool::{generate_connection_id, ConnectionPool};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Completion poll cadence while a call runs on its execution thread
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Caller-supplied variables to inject before a run
pub type WorkspaceVars = BTreeMap<String, Value>;

#[derive(Default)]
struct EngineState {
    handle: Option<Arc<dyn Interpreter>>,
}

/// One logical owner of an interpreter connection
pub struct Engine {
    config: EngineConfig,
    pool: Arc<ConnectionPool>,
    connection_id: String,
    output_dir: PathBuf,
    connected_at: Instant,
    last_activity: parking_lot::Mutex<DateTime<Utc>>,
    state: tokio::sync::Mutex<EngineState>,
    init_count: AtomicUsize,
    figures: FigureCapture,
    workspace: WorkspaceSummarizer,
    memory: MemoryGuard,
}

impl Engine {
    /// Engine writing figures under `~/.mcp/matlab/output`
    pub fn new(config: EngineConfig, pool: Arc<ConnectionPool>) -> Result<Self> {
        let output_dir = default_output_dir()?;
        Self::with_output_dir(config, pool, output_dir)
    }

    /// Engine with an explicit per-instance output directory. Two
    /// engine instances must not share one directory.
    pub fn with_output_dir(
        config: EngineConfig,
        pool: Arc<ConnectionPool>,
        output_dir: PathBuf,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            figures: FigureCapture::new(config.figures.clone(), output_dir.clone()),
            workspace: WorkspaceSummarizer::new(config.workspace.clone()),
            memory: MemoryGuard::new(config.performance.memory_limit_mb),
            config,
            pool,
            connection_id: generate_connection_id(),
            output_dir,
            connected_at: Instant::now(),
            last_activity: parking_lot::Mutex::new(Utc::now()),
            state: tokio::sync::Mutex::new(EngineState::default()),
            init_count: AtomicUsize::new(0),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Number of connection initializations this engine has performed
    pub fn initialization_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Execute a script fragment or file against the interpreter.
    ///
    /// Never errors: every failure mode is folded into the result's
    /// `error` field with a kind tag.
    pub async fn execute(
        &self,
        script: &str,
        is_file: bool,
        workspace_vars: Option<&WorkspaceVars>,
        capture_plots: bool,
    ) -> ExecutionResult {
        let started = Instant::now();

        let handle = match self.ensure_initialized().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}", e.tagged_message());
                return ExecutionResult::failure(
                    &e,
                    started.elapsed().as_secs_f64(),
                    None,
                    Some(build_error_detail(&e, None)),
                );
            }
        };

        // Keep the source around so interpreter faults can carry context
        let source = if is_file {
            std::fs::read_to_string(script).ok()
        } else {
            Some(script.to_string())
        };

        match self
            .run_to_completion(&handle, script, is_file, workspace_vars, capture_plots)
            .await
        {
            Ok((output, workspace, figures, memory_status)) => ExecutionResult::success(
                output,
                workspace,
                figures,
                started.elapsed().as_secs_f64(),
                Some(memory_status),
            ),
            Err(e) => {
                warn!("{}", e.tagged_message());
                let memory_status = self.best_effort_memory_status(&handle).await;
                ExecutionResult::failure(
                    &e,
                    started.elapsed().as_secs_f64(),
                    memory_status,
                    Some(build_error_detail(&e, source.as_deref())),
                )
            }
        }
    }

    /// Execute one section of a script file.
    ///
    /// Missing files fail fast here, before any interpreter
    /// interaction; everything else reports through the result.
    pub async fn execute_section(
        &self,
        file_path: &str,
        section_range: (usize, usize),
        maintain_workspace: bool,
        capture_plots: bool,
    ) -> Result<ExecutionResult> {
        let path = Path::new(file_path);
        if !path.exists() {
            return Err(EngineError::ScriptNotFound(path.to_path_buf()));
        }

        let source = std::fs::read_to_string(path)?;
        let code = crate::sections::extract(
            &source,
            section_range.0,
            section_range.1,
            maintain_workspace,
        );

        info!(
            "Executing section (lines {}-{})",
            section_range.0, section_range.1
        );
        Ok(self.execute(&code, false, None, capture_plots).await)
    }

    /// Bounded snapshot of all interpreter-resident variables
    pub async fn get_workspace(&self) -> Result<WorkspaceSnapshot> {
        let handle = self.ensure_initialized().await?;
        let summarizer = self.workspace.clone();
        run_blocking(move || summarizer.summarize(&*handle)).await?
    }

    /// Current workspace memory summary
    pub async fn get_memory_status(&self) -> Result<MemoryStatus> {
        let handle = self.ensure_initialized().await?;
        let guard = self.memory.clone();
        run_blocking(move || guard.status(&*handle)).await
    }

    /// Clear every variable above `threshold_mb`, returning the names
    pub async fn clear_large_variables(&self, threshold_mb: f64) -> Result<Vec<String>> {
        let handle = self.ensure_initialized().await?;
        let guard = self.memory.clone();
        run_blocking(move || guard.clear_large(&*handle, threshold_mb)).await
    }

    /// Liveness descriptor for this engine's connection
    pub async fn get_connection_status(&self) -> ConnectionStatus {
        let is_connected = self.state.lock().await.handle.is_some();
        ConnectionStatus {
            is_connected,
            connection_id: self.connection_id.clone(),
            uptime_seconds: self.connected_at.elapsed().as_secs_f64(),
            last_activity: *self.last_activity.lock(),
        }
    }

    /// Evict pool entries idle past the configured threshold
    pub async fn cleanup_idle_connections(&self) -> usize {
        let idle_for = Duration::from_secs(self.pool.config().idle_timeout_secs);
        self.pool.evict_idle(idle_for).await
    }

    /// Release this engine's handle back to the pool, closing any open
    /// figures first. The pooled process keeps running for reuse.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.handle.take() {
            let capture = self.figures.clone();
            if run_blocking(move || capture.cleanup(&*handle)).await.is_err() {
                warn!("Error cleaning up figures during close");
            }
            debug!("Connection returned to pool: {}", self.connection_id);
        }
    }

    /// Acquire and probe a handle exactly once; later calls reuse it.
    /// A stale pooled handle or a pool failure falls back to a direct,
    /// unpooled connection.
    async fn ensure_initialized(&self) -> Result<Arc<dyn Interpreter>> {
        let mut state = self.state.lock().await;
        if let Some(handle) = &state.handle {
            return Ok(handle.clone());
        }

        info!("Initializing MATLAB engine (connection {})", self.connection_id);
        let handle = match self.pool.acquire(Some(&self.connection_id)).await {
            Ok(handle) => match self.probe(handle.clone()).await {
                Ok(()) => handle,
                Err(e) => {
                    warn!("Pooled connection appears stale, creating direct connection: {e}");
                    self.direct_connect().await?
                }
            },
            Err(e) => {
                warn!("Connection pool failed, falling back to direct connection: {e}");
                self.direct_connect().await?
            }
        };

        // Make scripts in the working directory resolvable by name
        if let Ok(cwd) = std::env::current_dir() {
            let command = commands::add_path(&cwd);
            let path_handle = handle.clone();
            let added = run_blocking(move || path_handle.evaluate(&command, false)).await;
            if let Err(e) = added.and_then(|inner| inner) {
                warn!("Could not add current directory to path: {e}");
            }
        }

        state.handle = Some(handle.clone());
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    /// Trivial command verifying a pooled handle is still alive
    async fn probe(&self, handle: Arc<dyn Interpreter>) -> Result<()> {
        run_blocking(move || handle.evaluate(commands::VERSION, true)).await??;
        Ok(())
    }

    /// Unmanaged fallback handle, not tracked by the pool
    async fn direct_connect(&self) -> Result<Arc<dyn Interpreter>> {
        let factory = self.pool.factory();
        run_blocking(move || factory.create()).await?
    }

    async fn run_to_completion(
        &self,
        handle: &Arc<dyn Interpreter>,
        script: &str,
        is_file: bool,
        workspace_vars: Option<&WorkspaceVars>,
        capture_plots: bool,
    ) -> Result<(String, WorkspaceSnapshot, Vec<FigureData>, MemoryStatus)> {
        // Side effects hold a fixed order: clear figures, inject
        // variables, memory check, dispatch, capture, summarize
        if capture_plots {
            self.eval(handle, commands::CLOSE_ALL).await?;
        }

        if let Some(vars) = workspace_vars {
            for (name, value) in vars {
                let injected = InjectedValue::classify(value);
                let name = name.clone();
                let handle = handle.clone();
                run_blocking(move || injected.inject(&name, &*handle)).await??;
            }
        }

        self.enforce_memory_budget(handle).await?;

        let command = if is_file {
            let path = Path::new(script);
            if !path.exists() {
                return Err(EngineError::ScriptNotFound(path.to_path_buf()));
            }
            info!("Executing MATLAB script: {}", path.display());
            commands::run_file(path)
        } else {
            debug!("Executing MATLAB command");
            script.to_string()
        };

        let output = self.dispatch(handle.clone(), command).await?;
        *self.last_activity.lock() = Utc::now();

        let figures = if capture_plots {
            let capture = self.figures.clone();
            let handle = handle.clone();
            run_blocking(move || capture.capture(&*handle)).await??
        } else {
            Vec::new()
        };

        let workspace = {
            let summarizer = self.workspace.clone();
            let handle = handle.clone();
            run_blocking(move || summarizer.summarize(&*handle)).await??
        };

        let memory_status = {
            let guard = self.memory.clone();
            let handle = handle.clone();
            run_blocking(move || guard.status(&*handle)).await?
        };

        Ok((output, workspace, figures, memory_status))
    }

    /// Evict large variables before a run when the budget is exceeded.
    /// Guard failures are absorbed at the guard layer and never abort
    /// the run.
    async fn enforce_memory_budget(&self, handle: &Arc<dyn Interpreter>) -> Result<()> {
        if self.memory.limit_mb().is_none() {
            return Ok(());
        }

        let guard = self.memory.clone();
        let check_handle = handle.clone();
        let exceeded = run_blocking(move || guard.check_limit(&*check_handle)).await?;
        if !exceeded {
            return Ok(());
        }

        warn!("Memory limit exceeded, clearing large variables");
        let guard = self.memory.clone();
        let clear_handle = handle.clone();
        let cleared =
            run_blocking(move || guard.clear_large(&*clear_handle, guard.auto_threshold_mb()))
                .await?;
        info!("Cleared {} large variables to free memory", cleared.len());
        Ok(())
    }

    /// Run the interpreter call under the configured timeout. Without a
    /// timeout the dispatch is synchronous; with one, the blocking call
    /// gets its own thread and this task polls for completion, issuing
    /// a best-effort interrupt and abandoning the call on deadline.
    async fn dispatch(&self, handle: Arc<dyn Interpreter>, command: String) -> Result<String> {
        let Some(seconds) = self.config.performance.execution_timeout_seconds else {
            let outcome = self.eval(&handle, command).await?;
            return Ok(outcome.printed);
        };

        let eval_handle = handle.clone();
        let join = tokio::task::spawn_blocking(move || eval_handle.evaluate(&command, false));

        let deadline = Instant::now() + Duration::from_secs(seconds);
        loop {
            if join.is_finished() {
                let outcome = join
                    .await
                    .map_err(|e| EngineError::RuntimeError(format!("execution thread failed: {e}")))??;
                return Ok(outcome.printed);
            }
            if Instant::now() >= deadline {
                if let Err(e) = handle.interrupt() {
                    debug!("Interrupt after timeout failed: {e}");
                }
                return Err(EngineError::ExecutionTimeout { seconds });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn eval(
        &self,
        handle: &Arc<dyn Interpreter>,
        command: impl Into<String>,
    ) -> Result<EvalOutcome> {
        let handle = handle.clone();
        let command = command.into();
        run_blocking(move || handle.evaluate(&command, false)).await?
    }

    async fn best_effort_memory_status(
        &self,
        handle: &Arc<dyn Interpreter>,
    ) -> Option<MemoryStatus> {
        let guard = self.memory.clone();
        let handle = handle.clone();
        run_blocking(move || guard.status(&*handle)).await.ok()
    }
}

/// Run a blocking interpreter interaction on the blocking thread pool
async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> T + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| EngineError::RuntimeError(format!("execution thread failed: {e}")))
}

fn default_output_dir() -> Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| EngineError::RuntimeError("cannot resolve home directory".into()))?;
    Ok(base.home_dir().join(".mcp").join("matlab").join("output"))
}

/// Structured detail for a failed run: kind always, line/context/stack
/// when the interpreter report yields them
fn build_error_detail(error: &EngineError, source: Option<&str>) -> ErrorDetail {
    let (line, stack) = match error {
        EngineError::Interpreter(report) => (parse_report_line(report), Some(report.clone())),
        _ => (None, None),
    };
    let context = match (line, source) {
        (Some(line), Some(source)) => context_lines(source, line),
        _ => Vec::new(),
    };
    ErrorDetail {
        kind: error.kind(),
        line,
        context,
        stack,
    }
}

/// Pull the 1-based source line out of an interpreter report like
/// `Error using foo (line 12)`
fn parse_report_line(report: &str) -> Option<usize> {
    let start = report.find("(line ")? + "(line ".len();
    let digits: String = report[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Numbered source lines around a 1-based failure line
fn context_lines(source: &str, line: usize) -> Vec<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return Vec::new();
    }

    let index = line - 1;
    let start = index.saturating_sub(2);
    let end = (index + 2).min(lines.len() - 1);
    (start..=end)
        .map(|i| format!("{}: {}", i + 1, lines[i]))
        .collect()
}
