//! Process-backed interpreter sessions
//!
//! Drives a headless `matlab -nosplash -nodesktop` child over piped
//! stdio. Commands are wrapped in a single-line try/catch frame that
//! reports faults and completion through sentinel markers, so one
//! round trip is: write frame, read lines until the completion marker.
//! Return values travel as JSON via the interpreter's own
//! `jsonencode`/`jsondecode`.
//!
//! Multi-line fragments cannot cross a REPL line boundary, so they are
//! staged to a scratch file and dispatched as `run('…')`.

use crate::interpreter::commands::escape_single_quotes;
use crate::interpreter::{EvalOutcome, Interpreter, InterpreterFactory, SessionRef};
use crate::utils::errors::{EngineError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Marks the end of one evaluate round trip
const DONE_MARK: &str = "__MB_DONE__";

/// Prefixes the interpreter's error report for a failed command
const ERR_MARK: &str = "__MB_ERR__";

/// Prefixes the JSON-encoded return value
const VAL_MARK: &str = "__MB_VAL__";

/// Stands in for newlines inside single-line error reports
const NEWLINE_TOKEN: &str = "<<NL>>";

/// Grace period between SIGTERM and SIGKILL on terminate
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long a round trip waits for the session before reporting it
/// busy. A timed-out call may still hold the stream; best-effort
/// follow-ups (memory status, cleanup) must not hang behind it.
const SESSION_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces process-backed sessions from a MATLAB installation
pub struct ProcessFactory {
    matlab_root: Option<PathBuf>,
}

impl ProcessFactory {
    pub fn new(matlab_root: Option<PathBuf>) -> Self {
        Self { matlab_root }
    }

    /// Read the installation root from `MATLAB_PATH`; falls back to
    /// searching `PATH` for the executable
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("MATLAB_PATH").map(PathBuf::from))
    }

    fn executable(&self) -> Result<PathBuf> {
        if let Some(root) = &self.matlab_root {
            let candidate = root.join("bin").join("matlab");
            if candidate.exists() {
                return Ok(candidate);
            }
            return Err(EngineError::ProcessSpawnFailed(format!(
                "no matlab executable under {}",
                root.display()
            )));
        }

        which::which("matlab").map_err(|e| {
            EngineError::ProcessSpawnFailed(format!("matlab not found in PATH: {e}"))
        })
    }
}

impl InterpreterFactory for ProcessFactory {
    /// Process transport has no shared-session discovery
    fn find_existing(&self) -> Result<Vec<SessionRef>> {
        Ok(Vec::new())
    }

    fn connect(&self, session: &SessionRef) -> Result<Arc<dyn Interpreter>> {
        Err(EngineError::ProcessSpawnFailed(format!(
            "attaching to shared session '{}' is not supported by the process transport",
            session.0
        )))
    }

    fn start(&self) -> Result<Arc<dyn Interpreter>> {
        let executable = self.executable()?;
        info!("Starting MATLAB process from {:?}", executable);
        let interpreter = ProcessInterpreter::spawn(&executable)?;
        Ok(Arc::new(interpreter))
    }
}

struct SessionIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One headless MATLAB child process
pub struct ProcessInterpreter {
    child: Mutex<Child>,
    io: Mutex<SessionIo>,
    pid: u32,
    scratch_dir: PathBuf,
}

impl ProcessInterpreter {
    /// Spawn and synchronize a fresh session
    pub fn spawn(executable: &Path) -> Result<Self> {
        let mut child = Command::new(executable)
            .args(["-nosplash", "-nodesktop"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::ProcessSpawnFailed(format!("failed to spawn: {e}")))?;

        let pid = child.id();
        debug!("MATLAB process spawned with PID {pid}");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::ProcessSpawnFailed("failed to capture stderr".into()))?;

        // Drain stderr on its own thread so the child never stalls on a
        // full pipe
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => debug!("matlab stderr: {line}"),
                    Err(_) => break,
                }
            }
        });

        let scratch_dir = std::env::temp_dir().join(format!("matlab-bridge-{pid}"));
        std::fs::create_dir_all(&scratch_dir)?;

        let interpreter = Self {
            child: Mutex::new(child),
            io: Mutex::new(SessionIo {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            pid,
            scratch_dir,
        };

        // Read past the startup banner before accepting commands
        interpreter.round_trip(&format!("fprintf('{DONE_MARK}\\n')\n"))?;

        Ok(interpreter)
    }

    /// Write one framed command and read until the completion marker
    fn round_trip(&self, framed: &str) -> Result<EvalOutcome> {
        let mut io = self.io.try_lock_for(SESSION_BUSY_TIMEOUT).ok_or_else(|| {
            EngineError::RuntimeError(
                "interpreter session is busy with an abandoned call".into(),
            )
        })?;

        io.stdin.write_all(framed.as_bytes())?;
        io.stdin.flush()?;

        let mut printed = String::new();
        let mut value = None;
        let mut report: Option<String> = None;

        loop {
            let mut line = String::new();
            if io.stdout.read_line(&mut line)? == 0 {
                return Err(EngineError::RuntimeError(
                    "MATLAB process closed its output stream".into(),
                ));
            }

            let raw = line.trim_end_matches(['\r', '\n']);
            let stripped = strip_prompts(raw);
            if raw.starts_with(">>") && stripped.is_empty() {
                continue;
            }

            if stripped.starts_with(DONE_MARK) {
                break;
            }
            if let Some(rest) = stripped.strip_prefix(ERR_MARK) {
                report = Some(rest.replace(NEWLINE_TOKEN, "\n"));
                continue;
            }
            if let Some(rest) = stripped.strip_prefix(VAL_MARK) {
                value = Some(serde_json::from_str(rest).map_err(|e| {
                    EngineError::RuntimeError(format!("malformed value payload: {e}"))
                })?);
                continue;
            }

            printed.push_str(stripped);
            printed.push('\n');
        }

        if let Some(report) = report {
            return Err(EngineError::Interpreter(report));
        }

        Ok(EvalOutcome { printed, value })
    }
}

impl Interpreter for ProcessInterpreter {
    fn evaluate(&self, command: &str, wants_value: bool) -> Result<EvalOutcome> {
        let (framed, scratch) = frame_command(&self.scratch_dir, command, wants_value)?;
        let result = self.round_trip(&framed);
        if let Some(path) = scratch {
            let _ = std::fs::remove_file(path);
        }
        result
    }

    fn call(&self, function: &str, args: &[Value]) -> Result<Value> {
        let rendered: Vec<String> = args.iter().map(render_argument).collect::<Result<_>>()?;
        let expr = format!("{function}({})", rendered.join(", "));
        self.evaluate(&expr, true)?.value.ok_or_else(|| {
            EngineError::RuntimeError(format!("call to {function} produced no value"))
        })
    }

    fn get_variable(&self, name: &str) -> Result<Value> {
        self.evaluate(name, true)?
            .value
            .ok_or_else(|| EngineError::RuntimeError(format!("variable {name} produced no value")))
    }

    fn set_variable(&self, name: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| EngineError::RuntimeError(format!("unencodable value for {name}: {e}")))?;
        let command = format!("{name} = jsondecode('{}');", escape_single_quotes(&json));
        self.evaluate(&command, false).map(|_| ())
    }

    /// SIGINT lands on the process directly, so an interrupt never
    /// queues behind the in-flight evaluate holding the stdio lock
    fn interrupt(&self) -> Result<()> {
        debug!("Sending SIGINT to PID {}", self.pid);
        kill(Pid::from_raw(self.pid as i32), Signal::SIGINT)
            .map_err(|e| EngineError::RuntimeError(format!("failed to send SIGINT: {e}")))
    }

    fn terminate(&self) -> Result<()> {
        let mut child = self.child.lock();
        if reaped(&mut child)? {
            return Ok(());
        }

        let pid = Pid::from_raw(self.pid as i32);
        debug!("Sending SIGTERM to PID {}", self.pid);
        let _ = kill(pid, Signal::SIGTERM);

        let poll = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < TERMINATE_GRACE {
            std::thread::sleep(poll);
            waited += poll;
            if reaped(&mut child)? {
                return Ok(());
            }
        }

        warn!("Process still alive, sending SIGKILL to PID {}", self.pid);
        kill(pid, Signal::SIGKILL)
            .map_err(|e| EngineError::RuntimeError(format!("failed to send SIGKILL: {e}")))?;
        child
            .wait()
            .map_err(|e| EngineError::RuntimeError(format!("failed to reap process: {e}")))?;
        Ok(())
    }
}

impl Drop for ProcessInterpreter {
    fn drop(&mut self) {
        let _ = self.terminate();
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }
}

fn reaped(child: &mut Child) -> Result<bool> {
    child
        .try_wait()
        .map(|status| status.is_some())
        .map_err(|e| EngineError::RuntimeError(format!("failed to poll process: {e}")))
}

/// Drop leading REPL prompts from an output line
fn strip_prompts(line: &str) -> &str {
    let mut rest = line;
    while let Some(stripped) = rest.strip_prefix(">>") {
        rest = stripped.strip_prefix(' ').unwrap_or(stripped);
    }
    rest
}

/// Render a function argument as an interpreter-side JSON decode
fn render_argument(value: &Value) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| EngineError::RuntimeError(format!("unencodable argument: {e}")))?;
    Ok(format!("jsondecode('{}')", escape_single_quotes(&json)))
}

/// Wrap a command in the try/catch sentinel frame. Multi-line fragments
/// are staged to a scratch file (returned for cleanup) and dispatched
/// via `run`.
pub(crate) fn frame_command(
    scratch_dir: &Path,
    command: &str,
    wants_value: bool,
) -> Result<(String, Option<PathBuf>)> {
    let (body, scratch) = if command.contains('\n') {
        if wants_value {
            return Err(EngineError::RuntimeError(
                "value-producing commands must be single expressions".into(),
            ));
        }
        let path = scratch_dir.join(format!("cmd_{}.m", Ulid::new()));
        std::fs::write(&path, command)?;
        let escaped = escape_single_quotes(&path.display().to_string());
        (format!("run('{escaped}')"), Some(path))
    } else if wants_value {
        (
            format!("fprintf('{VAL_MARK}%s\\n', jsonencode({command}))"),
            None,
        )
    } else {
        (command.to_string(), None)
    };

    let framed = format!(
        "try, {body}, catch bridge_err__, \
         fprintf('{ERR_MARK}%s\\n', strrep(getReport(bridge_err__, 'extended', 'hyperlinks', 'off'), \
         sprintf('\\n'), '{NEWLINE_TOKEN}')), end, fprintf('{DONE_MARK}\\n')\n"
    );
    Ok((framed, scratch))
}
