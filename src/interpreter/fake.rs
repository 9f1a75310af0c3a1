//! Scripted interpreter doubles for tests
//!
//! `ScriptedInterpreter` answers commands from a list of substring
//! handlers (first match wins); unmatched commands succeed with empty
//! output. A configurable delay simulates long-running scripts.

use crate::interpreter::{EvalOutcome, Interpreter, InterpreterFactory, SessionRef};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Handler = Box<dyn Fn(&str) -> Result<EvalOutcome> + Send + Sync>;

pub(crate) fn ok() -> Result<EvalOutcome> {
    Ok(EvalOutcome::default())
}

pub(crate) fn printed(text: &str) -> Result<EvalOutcome> {
    Ok(EvalOutcome {
        printed: text.to_string(),
        value: None,
    })
}

pub(crate) fn value(value: Value) -> Result<EvalOutcome> {
    Ok(EvalOutcome {
        printed: String::new(),
        value: Some(value),
    })
}

#[derive(Default)]
pub(crate) struct ScriptedInterpreter {
    delay: Option<Duration>,
    handlers: Vec<(String, Handler)>,
    vars: Mutex<BTreeMap<String, Value>>,
    eval_log: Mutex<Vec<String>>,
    fail_terminate: bool,
    pub(crate) interrupted: AtomicBool,
    pub(crate) terminated: AtomicBool,
}

impl ScriptedInterpreter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a handler for commands containing `needle`
    pub(crate) fn on(
        mut self,
        needle: &str,
        handler: impl Fn(&str) -> Result<EvalOutcome> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.push((needle.to_string(), Box::new(handler)));
        self
    }

    pub(crate) fn with_variable(self, name: &str, value: Value) -> Self {
        self.vars.lock().insert(name.to_string(), value);
        self
    }

    /// Simulate a process whose termination never succeeds
    pub(crate) fn with_failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.eval_log.lock().clone()
    }
}

impl Interpreter for ScriptedInterpreter {
    fn evaluate(&self, command: &str, _wants_value: bool) -> Result<EvalOutcome> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.eval_log.lock().push(command.to_string());

        for (needle, handler) in &self.handlers {
            if command.contains(needle.as_str()) {
                return handler(command);
            }
        }
        ok()
    }

    fn call(&self, function: &str, args: &[Value]) -> Result<Value> {
        let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let outcome = self.evaluate(&format!("{function}({})", rendered.join(", ")), true)?;
        Ok(outcome.value.unwrap_or(Value::Null))
    }

    fn get_variable(&self, name: &str) -> Result<Value> {
        self.vars
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Interpreter(format!("Undefined variable '{name}'")))
    }

    fn set_variable(&self, name: &str, value: &Value) -> Result<()> {
        self.vars.lock().insert(name.to_string(), value.clone());
        Ok(())
    }

    fn interrupt(&self) -> Result<()> {
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        if self.fail_terminate {
            return Err(EngineError::RuntimeError("process is stuck".into()));
        }
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type Builder = Box<dyn Fn() -> Result<Arc<dyn Interpreter>> + Send + Sync>;

/// Factory double producing scripted sessions and counting creations
pub(crate) struct ScriptedFactory {
    builder: Builder,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub(crate) fn new(
        builder: impl Fn() -> Result<Arc<dyn Interpreter>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            builder: Box::new(builder),
            created: AtomicUsize::new(0),
        }
    }

    /// Factory whose every session is a fresh default scripted interpreter
    pub(crate) fn plain() -> Self {
        Self::new(|| Ok(Arc::new(ScriptedInterpreter::new()) as Arc<dyn Interpreter>))
    }

    /// Factory that always fails to start a session
    pub(crate) fn failing() -> Self {
        Self::new(|| Err(EngineError::ProcessSpawnFailed("no interpreter".into())))
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl InterpreterFactory for ScriptedFactory {
    fn find_existing(&self) -> Result<Vec<SessionRef>> {
        Ok(Vec::new())
    }

    fn connect(&self, _session: &SessionRef) -> Result<Arc<dyn Interpreter>> {
        Err(EngineError::ProcessSpawnFailed("no shared sessions".into()))
    }

    fn start(&self) -> Result<Arc<dyn Interpreter>> {
        let handle = (self.builder)()?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}
