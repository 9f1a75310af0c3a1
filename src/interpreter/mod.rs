//! Interpreter interface boundary
//!
//! The engine treats MATLAB as an opaque stateful evaluator reachable
//! through a narrow command-execution API. [`Interpreter`] is one live
//! session; [`InterpreterFactory`] discovers, attaches to, or starts
//! sessions. Every method is fallible: the process behind a handle may
//! hang, crash, or be gone by the time a call lands.
//!
//! Methods are blocking by design. The execution core runs them on
//! dedicated blocking threads so its own control flow never stalls, and
//! so a timed-out call can be abandoned.

pub(crate) mod commands;
pub mod process;

#[cfg(test)]
pub(crate) mod fake;

use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Reference to a discoverable shared interpreter session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef(pub String);

/// Result of one evaluate round trip: whatever the interpreter printed,
/// plus the decoded return value when one was requested
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    pub printed: String,
    pub value: Option<Value>,
}

/// One live interpreter session
pub trait Interpreter: Send + Sync {
    /// Evaluate a command. With `wants_value` the command must be a
    /// single expression and its value is decoded into the outcome.
    fn evaluate(&self, command: &str, wants_value: bool) -> Result<EvalOutcome>;

    /// Call a named function with positional arguments and return its value
    fn call(&self, function: &str, args: &[Value]) -> Result<Value>;

    /// Read a workspace variable by name
    fn get_variable(&self, name: &str) -> Result<Value>;

    /// Write a workspace variable by name
    fn set_variable(&self, name: &str, value: &Value) -> Result<()>;

    /// Best-effort cancellation of whatever the session is evaluating.
    /// Must not block behind an in-flight evaluate call.
    fn interrupt(&self) -> Result<()>;

    /// Ask the session's process to terminate
    fn terminate(&self) -> Result<()>;
}

/// Discovers and produces interpreter sessions
pub trait InterpreterFactory: Send + Sync {
    /// List shared sessions that can be attached to
    fn find_existing(&self) -> Result<Vec<SessionRef>>;

    /// Attach to a shared session
    fn connect(&self, session: &SessionRef) -> Result<Arc<dyn Interpreter>>;

    /// Start a fresh session
    fn start(&self) -> Result<Arc<dyn Interpreter>>;

    /// Preferred acquisition order: attach to an existing session when
    /// one is discoverable, otherwise start fresh
    fn create(&self) -> Result<Arc<dyn Interpreter>> {
        let sessions = self.find_existing().unwrap_or_default();
        if let Some(first) = sessions.first() {
            if let Ok(handle) = self.connect(first) {
                return Ok(handle);
            }
        }
        self.start()
    }
}

/// Caller-supplied workspace values, classified into a closed set of
/// variants with one conversion each
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedValue {
    /// Numeric scalar, converted to a 1x1 double
    Scalar(f64),

    /// Homogeneous numeric list, converted to a double row vector
    NumericArray(Vec<f64>),

    /// Anything else, passed through as-is
    Opaque(Value),
}

impl InjectedValue {
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => InjectedValue::Scalar(v),
                None => InjectedValue::Opaque(value.clone()),
            },
            Value::Array(items) if items.iter().all(Value::is_number) => {
                InjectedValue::NumericArray(
                    items.iter().filter_map(Value::as_f64).collect(),
                )
            }
            other => InjectedValue::Opaque(other.clone()),
        }
    }

    /// Write this value into the interpreter workspace under `name`
    pub fn inject(&self, name: &str, interpreter: &dyn Interpreter) -> Result<()> {
        match self {
            InjectedValue::Scalar(v) => interpreter.set_variable(name, &json!(v)),
            InjectedValue::NumericArray(items) => interpreter.set_variable(name, &json!(items)),
            InjectedValue::Opaque(value) => interpreter.set_variable(name, value),
        }
    }
}

/// One record from the interpreter's variable listing
#[derive(Debug, Clone, Deserialize)]
pub struct VarInfo {
    pub name: String,

    /// Dimensions as reported by the interpreter
    #[serde(default)]
    pub size: Vec<u64>,

    /// Resident size in bytes
    pub bytes: u64,

    /// Interpreter-side class name
    #[serde(default)]
    pub class: String,
}

impl VarInfo {
    pub fn element_count(&self) -> u64 {
        if self.size.is_empty() {
            0
        } else {
            self.size.iter().product()
        }
    }

    /// True for the interpreter's floating-point array classes
    pub fn is_numeric(&self) -> bool {
        matches!(self.class.as_str(), "double" | "single")
    }

    pub fn size_mb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Enumerate interpreter-resident variables.
///
/// The interpreter encodes a one-element listing as a bare object rather
/// than a one-element array; both shapes are accepted.
pub fn list_variables(interpreter: &dyn Interpreter) -> Result<Vec<VarInfo>> {
    let outcome = interpreter.evaluate(commands::WHO_LISTING, true)?;

    let value = match outcome.value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => Value::Array(vec![Value::Object(map)]),
        Some(other) => other,
    };

    serde_json::from_value(value)
        .map_err(|e| EngineError::RuntimeError(format!("malformed variable listing: {e}")))
}
