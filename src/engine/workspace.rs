//! Workspace summarization
//!
//! Interpreter state can hold matrices far too large to ship back to a
//! caller, so variables transfer in three tiers: small values in full,
//! medium arrays as statistics plus a sample, large arrays as metadata
//! with an explicit note. This bounding is the system's main cost
//! control. One unreadable variable becomes an inline placeholder and
//! never aborts the rest of the snapshot.

use crate::interpreter::{commands, list_variables, Interpreter, VarInfo};
use crate::models::{ArraySummary, ArrayTier, VariableSummary, WorkspaceSnapshot};
use crate::utils::config::WorkspaceConfig;
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;

/// The interpreter's default numeric type is an 8-byte float
const BYTES_PER_ELEMENT: f64 = 8.0;

/// Large arrays sample at most this many elements
const LARGE_SAMPLE_MAX: usize = 5;

const TOO_LARGE_NOTE: &str = "Array too large for full transfer";

#[derive(Debug, Clone)]
pub struct WorkspaceSummarizer {
    config: WorkspaceConfig,
}

impl WorkspaceSummarizer {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    /// Snapshot every interpreter-resident variable in bounded form
    pub fn summarize(&self, interpreter: &dyn Interpreter) -> Result<WorkspaceSnapshot> {
        let variables = list_variables(interpreter)?;

        let mut snapshot = WorkspaceSnapshot::new();
        for info in variables {
            let summary = match self.summarize_variable(interpreter, &info) {
                Ok(summary) => summary,
                Err(e) => VariableSummary::Text(format!("<Error reading variable: {e}>")),
            };
            snapshot.insert(info.name, summary);
        }
        Ok(snapshot)
    }

    fn summarize_variable(
        &self,
        interpreter: &dyn Interpreter,
        info: &VarInfo,
    ) -> Result<VariableSummary> {
        if !info.is_numeric() {
            return self.summarize_opaque(interpreter, info);
        }

        let count = info.element_count() as usize;
        if count <= self.config.small_threshold {
            return Ok(VariableSummary::Full(interpreter.get_variable(&info.name)?));
        }

        let tier = if count <= self.config.medium_threshold {
            ArrayTier::Medium
        } else {
            ArrayTier::Large
        };
        Ok(VariableSummary::Array(self.array_summary(interpreter, info, tier)?))
    }

    fn array_summary(
        &self,
        interpreter: &dyn Interpreter,
        info: &VarInfo,
        tier: ArrayTier,
    ) -> Result<ArraySummary> {
        let count = info.element_count();

        let stats = numeric_vec(
            interpreter
                .evaluate(&commands::array_stats(&info.name), true)?
                .value,
        )?;
        if stats.len() != 3 {
            return Err(EngineError::RuntimeError(format!(
                "expected [min max mean] for {}, got {} values",
                info.name,
                stats.len()
            )));
        }

        let sample_len = match tier {
            ArrayTier::Medium => self.config.preview_elements,
            ArrayTier::Large => self.config.preview_elements.min(LARGE_SAMPLE_MAX),
        }
        .min(count as usize);
        let sample = if sample_len > 0 {
            numeric_vec(
                interpreter
                    .evaluate(&commands::array_sample(&info.name, sample_len), true)?
                    .value,
            )?
        } else {
            Vec::new()
        };

        Ok(ArraySummary {
            tier,
            dimensions: info.size.clone(),
            element_count: count,
            min: stats[0],
            max: stats[1],
            mean: stats[2],
            sample,
            estimated_memory_mb: count as f64 * BYTES_PER_ELEMENT / (1024.0 * 1024.0),
            note: match tier {
                ArrayTier::Medium => None,
                ArrayTier::Large => Some(TOO_LARGE_NOTE.to_string()),
            },
        })
    }

    /// Non-numeric variables: direct transfer first, stringified and
    /// truncated as the fallback
    fn summarize_opaque(
        &self,
        interpreter: &dyn Interpreter,
        info: &VarInfo,
    ) -> Result<VariableSummary> {
        if let Ok(value) = interpreter.get_variable(&info.name) {
            return Ok(VariableSummary::Full(value));
        }

        let printed = interpreter
            .evaluate(&commands::display_value(&info.name), false)?
            .printed;
        Ok(VariableSummary::Text(truncate(
            printed.trim(),
            self.config.max_string_length,
        )))
    }
}

/// Decode a numeric vector, accepting the interpreter's scalar encoding
/// for one-element results
fn numeric_vec(value: Option<Value>) -> Result<Vec<f64>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Number(n)) => Ok(vec![n.as_f64().unwrap_or(f64::NAN)]),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN))
            .collect()),
        Some(other) => Err(EngineError::RuntimeError(format!(
            "expected numeric vector, got {other}"
        ))),
    }
}

fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_length).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::fake::{self, ScriptedInterpreter};
    use serde_json::json;

    fn var(name: &str, size: [u64; 2], class: &str) -> Value {
        json!({
            "name": name,
            "size": size,
            "bytes": size[0] * size[1] * 8,
            "class": class,
        })
    }

    fn summarizer() -> WorkspaceSummarizer {
        WorkspaceSummarizer::new(WorkspaceConfig::default())
    }

    #[test]
    fn test_small_variable_transfers_in_full() {
        let listing = json!([var("v", [1, 3], "double")]);
        let interp = ScriptedInterpreter::new()
            .with_variable("v", json!([1.0, 2.0, 3.0]))
            .on("whos", move |_| fake::value(listing.clone()));

        let snapshot = summarizer().summarize(&interp).unwrap();
        match &snapshot["v"] {
            VariableSummary::Full(value) => assert_eq!(value, &json!([1.0, 2.0, 3.0])),
            other => panic!("expected full value, got {other:?}"),
        }
    }

    #[test]
    fn test_medium_variable_summarized_with_stats() {
        let listing = json!([var("m", [20, 50], "double")]);
        let interp = ScriptedInterpreter::new()
            .on("min(m", |_| fake::value(json!([0.0, 9.5, 4.7])))
            .on("reshape(m", |_| {
                fake::value(json!([0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]))
            })
            .on("whos", move |_| fake::value(listing.clone()));

        let snapshot = summarizer().summarize(&interp).unwrap();
        match &snapshot["m"] {
            VariableSummary::Array(summary) => {
                assert_eq!(summary.tier, ArrayTier::Medium);
                assert_eq!(summary.element_count, 1000);
                assert_eq!(summary.dimensions, vec![20, 50]);
                assert_eq!((summary.min, summary.max, summary.mean), (0.0, 9.5, 4.7));
                assert!(summary.sample.len() <= WorkspaceConfig::default().preview_elements);
                assert!(summary.note.is_none());
                assert!((summary.estimated_memory_mb - 1000.0 * 8.0 / 1048576.0).abs() < 1e-9);
            }
            other => panic!("expected array summary, got {other:?}"),
        }
    }

    #[test]
    fn test_large_variable_has_note_and_short_sample() {
        let listing = json!([var("huge", [1000, 1000], "double")]);
        let interp = ScriptedInterpreter::new()
            .on("min(huge", |_| fake::value(json!([-1.0, 1.0, 0.0])))
            .on("reshape(huge", |_| fake::value(json!([0.1, 0.2, 0.3, 0.4, 0.5])))
            .on("whos", move |_| fake::value(listing.clone()));

        let snapshot = summarizer().summarize(&interp).unwrap();
        match &snapshot["huge"] {
            VariableSummary::Array(summary) => {
                assert_eq!(summary.tier, ArrayTier::Large);
                assert!(summary.sample.len() <= LARGE_SAMPLE_MAX);
                assert_eq!(summary.note.as_deref(), Some(TOO_LARGE_NOTE));
            }
            other => panic!("expected array summary, got {other:?}"),
        }
    }

    #[test]
    fn test_tier_boundaries_are_inclusive() {
        let config = WorkspaceConfig::default();
        let listing = json!([
            var("at_small", [1, 100], "double"),
            var("at_medium", [100, 100], "double"),
        ]);
        let interp = ScriptedInterpreter::new()
            .with_variable("at_small", json!([0.0]))
            .on("min(", |_| fake::value(json!([0.0, 0.0, 0.0])))
            .on("reshape(", |_| fake::value(json!([0.0])))
            .on("whos", move |_| fake::value(listing.clone()));

        let snapshot = WorkspaceSummarizer::new(config).summarize(&interp).unwrap();
        assert!(matches!(snapshot["at_small"], VariableSummary::Full(_)));
        match &snapshot["at_medium"] {
            VariableSummary::Array(summary) => assert_eq!(summary.tier, ArrayTier::Medium),
            other => panic!("expected medium summary, got {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_variable_becomes_placeholder() {
        let listing = json!([var("bad", [1, 2], "double"), var("good", [1, 1], "double")]);
        let interp = ScriptedInterpreter::new()
            .with_variable("good", json!(42.0))
            .on("whos", move |_| fake::value(listing.clone()));
        // "bad" is absent from the variable store, so get_variable fails

        let snapshot = summarizer().summarize(&interp).unwrap();
        match &snapshot["bad"] {
            VariableSummary::Text(text) => {
                assert!(text.starts_with("<Error reading variable:"));
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
        assert!(matches!(snapshot["good"], VariableSummary::Full(_)));
    }

    #[test]
    fn test_non_numeric_falls_back_to_truncated_string() {
        let config = WorkspaceConfig {
            max_string_length: 8,
            ..Default::default()
        };
        let listing = json!([var("s", [1, 1], "struct")]);
        let interp = ScriptedInterpreter::new()
            .on("disp(s)", |_| fake::printed("a long struct display\n"))
            .on("whos", move |_| fake::value(listing.clone()));

        let snapshot = WorkspaceSummarizer::new(config).summarize(&interp).unwrap();
        match &snapshot["s"] {
            VariableSummary::Text(text) => assert_eq!(text, "a long s..."),
            other => panic!("expected truncated text, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_workspace_yields_empty_snapshot() {
        let interp = ScriptedInterpreter::new().on("whos", |_| fake::value(json!([])));
        assert!(summarizer().summarize(&interp).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_helper() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("0123456789ab", 10), "0123456789...");
    }
}
