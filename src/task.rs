//! Task model: one step of an experiment sequence.
//!
//! A [`Task`] is immutable once built, apart from its per-run `status` and
//! `last_result` fields, which the executor writes and `Sequence::reset`
//! clears. The instrument target is a borrowed reference (`Arc<dyn
//! Instrument>`); tasks never own hardware.
//!
//! Persistence goes through [`TaskRecord`], a portable serde struct with the
//! on-disk field names (`name, task_type, target, function, parameters,
//! delay, repeat, condition`). Deserialization takes an instrument resolver;
//! a stored target name that no longer resolves becomes `None` rather than
//! failing the load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::instrument::{Instrument, InstrumentRegistry};

/// The kind of work a task performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Call a function on a target instrument.
    Instrument,
    /// Suspend for a number of wall-clock seconds.
    Delay,
    /// Open a loop repeated `repeat` times.
    LoopStart,
    /// Close the innermost loop.
    LoopEnd,
    /// Branch on a `<result key> == <literal>` expression.
    Condition,
    /// Catch-all for task types this engine does not recognize. The raw wire
    /// string is preserved so the run result can name it; executing one
    /// records an informational result and continues (non-fatal).
    #[serde(untagged)]
    Unknown(String),
}

/// Per-run execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet reached in this run.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished without error.
    Complete,
    /// Failed during dispatch.
    Error,
}

/// One step of a sequence.
#[derive(Clone)]
pub struct Task {
    /// Display/reference name. Instrument task results are accumulated into
    /// the sequence `results` map under this name.
    pub name: String,
    /// What this task does.
    pub kind: TaskKind,
    /// Borrowed instrument reference, for `Instrument` tasks.
    pub target: Option<Arc<dyn Instrument>>,
    /// Function name to invoke on the target, for `Instrument` tasks.
    pub function: Option<String>,
    /// Kind-dependent parameters (instrument call arguments, delay seconds,
    /// `else_index`, `continue_on_error`, ...).
    pub parameters: HashMap<String, Value>,
    /// Wait applied before executing this task, every time it is reached,
    /// in milliseconds.
    pub pre_delay_ms: u64,
    /// Iteration count, used only by `LoopStart`.
    pub repeat: u32,
    /// Equality expression `<result key> == <literal>`, used only by
    /// `Condition`.
    pub condition: Option<String>,
    /// Per-run status, reset to `Pending` by `Sequence::reset`.
    pub status: TaskStatus,
    /// Result of the most recent execution, reset by `Sequence::reset`.
    pub last_result: Option<Value>,
}

impl Task {
    /// Create a task of the given kind with no target, parameters, delay, or
    /// condition.
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            target: None,
            function: None,
            parameters: HashMap::new(),
            pre_delay_ms: 0,
            repeat: 1,
            condition: None,
            status: TaskStatus::Pending,
            last_result: None,
        }
    }

    /// Set the instrument target and function name.
    pub fn with_call(mut self, target: Arc<dyn Instrument>, function: &str) -> Self {
        self.target = Some(target);
        self.function = Some(function.to_string());
        self
    }

    /// Insert one parameter.
    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Set the pre-execution delay in milliseconds.
    pub fn with_pre_delay_ms(mut self, delay_ms: u64) -> Self {
        self.pre_delay_ms = delay_ms;
        self
    }

    /// Set the loop iteration count (`LoopStart` only).
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the condition expression (`Condition` only).
    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    /// Convert to a portable record for persistence. The target is stored by
    /// instrument name.
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            name: self.name.clone(),
            task_type: self.kind.clone(),
            target: self.target.as_ref().map(|t| t.name().to_string()),
            function: self.function.clone(),
            parameters: self.parameters.clone(),
            delay: self.pre_delay_ms,
            repeat: self.repeat,
            condition: self.condition.clone(),
        }
    }

    /// Rebuild a task from a persisted record, resolving the stored target
    /// name against the registry. An unresolvable target becomes `None`; the
    /// task loads anyway and fails at dispatch time if executed.
    pub fn from_record(record: TaskRecord, registry: &InstrumentRegistry) -> Self {
        let target = record.target.as_deref().and_then(|name| registry.get(name));
        Self {
            name: record.name,
            kind: record.task_type,
            target,
            function: record.function,
            parameters: record.parameters,
            pre_delay_ms: record.delay,
            repeat: record.repeat,
            condition: record.condition,
            status: TaskStatus::Pending,
            last_result: None,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target.as_ref().map(|t| t.name().to_string()))
            .field("function", &self.function)
            .field("parameters", &self.parameters)
            .field("pre_delay_ms", &self.pre_delay_ms)
            .field("repeat", &self.repeat)
            .field("condition", &self.condition)
            .field("status", &self.status)
            .field("last_result", &self.last_result)
            .finish()
    }
}

/// Portable on-disk form of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task name.
    pub name: String,
    /// Task kind, stored as e.g. `"instrument"` or `"loop_start"`.
    pub task_type: TaskKind,
    /// Target instrument name, or null.
    #[serde(default)]
    pub target: Option<String>,
    /// Function name, or null.
    #[serde(default)]
    pub function: Option<String>,
    /// Kind-dependent parameters.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Pre-execution delay in milliseconds.
    #[serde(default)]
    pub delay: u64,
    /// Loop iteration count.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Condition expression, or null.
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_repeat() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockInstrument;
    use serde_json::json;

    #[test]
    fn test_record_round_trip_with_resolver() {
        let mut registry = InstrumentRegistry::new();
        registry.register(Arc::new(MockInstrument::new("laser")));

        let laser = registry.get("laser").unwrap();
        let task = Task::new("warm up", TaskKind::Instrument)
            .with_call(laser, "power_on")
            .with_parameter("level", json!(0.5))
            .with_pre_delay_ms(250);

        let record = task.to_record();
        assert_eq!(record.target.as_deref(), Some("laser"));

        let rebuilt = Task::from_record(record.clone(), &registry);
        assert_eq!(rebuilt.name, "warm up");
        assert!(rebuilt.target.is_some());
        assert_eq!(rebuilt.to_record(), record);
    }

    #[test]
    fn test_missing_target_resolves_to_none() {
        let registry = InstrumentRegistry::new();
        let record = TaskRecord {
            name: "orphan".to_string(),
            task_type: TaskKind::Instrument,
            target: Some("gone".to_string()),
            function: Some("read".to_string()),
            parameters: HashMap::new(),
            delay: 0,
            repeat: 1,
            condition: None,
        };

        let task = Task::from_record(record, &registry);
        assert!(task.target.is_none());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskKind::LoopStart).unwrap(),
            "\"loop_start\""
        );
        let kind: TaskKind = serde_json::from_str("\"condition\"").unwrap();
        assert_eq!(kind, TaskKind::Condition);
    }

    #[test]
    fn test_unknown_kind_keeps_wire_string() {
        let kind: TaskKind = serde_json::from_str("\"teleport\"").unwrap();
        assert_eq!(kind, TaskKind::Unknown("teleport".to_string()));
        // The raw string round-trips back onto the wire unchanged.
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"teleport\"");
    }

    #[test]
    fn test_record_defaults() {
        let record: TaskRecord =
            serde_json::from_str(r#"{"name": "t", "task_type": "delay"}"#).unwrap();
        assert_eq!(record.repeat, 1);
        assert_eq!(record.delay, 0);
        assert!(record.parameters.is_empty());
    }
}
