//! Sequence model: an ordered, resumable program of tasks.
//!
//! A [`Sequence`] owns its tasks plus the run-state the executor drives: the
//! cursor, the loop stack, the accumulated instrument results, and the
//! lifecycle status. It optionally carries a [`Schedule`] for timed and
//! recurring invocation.
//!
//! Editing operations (`add_task`, `remove_task`, `move_task_up`,
//! `move_task_down`) are bounds-checked no-ops on an invalid index: they are
//! driven by a front-end that already validates selection, so a silent no-op
//! is preferred over an error path.
//!
//! Persistence goes through [`SequenceRecord`], written as one JSON file per
//! sequence with a [`SequenceMetadata`] block refreshed on every save.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::instrument::InstrumentRegistry;
use crate::task::{Task, TaskRecord, TaskStatus};

/// Lifecycle status of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    /// Not running. Also the post-run state after a stop or failure.
    #[default]
    Stopped,
    /// An executor currently owns this sequence.
    Running,
    /// An executor owns this sequence and is holding at the pause checkpoint.
    Paused,
    /// The last run reached the end of the task list.
    Complete,
}

/// Recurrence rule applied when a scheduled sequence fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Recurrence {
    /// One-shot: the schedule is cleared after triggering.
    #[default]
    None,
    /// Re-arm one day later.
    Daily,
    /// Re-arm seven days later.
    Weekly,
    /// Re-arm one calendar month later.
    Monthly,
    /// Reserved for externally-managed rules; treated as one-shot by
    /// `check_due`.
    Custom,
}

/// A pending timed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Next time the sequence is due to run.
    pub next_run: DateTime<Utc>,
    /// Rule for recomputing `next_run` after it fires.
    pub recurrence: Recurrence,
}

/// One active loop nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFrame {
    /// Index of the `LoopStart` task that opened this loop.
    pub start_index: usize,
    /// Completed iterations so far.
    pub iteration: u32,
    /// Configured iteration count.
    pub max_iterations: u32,
}

/// An ordered program of tasks with its own run-state.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    /// Name, unique across the store.
    pub name: String,
    /// The program.
    pub tasks: Vec<Task>,
    /// Index of the current task; always within `[0, tasks.len()]`.
    pub cursor: usize,
    /// Lifecycle status. `Running` only while an executor exclusively owns
    /// this sequence.
    pub status: SequenceStatus,
    /// Active loop frames; top of the stack is the innermost loop. Each
    /// frame's `start_index` points at a `LoopStart` task in this sequence.
    pub loop_stack: Vec<LoopFrame>,
    /// Instrument results accumulated across a run, keyed by task name.
    pub results: HashMap<String, Value>,
    /// Optional timed invocation.
    pub schedule: Option<Schedule>,
}

impl Sequence {
    /// Create an empty sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a task.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Remove the task at `index`. No-op if out of range.
    pub fn remove_task(&mut self, index: usize) {
        if index < self.tasks.len() {
            self.tasks.remove(index);
        }
    }

    /// Swap the task at `index` with its predecessor. No-op at the top or
    /// out of range.
    pub fn move_task_up(&mut self, index: usize) {
        if index > 0 && index < self.tasks.len() {
            self.tasks.swap(index, index - 1);
        }
    }

    /// Swap the task at `index` with its successor. No-op at the end or out
    /// of range.
    pub fn move_task_down(&mut self, index: usize) {
        if index + 1 < self.tasks.len() {
            self.tasks.swap(index, index + 1);
        }
    }

    /// Reset run-state for a fresh execution: cursor to 0, status to
    /// `Stopped`, loop stack and results cleared, every task back to
    /// `Pending` with no result.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.status = SequenceStatus::Stopped;
        self.loop_stack.clear();
        self.results.clear();
        for task in &mut self.tasks {
            task.status = TaskStatus::Pending;
            task.last_result = None;
        }
    }

    /// Convert to a portable record. Run-state is not persisted; the
    /// metadata block is stamped by the store on save.
    pub fn to_record(&self) -> SequenceRecord {
        SequenceRecord {
            name: self.name.clone(),
            tasks: self.tasks.iter().map(Task::to_record).collect(),
            scheduled_time: self.schedule.map(|s| s.next_run),
            recurrence_type: self.schedule.map(|s| s.recurrence),
            metadata: None,
        }
    }

    /// Rebuild a sequence from a persisted record, resolving task targets
    /// against the registry. Missing targets load as `None`.
    pub fn from_record(record: SequenceRecord, registry: &InstrumentRegistry) -> Self {
        let tasks = record
            .tasks
            .into_iter()
            .map(|task| Task::from_record(task, registry))
            .collect();
        let schedule = record.scheduled_time.map(|next_run| Schedule {
            next_run,
            recurrence: record.recurrence_type.unwrap_or_default(),
        });
        Self {
            name: record.name,
            tasks,
            schedule,
            ..Self::default()
        }
    }
}

/// Portable on-disk form of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// Sequence name.
    pub name: String,
    /// Task records in program order.
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    /// Next scheduled run time (ISO-8601), or null.
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Recurrence rule, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_type: Option<Recurrence>,
    /// Modification metadata, refreshed by the store on every save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SequenceMetadata>,
}

/// Modification metadata written alongside each saved sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    /// When the file was written.
    pub last_modified: DateTime<Utc>,
    /// Operator from the store's configuration.
    pub modified_by: String,
    /// Application version from the store's configuration.
    pub app_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn three_tasks() -> Sequence {
        let mut seq = Sequence::new("cal run");
        seq.add_task(Task::new("a", TaskKind::Delay));
        seq.add_task(Task::new("b", TaskKind::Delay));
        seq.add_task(Task::new("c", TaskKind::Delay));
        seq
    }

    #[test]
    fn test_editing_ops_bounds_checked() {
        let mut seq = three_tasks();

        seq.move_task_up(0); // no-op
        seq.move_task_down(2); // no-op
        seq.remove_task(10); // no-op
        assert_eq!(seq.tasks.len(), 3);
        assert_eq!(seq.tasks[0].name, "a");

        seq.move_task_down(0);
        assert_eq!(seq.tasks[0].name, "b");
        seq.move_task_up(2);
        assert_eq!(seq.tasks[1].name, "c");
        seq.remove_task(0);
        assert_eq!(seq.tasks.len(), 2);
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut seq = three_tasks();
        seq.cursor = 2;
        seq.status = SequenceStatus::Complete;
        seq.loop_stack.push(LoopFrame {
            start_index: 0,
            iteration: 1,
            max_iterations: 3,
        });
        seq.results.insert("a".to_string(), json!(1));
        seq.tasks[0].status = TaskStatus::Complete;
        seq.tasks[0].last_result = Some(json!("done"));

        seq.reset();

        assert_eq!(seq.cursor, 0);
        assert_eq!(seq.status, SequenceStatus::Stopped);
        assert!(seq.loop_stack.is_empty());
        assert!(seq.results.is_empty());
        assert_eq!(seq.tasks[0].status, TaskStatus::Pending);
        assert!(seq.tasks[0].last_result.is_none());
    }

    #[test]
    fn test_record_round_trip_with_schedule() {
        let mut seq = three_tasks();
        seq.schedule = Some(Schedule {
            next_run: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            recurrence: Recurrence::Weekly,
        });

        let record = seq.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let decoded: SequenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);

        let rebuilt = Sequence::from_record(decoded, &InstrumentRegistry::new());
        assert_eq!(rebuilt.tasks.len(), 3);
        assert_eq!(rebuilt.schedule, seq.schedule);
        assert_eq!(rebuilt.status, SequenceStatus::Stopped);
    }

    #[test]
    fn test_recurrence_wire_names() {
        assert_eq!(
            serde_json::to_string(&Recurrence::Monthly).unwrap(),
            "\"Monthly\""
        );
        let rec: Recurrence = serde_json::from_str("\"Daily\"").unwrap();
        assert_eq!(rec, Recurrence::Daily);
    }
}
