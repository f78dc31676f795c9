//! Sequence executor: the single-threaded interpreter for one run.
//!
//! A [`SequenceExecutor`] owns one sequence exclusively for the duration of a
//! run and interprets its tasks on its own tokio task. States follow
//! `Running -> Paused -> Running -> {Complete | Stopped}`; `Complete` and
//! `Stopped` are terminal for the run instance, and executors are never
//! reused across runs.
//!
//! # Checkpoints
//!
//! Pause and stop are cooperative. Control calls only set the atomic flags on
//! [`ExecutorControl`]; the run loop observes them at checkpoint boundaries
//! (top of each iteration) and reacts there. An in-flight instrument call is
//! never interrupted; its result is still recorded before a stop takes
//! effect. Pausing polls the flags at a bounded interval rather than
//! blocking, trading bounded latency for simplicity.
//!
//! # Failure policy
//!
//! A failed task is fail-fast by default: status goes to `Error`, a task
//! error event is emitted, and the run stops. A task with a truthy
//! `continue_on_error` parameter instead lets the run proceed to the next
//! task. Loop-end-without-loop-start and malformed conditions are soft: they
//! record a warning result or evaluate to `false` and never abort a run.
//!
//! Lifecycle events are emitted over a `tokio::sync::broadcast` channel so
//! any number of observers (GUI, CLI, tests) can subscribe independently.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::condition;
use crate::error::SeqError;
use crate::sequence::{LoopFrame, Sequence, SequenceStatus};
use crate::task::{Task, TaskKind, TaskStatus};

/// Lifecycle events emitted during a run, consumed by observers.
#[derive(Debug, Clone)]
pub enum SequenceEvent {
    /// A task began executing.
    TaskStarted {
        /// Owning sequence name.
        sequence: String,
        /// Task index.
        index: usize,
    },
    /// A task finished, with its recorded result.
    TaskCompleted {
        /// Owning sequence name.
        sequence: String,
        /// Task index.
        index: usize,
        /// Recorded result value.
        result: Value,
    },
    /// A task failed.
    TaskError {
        /// Owning sequence name.
        sequence: String,
        /// Task index.
        index: usize,
        /// Failure message.
        message: String,
    },
    /// The run reached the end of the task list.
    SequenceCompleted {
        /// Sequence name.
        sequence: String,
    },
    /// The run is holding at the pause checkpoint.
    SequencePaused {
        /// Sequence name.
        sequence: String,
    },
    /// The run stopped before completing.
    SequenceStopped {
        /// Sequence name.
        sequence: String,
    },
}

/// Atomic pause/stop flags shared between a run and its controllers.
///
/// The flags are the only state written across threads without a lock; the
/// executor polls them cooperatively at checkpoint boundaries.
#[derive(Debug, Default)]
pub struct ExecutorControl {
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl ExecutorControl {
    /// Request a pause at the next checkpoint.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Release a pause.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Request a stop at the next checkpoint.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a pause is requested.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether a stop is requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// What one task dispatch decided about control flow.
enum StepOutcome {
    /// Record the result, mark the task complete, advance the cursor.
    Advance(Value),
    /// Record the result and redirect the cursor without the normal
    /// complete-and-advance step (loop repeat, condition else branch).
    Jump { to: usize, result: Value },
    /// The task failed with this message.
    Failed(String),
}

/// Runs one sequence to completion, pause, or stop.
pub struct SequenceExecutor {
    sequence: Arc<Mutex<Sequence>>,
    control: Arc<ExecutorControl>,
    events: broadcast::Sender<SequenceEvent>,
    poll_interval: Duration,
}

impl SequenceExecutor {
    /// Create an executor for one run of `sequence`. `poll_interval` bounds
    /// the latency of pause/stop observation.
    pub fn new(
        sequence: Arc<Mutex<Sequence>>,
        events: broadcast::Sender<SequenceEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sequence,
            control: Arc::new(ExecutorControl::default()),
            events,
            poll_interval,
        }
    }

    /// Shared handle to this run's pause/stop flags.
    pub fn control(&self) -> Arc<ExecutorControl> {
        Arc::clone(&self.control)
    }

    fn lock(&self) -> MutexGuard<'_, Sequence> {
        // A poisoned lock only means a prior panic mid-update; the sequence
        // state is still displayable and the run is ending anyway.
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SequenceEvent) {
        let _ = self.events.send(event);
    }

    /// Execute the sequence. Consumes the executor; run instances are not
    /// reused.
    pub async fn run(self) {
        let run_id = Uuid::new_v4();
        let name = {
            let mut seq = self.lock();
            seq.reset();
            seq.status = SequenceStatus::Running;
            seq.name.clone()
        };
        info!("sequence '{}' run {} started", name, run_id);

        loop {
            // Pause checkpoint: hold here, re-checking at a bounded interval.
            while self.control.is_paused() && !self.control.is_stopped() {
                self.lock().status = SequenceStatus::Paused;
                self.emit(SequenceEvent::SequencePaused {
                    sequence: name.clone(),
                });
                sleep(self.poll_interval).await;
            }

            // Stop checkpoint.
            if self.control.is_stopped() {
                break;
            }

            let (index, task) = {
                let mut seq = self.lock();
                if seq.cursor >= seq.tasks.len() {
                    break;
                }
                seq.status = SequenceStatus::Running;
                (seq.cursor, seq.tasks[seq.cursor].clone())
            };

            // Pre-execution delay, applied on every visit including loop
            // repeats. Suspends only this executor's task.
            if task.pre_delay_ms > 0 {
                sleep(Duration::from_millis(task.pre_delay_ms)).await;
            }

            self.lock().tasks[index].status = TaskStatus::Running;
            self.emit(SequenceEvent::TaskStarted {
                sequence: name.clone(),
                index,
            });
            debug!("sequence '{}' run {}: task {} '{}'", name, run_id, index, task.name);

            match self.dispatch(index, &task).await {
                StepOutcome::Advance(result) => {
                    {
                        let mut seq = self.lock();
                        seq.tasks[index].status = TaskStatus::Complete;
                        seq.tasks[index].last_result = Some(result.clone());
                        seq.cursor += 1;
                    }
                    self.emit(SequenceEvent::TaskCompleted {
                        sequence: name.clone(),
                        index,
                        result,
                    });
                }
                StepOutcome::Jump { to, result } => {
                    {
                        let mut seq = self.lock();
                        seq.tasks[index].last_result = Some(result.clone());
                        seq.cursor = to;
                    }
                    self.emit(SequenceEvent::TaskCompleted {
                        sequence: name.clone(),
                        index,
                        result,
                    });
                }
                StepOutcome::Failed(message) => {
                    let continue_on_error = task
                        .parameters
                        .get("continue_on_error")
                        .map(is_truthy)
                        .unwrap_or(false);
                    {
                        let mut seq = self.lock();
                        seq.tasks[index].status = TaskStatus::Error;
                        seq.tasks[index].last_result =
                            Some(Value::String(format!("Error: {message}")));
                    }
                    self.emit(SequenceEvent::TaskError {
                        sequence: name.clone(),
                        index,
                        message: message.clone(),
                    });
                    if continue_on_error {
                        warn!(
                            "sequence '{}' task {} failed, continuing: {}",
                            name, index, message
                        );
                        self.lock().cursor += 1;
                    } else {
                        warn!("sequence '{}' task {} failed, stopping: {}", name, index, message);
                        self.lock().status = SequenceStatus::Stopped;
                        self.control.stop();
                        break;
                    }
                }
            }
        }

        let completed = {
            let mut seq = self.lock();
            let completed = seq.cursor >= seq.tasks.len() && !self.control.is_stopped();
            seq.status = if completed {
                SequenceStatus::Complete
            } else {
                SequenceStatus::Stopped
            };
            completed
        };
        if completed {
            info!("sequence '{}' run {} completed", name, run_id);
            self.emit(SequenceEvent::SequenceCompleted { sequence: name });
        } else {
            info!("sequence '{}' run {} stopped", name, run_id);
            self.emit(SequenceEvent::SequenceStopped { sequence: name });
        }
    }

    async fn dispatch(&self, index: usize, task: &Task) -> StepOutcome {
        match &task.kind {
            TaskKind::Instrument => self.dispatch_instrument(task).await,
            TaskKind::Delay => {
                let seconds = task
                    .parameters
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0);
                sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
                StepOutcome::Advance(Value::String(format!("Delayed {seconds} seconds")))
            }
            TaskKind::LoopStart => {
                let mut seq = self.lock();
                // A jump from the matching loop end lands back on this task;
                // the active frame is reused, not pushed again.
                let reentry = seq
                    .loop_stack
                    .last()
                    .is_some_and(|frame| frame.start_index == index);
                if !reentry {
                    seq.loop_stack.push(LoopFrame {
                        start_index: index,
                        iteration: 0,
                        max_iterations: task.repeat,
                    });
                }
                StepOutcome::Advance(Value::String(format!(
                    "Loop started ({} iterations)",
                    task.repeat
                )))
            }
            TaskKind::LoopEnd => {
                let mut seq = self.lock();
                if seq.loop_stack.is_empty() {
                    warn!("loop end '{}' reached with an empty loop stack", task.name);
                    return StepOutcome::Advance(Value::String(
                        "Warning: loop end without matching start".to_string(),
                    ));
                }
                let top = seq.loop_stack.len() - 1;
                seq.loop_stack[top].iteration += 1;
                let frame = seq.loop_stack[top];
                if frame.iteration < frame.max_iterations {
                    // Iterations remain: the counter was rewritten in place;
                    // jump back to the loop start.
                    StepOutcome::Jump {
                        to: frame.start_index,
                        result: Value::String(format!(
                            "Loop iteration {}/{}",
                            frame.iteration + 1,
                            frame.max_iterations
                        )),
                    }
                } else {
                    seq.loop_stack.pop();
                    StepOutcome::Advance(Value::String("Loop complete".to_string()))
                }
            }
            TaskKind::Condition => {
                let seq = self.lock();
                let verdict = task
                    .condition
                    .as_deref()
                    .map(|expr| condition::evaluate(expr, &seq.results))
                    .unwrap_or(false);
                let result = Value::String(format!("Condition evaluated to {verdict}"));
                if !verdict {
                    if let Some(to) = else_index(&task.parameters) {
                        if to < seq.tasks.len() {
                            return StepOutcome::Jump { to, result };
                        }
                    }
                }
                StepOutcome::Advance(result)
            }
            TaskKind::Unknown(raw) => {
                warn!("unknown task type '{}' for '{}'", raw, task.name);
                StepOutcome::Advance(Value::String(format!("Unknown task type: {raw}")))
            }
        }
    }

    async fn dispatch_instrument(&self, task: &Task) -> StepOutcome {
        let (Some(target), Some(function)) = (task.target.as_ref(), task.function.as_deref())
        else {
            return StepOutcome::Failed(
                SeqError::InvalidTask(format!(
                    "instrument task '{}' requires a target and function",
                    task.name
                ))
                .to_string(),
            );
        };

        // Scoped parameter override: snapshot, install the task's
        // parameters, invoke, restore before the result is examined. The
        // restore happens on the failure path too.
        let saved = target.parameters();
        target.replace_parameters(task.parameters.clone());
        let call = target.invoke(function).await;
        target.replace_parameters(saved);

        match call {
            Ok(result) => {
                self.lock().results.insert(task.name.clone(), result.clone());
                StepOutcome::Advance(result)
            }
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }
}

/// Python-style truthiness for flag parameters such as `continue_on_error`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Extract the `else_index` jump target, accepting both numeric and string
/// encodings.
fn else_index(parameters: &std::collections::HashMap<String, Value>) -> Option<usize> {
    match parameters.get("else_index")? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn run_sequence(seq: Sequence) -> Arc<Mutex<Sequence>> {
        let shared = Arc::new(Mutex::new(seq));
        let (events, _) = broadcast::channel(64);
        let executor =
            SequenceExecutor::new(Arc::clone(&shared), events, Duration::from_millis(10));
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(executor.run());
        shared
    }

    #[test]
    fn test_empty_sequence_completes_immediately() {
        let shared = run_sequence(Sequence::new("empty"));
        let seq = shared.lock().unwrap();
        assert_eq!(seq.status, SequenceStatus::Complete);
        assert!(seq.results.is_empty());
    }

    #[test]
    fn test_unknown_task_type_is_non_fatal() {
        let mut seq = Sequence::new("odd");
        seq.add_task(Task::new(
            "mystery",
            TaskKind::Unknown("teleport".to_string()),
        ));
        let shared = run_sequence(seq);
        let seq = shared.lock().unwrap();
        assert_eq!(seq.status, SequenceStatus::Complete);
        assert_eq!(
            seq.tasks[0].last_result,
            Some(json!("Unknown task type: teleport"))
        );
    }

    #[test]
    fn test_loop_end_without_start_is_warning() {
        let mut seq = Sequence::new("dangling");
        seq.add_task(Task::new("end", TaskKind::LoopEnd));
        let shared = run_sequence(seq);
        let seq = shared.lock().unwrap();
        assert_eq!(seq.status, SequenceStatus::Complete);
        assert_eq!(
            seq.tasks[0].last_result,
            Some(json!("Warning: loop end without matching start"))
        );
    }

    #[test]
    fn test_invalid_instrument_task_stops_run() {
        let mut seq = Sequence::new("broken");
        seq.add_task(Task::new("no target", TaskKind::Instrument));
        seq.add_task(Task::new("never reached", TaskKind::Delay).with_parameter("seconds", json!(0)));
        let shared = run_sequence(seq);
        let seq = shared.lock().unwrap();
        assert_eq!(seq.status, SequenceStatus::Stopped);
        assert_eq!(seq.tasks[0].status, TaskStatus::Error);
        assert_eq!(seq.tasks[1].status, TaskStatus::Pending);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_else_index_parsing() {
        let params = HashMap::from([("else_index".to_string(), json!(3))]);
        assert_eq!(else_index(&params), Some(3));

        let params = HashMap::from([("else_index".to_string(), json!("0"))]);
        assert_eq!(else_index(&params), Some(0));

        let params = HashMap::from([("else_index".to_string(), json!(null))]);
        assert_eq!(else_index(&params), None);

        assert_eq!(else_index(&HashMap::new()), None);
    }
}
