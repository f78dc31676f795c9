//! Sequence store: ownership, persistence, and run lifecycle coordination.
//!
//! The [`SequenceStore`] owns the collection of sequences, reads and writes
//! one JSON file per sequence, and mediates every executor lifecycle
//! transition. Its invariant is at-most-one live executor per sequence:
//! `run` stops and joins any prior executor for the same sequence before
//! spawning a new one.
//!
//! Persistence failures never escape the store as panics or unhandled
//! faults; they come back as `AppResult` errors, and individually corrupt
//! sequence files are skipped during `load` with an error log rather than
//! aborting the whole load.
//!
//! `check_due` is the scheduling entry point. It must be driven by an
//! external timer (see the `scheduler` module) and never from an executor's
//! own task, or a paused sequence could deadlock waiting on its own restart.

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::error::{AppResult, SeqError};
use crate::executor::{ExecutorControl, SequenceExecutor, SequenceEvent};
use crate::instrument::InstrumentRegistry;
use crate::sequence::{Recurrence, Sequence, SequenceMetadata, SequenceRecord, SequenceStatus};

/// Capacity of the lifecycle event channel. Lagging observers drop old
/// events rather than stalling executors.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Explicit store configuration, passed in at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one JSON file per sequence.
    pub sequence_dir: PathBuf,
    /// Operator name stamped into saved metadata.
    pub operator: String,
    /// Application version stamped into saved metadata.
    pub app_version: String,
    /// Pause/stop flag poll interval handed to executors.
    pub pause_poll: Duration,
}

impl StoreConfig {
    /// Derive a store configuration from the application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sequence_dir: settings.sequences.dir.clone(),
            operator: settings.application.operator.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            pause_poll: settings.pause_poll(),
        }
    }
}

struct ExecutorHandle {
    control: Arc<ExecutorControl>,
    join: JoinHandle<()>,
}

/// Owns sequences and coordinates their executors.
pub struct SequenceStore {
    config: StoreConfig,
    sequences: HashMap<String, Arc<Mutex<Sequence>>>,
    executors: HashMap<String, ExecutorHandle>,
    events: broadcast::Sender<SequenceEvent>,
}

impl SequenceStore {
    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            sequences: HashMap::new(),
            executors: HashMap::new(),
            events,
        }
    }

    /// Subscribe to lifecycle events from every executor this store spawns.
    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.events.subscribe()
    }

    /// Registered sequence names.
    pub fn names(&self) -> Vec<String> {
        self.sequences.keys().cloned().collect()
    }

    /// Shared handle to a sequence, for observers.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<Sequence>>> {
        self.sequences.get(name).cloned()
    }

    /// Add a sequence. Rejects duplicate names.
    pub fn add_sequence(&mut self, sequence: Sequence) -> bool {
        if self.sequences.contains_key(&sequence.name) {
            return false;
        }
        self.sequences
            .insert(sequence.name.clone(), Arc::new(Mutex::new(sequence)));
        true
    }

    /// Remove a sequence, stopping and joining its executor first if one is
    /// alive. Returns whether a sequence was removed.
    pub async fn remove_sequence(&mut self, name: &str) -> bool {
        self.stop(name).await;
        self.sequences.remove(name).is_some()
    }

    /// Load every persisted sequence file from the sequence directory,
    /// resolving task targets against `registry`. Corrupt files are skipped
    /// with an error log. Returns the number of sequences loaded.
    pub fn load(&mut self, registry: &InstrumentRegistry) -> AppResult<usize> {
        std::fs::create_dir_all(&self.config.sequence_dir)?;

        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.config.sequence_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::load_one(&path, registry) {
                Ok(sequence) => {
                    self.sequences
                        .insert(sequence.name.clone(), Arc::new(Mutex::new(sequence)));
                    loaded += 1;
                }
                Err(err) => {
                    error!("skipping sequence file {}: {}", path.display(), err);
                }
            }
        }
        debug!("loaded {} sequences from {}", loaded, self.config.sequence_dir.display());
        Ok(loaded)
    }

    fn load_one(path: &std::path::Path, registry: &InstrumentRegistry) -> AppResult<Sequence> {
        let contents = std::fs::read_to_string(path)?;
        let record: SequenceRecord = serde_json::from_str(&contents)?;
        Ok(Sequence::from_record(record, registry))
    }

    /// Write every sequence to its own file, refreshing the metadata stamp.
    pub fn save(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.config.sequence_dir)?;

        for shared in self.sequences.values() {
            let mut record = lock(shared).to_record();
            record.metadata = Some(SequenceMetadata {
                last_modified: Utc::now(),
                modified_by: self.config.operator.clone(),
                app_version: self.config.app_version.clone(),
            });
            let path = self.sequence_path(&record.name);
            let contents = serde_json::to_string_pretty(&record)?;
            std::fs::write(&path, contents)?;
        }
        debug!("saved {} sequences to {}", self.sequences.len(), self.config.sequence_dir.display());
        Ok(())
    }

    /// File path for a sequence: the name with spaces replaced by
    /// underscores, under the sequence directory.
    pub fn sequence_path(&self, name: &str) -> PathBuf {
        self.config
            .sequence_dir
            .join(format!("{}.json", name.replace(' ', "_")))
    }

    /// Start a run of the named sequence, stopping and joining any prior
    /// executor for it first.
    pub async fn run(&mut self, name: &str) -> AppResult<()> {
        let sequence = self
            .sequences
            .get(name)
            .cloned()
            .ok_or_else(|| SeqError::UnknownSequence(name.to_string()))?;

        // At-most-one executor per sequence.
        if let Some(handle) = self.executors.remove(name) {
            handle.control.stop();
            let _ = handle.join.await;
        }

        let executor =
            SequenceExecutor::new(sequence, self.events.clone(), self.config.pause_poll);
        let control = executor.control();
        let join = tokio::spawn(executor.run());
        self.executors
            .insert(name.to_string(), ExecutorHandle { control, join });
        info!("started sequence '{}'", name);
        Ok(())
    }

    /// Pause the named sequence's live executor. Returns `false` if no
    /// executor is alive or it is already paused.
    pub fn pause(&self, name: &str) -> bool {
        match self.executors.get(name) {
            Some(handle) if !handle.join.is_finished() && !handle.control.is_paused() => {
                handle.control.pause();
                true
            }
            _ => false,
        }
    }

    /// Resume the named sequence's paused executor. Returns `false` if no
    /// executor is alive or it is not paused.
    pub fn resume(&self, name: &str) -> bool {
        match self.executors.get(name) {
            Some(handle) if !handle.join.is_finished() && handle.control.is_paused() => {
                handle.control.resume();
                true
            }
            _ => false,
        }
    }

    /// Stop the named sequence's executor and wait for it to finish.
    /// Returns whether a live executor was stopped.
    pub async fn stop(&mut self, name: &str) -> bool {
        match self.executors.remove(name) {
            Some(handle) => {
                let alive = !handle.join.is_finished();
                handle.control.stop();
                let _ = handle.join.await;
                alive
            }
            None => false,
        }
    }

    /// Trigger every stopped sequence whose schedule is due at `now`,
    /// recomputing or clearing its schedule per the recurrence rule.
    ///
    /// Driven by an external timer task; never call this from an executor.
    pub async fn check_due(&mut self, now: DateTime<Utc>) {
        let mut due = Vec::new();
        for (name, shared) in &self.sequences {
            let mut seq = lock(shared);
            if seq.status != SequenceStatus::Stopped {
                continue;
            }
            let Some(schedule) = seq.schedule else {
                continue;
            };
            if schedule.next_run > now {
                continue;
            }
            seq.schedule = match schedule.recurrence {
                Recurrence::Daily => Some(crate::sequence::Schedule {
                    next_run: schedule.next_run + ChronoDuration::days(1),
                    ..schedule
                }),
                Recurrence::Weekly => Some(crate::sequence::Schedule {
                    next_run: schedule.next_run + ChronoDuration::days(7),
                    ..schedule
                }),
                Recurrence::Monthly => Some(crate::sequence::Schedule {
                    next_run: schedule.next_run + Months::new(1),
                    ..schedule
                }),
                Recurrence::None | Recurrence::Custom => None,
            };
            due.push(name.clone());
        }

        for name in due {
            info!("schedule due for sequence '{}'", name);
            if let Err(err) = self.run(&name).await {
                error!("scheduled run of '{}' failed to start: {}", name, err);
            }
        }
    }
}

fn lock(shared: &Arc<Mutex<Sequence>>) -> MutexGuard<'_, Sequence> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Schedule;
    use chrono::TimeZone;

    fn store() -> SequenceStore {
        SequenceStore::new(StoreConfig {
            sequence_dir: PathBuf::from("sequences"),
            operator: "tester".to_string(),
            app_version: "0.0.0".to_string(),
            pause_poll: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_add_rejects_duplicate_names() {
        let mut store = store();
        assert!(store.add_sequence(Sequence::new("cal")));
        assert!(!store.add_sequence(Sequence::new("cal")));
        assert_eq!(store.names(), vec!["cal".to_string()]);
    }

    #[test]
    fn test_sequence_path_replaces_spaces() {
        let store = store();
        assert_eq!(
            store.sequence_path("warm up run"),
            PathBuf::from("sequences/warm_up_run.json")
        );
    }

    #[test]
    fn test_pause_without_executor_is_noop() {
        let store = store();
        assert!(!store.pause("absent"));
        assert!(!store.resume("absent"));
    }

    #[tokio::test]
    async fn test_run_unknown_sequence_errors() {
        let mut store = store();
        assert!(store.run("absent").await.is_err());
    }

    #[tokio::test]
    async fn test_check_due_daily_advances_24h() {
        let mut store = store();
        let mut seq = Sequence::new("nightly");
        let due = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        seq.schedule = Some(Schedule {
            next_run: due,
            recurrence: Recurrence::Daily,
        });
        store.add_sequence(seq);

        store.check_due(due + ChronoDuration::minutes(5)).await;

        let shared = store.get("nightly").unwrap();
        // The run was triggered; wait for the (empty) sequence to finish.
        store.stop("nightly").await;
        let seq = shared.lock().unwrap();
        assert_eq!(
            seq.schedule.unwrap().next_run,
            due + ChronoDuration::days(1)
        );
    }

    #[tokio::test]
    async fn test_check_due_weekly_advances_7d() {
        let mut store = store();
        let mut seq = Sequence::new("weekly cal");
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        seq.schedule = Some(Schedule {
            next_run: due,
            recurrence: Recurrence::Weekly,
        });
        store.add_sequence(seq);

        store.check_due(due).await;
        store.stop("weekly cal").await;

        let shared = store.get("weekly cal").unwrap();
        assert_eq!(
            shared.lock().unwrap().schedule.unwrap().next_run,
            due + ChronoDuration::days(7)
        );
    }

    #[tokio::test]
    async fn test_check_due_monthly_clamps_to_month_end() {
        let mut store = store();
        let mut seq = Sequence::new("monthly report");
        // Jan 31 + one calendar month lands on Feb 28.
        let due = Utc.with_ymd_and_hms(2026, 1, 31, 2, 0, 0).unwrap();
        seq.schedule = Some(Schedule {
            next_run: due,
            recurrence: Recurrence::Monthly,
        });
        store.add_sequence(seq);

        store.check_due(due).await;
        store.stop("monthly report").await;

        let shared = store.get("monthly report").unwrap();
        assert_eq!(
            shared.lock().unwrap().schedule.unwrap().next_run,
            Utc.with_ymd_and_hms(2026, 2, 28, 2, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_check_due_non_recurring_clears_schedule() {
        let mut store = store();
        let mut seq = Sequence::new("once");
        let due = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        seq.schedule = Some(Schedule {
            next_run: due,
            recurrence: Recurrence::None,
        });
        store.add_sequence(seq);

        store.check_due(due).await;
        store.stop("once").await;

        let shared = store.get("once").unwrap();
        assert!(shared.lock().unwrap().schedule.is_none());
    }

    #[tokio::test]
    async fn test_check_due_skips_future_and_running() {
        let mut store = store();
        let mut seq = Sequence::new("later");
        let due = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        seq.schedule = Some(Schedule {
            next_run: due,
            recurrence: Recurrence::Daily,
        });
        store.add_sequence(seq);

        store.check_due(due - ChronoDuration::minutes(1)).await;
        assert_eq!(
            store.get("later").unwrap().lock().unwrap().schedule.unwrap().next_run,
            due
        );
    }
}
