//! Periodic schedule polling.
//!
//! The store never polls its own schedules; an external timer drives
//! [`SequenceStore::check_due`]. This module is that timer: a tokio task
//! ticking at the configured interval (10 s by default). The interval is a
//! configuration option, not a protocol guarantee.
//!
//! The scheduler runs on its own task, never on an executor's, so a paused
//! sequence can never deadlock waiting on its own restart.

use chrono::Utc;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::SequenceStore;

/// Spawn the schedule polling task. Ticks every `interval`, calling
/// `check_due` with the current time. Aborting the returned handle stops
/// polling; in-flight sequence runs are unaffected.
pub fn spawn(store: Arc<Mutex<SequenceStore>>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            debug!("schedule poll");
            store.lock().await.check_due(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Recurrence, Schedule, Sequence};
    use crate::store::StoreConfig;
    use chrono::Duration as ChronoDuration;
    use std::path::PathBuf;

    #[tokio::test(start_paused = true)]
    async fn test_tick_triggers_due_sequence() {
        let mut store = SequenceStore::new(StoreConfig {
            sequence_dir: PathBuf::from("sequences"),
            operator: "tester".to_string(),
            app_version: "0.0.0".to_string(),
            pause_poll: Duration::from_millis(10),
        });
        let mut seq = Sequence::new("due");
        seq.schedule = Some(Schedule {
            next_run: Utc::now() - ChronoDuration::hours(1),
            recurrence: Recurrence::None,
        });
        store.add_sequence(seq);
        let store = Arc::new(Mutex::new(store));

        let handle = spawn(Arc::clone(&store), Duration::from_secs(10));
        // First tick fires immediately; the paused clock makes this prompt.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let store = store.lock().await;
        let shared = store.get("due").unwrap();
        assert!(shared.lock().unwrap().schedule.is_none());
    }
}
