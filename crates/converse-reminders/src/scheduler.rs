use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::store::ReminderStore;

/// Minutes between overdue scans.
pub const DEFAULT_CHECK_INTERVAL_MINUTES: u64 = 5;

/// Periodic cooperative task that scans the store for overdue reminders and
/// emits a WARN-level summary for each batch.
///
/// Exactly one run loop is active per scheduler instance: a second `start`
/// is a no-op, `stop` cancels the loop via a watch channel.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    check_interval: Duration,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<ReminderStore>, check_interval_minutes: u64) -> Self {
        Self {
            store,
            check_interval: Duration::from_secs(check_interval_minutes.max(1) * 60),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the scan loop. Idempotent while a loop is already running.
    pub fn start(&self) {
        let mut shutdown = self.shutdown.lock().unwrap();
        if shutdown.is_some() {
            return;
        }

        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);

        let store = Arc::clone(&self.store);
        let interval = self.check_interval;
        let handle = tokio::spawn(run_loop(store, interval, rx));
        *self.handle.lock().unwrap() = Some(handle);
        info!(interval_secs = interval.as_secs(), "reminder scheduler started");
    }

    /// Cancel the run loop. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        info!("reminder scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().unwrap().is_some()
    }

    /// Summary of pending reminders, independent of the scan loop.
    pub fn current_summary(&self) -> String {
        self.store.summary()
    }
}

async fn run_loop(store: Arc<ReminderStore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan_once(&store);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("reminder scan loop shutting down");
                    break;
                }
            }
        }
    }
}

/// One overdue scan: log the batch and flip `notified` on every returned
/// reminder before the next scan can see it again.
fn scan_once(store: &ReminderStore) {
    let overdue = store.get_overdue();
    if overdue.is_empty() {
        return;
    }

    let mut summary = format!("Просроченные напоминания ({}):\n", overdue.len());
    for reminder in &overdue {
        summary.push_str(&format!(
            "- {} — срок {}",
            reminder.title,
            reminder.reminder_time.format("%Y-%m-%d %H:%M UTC"),
        ));
        if let Some(description) = &reminder.description {
            summary.push_str(&format!(" ({description})"));
        }
        summary.push_str(&format!(" [id: {}]\n", reminder.id));
    }
    warn!(count = overdue.len(), "{summary}");

    for reminder in &overdue {
        if let Err(e) = store.mark_notified(&reminder.id) {
            warn!(reminder_id = %reminder.id, error = %e, "failed to mark reminder notified");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn store_with_overdue() -> Arc<ReminderStore> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            ReminderStore::open(dir.path().join("reminders.json")).expect("open");
        // Keep the tempdir alive for the duration of the test by leaking it;
        // the OS cleans the file on process exit.
        std::mem::forget(dir);
        store
            .add("просрочено", None, Utc::now() - ChronoDuration::minutes(1))
            .expect("add");
        Arc::new(store)
    }

    #[test]
    fn scan_marks_every_overdue_reminder_notified() {
        let store = store_with_overdue();
        assert_eq!(store.get_overdue().len(), 1);
        scan_once(&store);
        assert!(store.get_overdue().is_empty());
        // The reminder stays pending — only the notification flag flips.
        assert_eq!(store.list(false).len(), 1);
        assert!(store.list(false)[0].notified);
    }

    #[tokio::test]
    async fn second_start_is_a_noop_and_stop_cancels() {
        let store = store_with_overdue();
        let scheduler = ReminderScheduler::new(store, 5);

        scheduler.start();
        assert!(scheduler.is_running());
        scheduler.start();
        assert!(scheduler.is_running());

        scheduler.stop();
        assert!(!scheduler.is_running());
    }
}
