use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Reminder, ReminderStatus};
use crate::{ReminderError, Result};

/// JSON-file reminder store.
///
/// The file is a plain JSON array of reminders. All writes go through one
/// in-process mutex and land via write-temp-then-rename, so concurrent tool
/// handlers and the scheduler loop never tear the file.
pub struct ReminderStore {
    path: PathBuf,
    reminders: Mutex<Vec<Reminder>>,
}

impl ReminderStore {
    /// Open the store, loading existing reminders when the file is present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let reminders = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), count = reminders.len(), "reminder store opened");
        Ok(Self {
            path,
            reminders: Mutex::new(reminders),
        })
    }

    /// Serialise the current state atomically: write a temp file next to the
    /// target, then rename over it.
    fn persist(&self, reminders: &[Reminder]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(reminders)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(
        &self,
        title: &str,
        description: Option<String>,
        reminder_time: DateTime<Utc>,
    ) -> Result<Reminder> {
        let now = Utc::now();
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description,
            reminder_time,
            status: ReminderStatus::Pending,
            notified: false,
            created_at: now,
            updated_at: now,
        };

        let mut reminders = self.reminders.lock().unwrap();
        reminders.push(reminder.clone());
        self.persist(&reminders)?;
        debug!(reminder_id = %reminder.id, "reminder added");
        Ok(reminder)
    }

    /// List reminders, soonest first. `include_done` keeps completed and
    /// cancelled entries in the listing.
    pub fn list(&self, include_done: bool) -> Vec<Reminder> {
        let reminders = self.reminders.lock().unwrap();
        let mut out: Vec<Reminder> = reminders
            .iter()
            .filter(|r| include_done || r.status == ReminderStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.reminder_time);
        out
    }

    pub fn get(&self, id: &str) -> Option<Reminder> {
        self.reminders
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<Reminder>
    where
        F: FnOnce(&mut Reminder),
    {
        let mut reminders = self.reminders.lock().unwrap();
        let reminder = reminders
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ReminderError::NotFound { id: id.to_string() })?;
        apply(reminder);
        reminder.updated_at = Utc::now();
        let updated = reminder.clone();
        self.persist(&reminders)?;
        Ok(updated)
    }

    pub fn complete(&self, id: &str) -> Result<Reminder> {
        self.update(id, |r| r.status = ReminderStatus::Completed)
    }

    pub fn cancel(&self, id: &str) -> Result<Reminder> {
        self.update(id, |r| r.status = ReminderStatus::Cancelled)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut reminders = self.reminders.lock().unwrap();
        let before = reminders.len();
        reminders.retain(|r| r.id != id);
        if reminders.len() == before {
            return Err(ReminderError::NotFound { id: id.to_string() });
        }
        self.persist(&reminders)?;
        debug!(reminder_id = %id, "reminder deleted");
        Ok(())
    }

    /// Pending reminders whose time has passed and that were not yet
    /// notified.
    pub fn get_overdue(&self) -> Vec<Reminder> {
        let now = Utc::now();
        self.reminders
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_overdue(now))
            .cloned()
            .collect()
    }

    pub fn mark_notified(&self, id: &str) -> Result<()> {
        self.update(id, |r| r.notified = true)?;
        Ok(())
    }

    /// Human-readable summary of pending reminders, soonest first.
    pub fn summary(&self) -> String {
        let pending = self.list(false);
        if pending.is_empty() {
            return "Напоминаний нет.".to_string();
        }
        let mut out = format!("Напоминания ({}):\n", pending.len());
        for reminder in &pending {
            out.push_str(&format!(
                "- {} — срок {}",
                reminder.title,
                reminder.reminder_time.format("%Y-%m-%d %H:%M UTC"),
            ));
            if let Some(description) = &reminder.description {
                out.push_str(&format!(" ({description})"));
            }
            out.push_str(&format!(" [id: {}]\n", reminder.id));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_store(dir: &tempfile::TempDir) -> ReminderStore {
        ReminderStore::open(dir.path().join("reminders.json")).expect("open")
    }

    #[test]
    fn add_list_complete_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        let r = store
            .add("позвонить маме", None, Utc::now() + Duration::hours(1))
            .expect("add");
        assert_eq!(store.list(false).len(), 1);

        store.complete(&r.id).expect("complete");
        assert!(store.list(false).is_empty());
        assert_eq!(store.list(true).len(), 1);

        store.delete(&r.id).expect("delete");
        assert!(store.list(true).is_empty());
        assert!(store.delete(&r.id).is_err());
    }

    #[test]
    fn overdue_scan_skips_notified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);

        let past = store
            .add("просрочено", None, Utc::now() - Duration::minutes(10))
            .expect("add");
        store
            .add("ещё не пора", None, Utc::now() + Duration::hours(1))
            .expect("add");

        let overdue = store.get_overdue();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, past.id);

        store.mark_notified(&past.id).expect("mark");
        assert!(store.get_overdue().is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reminders.json");

        let id = {
            let store = ReminderStore::open(&path).expect("open");
            store
                .add("переживи рестарт", Some("важно".to_string()), Utc::now())
                .expect("add")
                .id
        };

        let store = ReminderStore::open(&path).expect("reopen");
        let restored = store.get(&id).expect("present");
        assert_eq!(restored.title, "переживи рестарт");
        assert_eq!(restored.description.as_deref(), Some("важно"));
    }

    #[test]
    fn summary_lists_pending_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        assert_eq!(store.summary(), "Напоминаний нет.");

        store
            .add("полить цветы", None, Utc::now() + Duration::hours(2))
            .expect("add");
        let summary = store.summary();
        assert!(summary.contains("полить цветы"));
        assert!(summary.contains("id:"));
    }
}
