use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Completed => "completed",
            ReminderStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "completed" => Ok(ReminderStatus::Completed),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// A persisted reminder record.
///
/// `notified` flips to true at most once per lifetime: the scheduler's
/// overdue scan skips reminders that already carried their notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub reminder_time: DateTime<Utc>,
    pub status: ReminderStatus,
    #[serde(default)]
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// An overdue reminder is pending, past due, and not yet notified.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.reminder_time <= now && !self.notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reminder(offset_minutes: i64) -> Reminder {
        let now = Utc::now();
        Reminder {
            id: "r1".to_string(),
            title: "позвонить маме".to_string(),
            description: None,
            reminder_time: now + Duration::minutes(offset_minutes),
            status: ReminderStatus::Pending,
            notified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn past_pending_unnotified_is_overdue() {
        assert!(reminder(-5).is_overdue(Utc::now()));
    }

    #[test]
    fn future_reminder_is_not_overdue() {
        assert!(!reminder(5).is_overdue(Utc::now()));
    }

    #[test]
    fn notified_reminder_is_skipped() {
        let mut r = reminder(-5);
        r.notified = true;
        assert!(!r.is_overdue(Utc::now()));
    }

    #[test]
    fn completed_reminder_is_skipped() {
        let mut r = reminder(-5);
        r.status = ReminderStatus::Completed;
        assert!(!r.is_overdue(Utc::now()));
    }
}
