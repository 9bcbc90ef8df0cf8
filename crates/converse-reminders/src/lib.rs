//! Reminder storage and the periodic overdue scanner.

pub mod scheduler;
pub mod store;
pub mod types;

pub use scheduler::ReminderScheduler;
pub use store::ReminderStore;
pub use types::{Reminder, ReminderStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Reminder not found: {id}")]
    NotFound { id: String },

    #[error("Invalid reminder time: {0}")]
    InvalidTime(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReminderError>;
