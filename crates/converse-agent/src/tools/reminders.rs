//! Reminder tool group over the shared [`ReminderStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use converse_reminders::ReminderStore;

use crate::tools::{parse_args, Tool, ToolError};

/// `reminder_add` — create a reminder at an ISO-8601 instant.
pub struct ReminderAddTool {
    store: Arc<ReminderStore>,
}

impl ReminderAddTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReminderAddTool {
    fn name(&self) -> &str {
        "reminder_add"
    }

    fn description(&self) -> &str {
        "Создаёт напоминание. Вызывай, когда пользователь просит напомнить \
         о чём-то в будущем. Время указывается в ISO-8601 (UTC)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Короткий заголовок напоминания."
                },
                "description": {
                    "type": "string",
                    "description": "Дополнительные детали (необязательно)."
                },
                "reminder_time": {
                    "type": "string",
                    "description": "Когда напомнить, ISO-8601 (например '2026-08-01T15:00:00Z')."
                }
            },
            "required": ["title", "reminder_time"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let title = match args.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ToolError::InvalidArguments("'title' обязателен".into())),
        };
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);
        let time_str = args
            .get("reminder_time")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'reminder_time' обязателен".into()))?;

        let reminder_time = chrono::DateTime::parse_from_rfc3339(time_str)
            .map_err(|e| ToolError::InvalidArguments(format!("некорректное время: {e}")))?
            .with_timezone(&chrono::Utc);

        let reminder = self
            .store
            .add(title, description, reminder_time)
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(format!(
            "Напоминание создано!\n- ID: {}\n- Заголовок: {}\n- Время: {}",
            reminder.id,
            reminder.title,
            reminder.reminder_time.format("%Y-%m-%d %H:%M UTC"),
        ))
    }
}

/// `reminder_list` — pending reminders, optionally with finished ones.
pub struct ReminderListTool {
    store: Arc<ReminderStore>,
}

impl ReminderListTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReminderListTool {
    fn name(&self) -> &str {
        "reminder_list"
    }

    fn description(&self) -> &str {
        "Показывает список напоминаний. По умолчанию только активные."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "include_done": {
                    "type": "boolean",
                    "description": "Включить завершённые и отменённые."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let include_done = args
            .get("include_done")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let reminders = self.store.list(include_done);
        if reminders.is_empty() {
            return Ok("Напоминаний нет.".to_string());
        }

        let mut out = format!("Напоминания ({}):\n", reminders.len());
        for r in &reminders {
            out.push_str(&format!(
                "- [{}] {} — {} (статус: {}{})\n",
                r.id,
                r.title,
                r.reminder_time.format("%Y-%m-%d %H:%M UTC"),
                r.status,
                if r.notified { ", уведомление отправлено" } else { "" },
            ));
        }
        Ok(out)
    }
}

/// `reminder_complete` — mark a reminder done.
pub struct ReminderCompleteTool {
    store: Arc<ReminderStore>,
}

impl ReminderCompleteTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReminderCompleteTool {
    fn name(&self) -> &str {
        "reminder_complete"
    }

    fn description(&self) -> &str {
        "Отмечает напоминание выполненным по его ID."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "ID напоминания из reminder_list."
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'id' обязателен".into()))?;

        let reminder = self
            .store
            .complete(id)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("Напоминание «{}» выполнено.", reminder.title))
    }
}

/// `reminder_delete` — remove a reminder entirely.
pub struct ReminderDeleteTool {
    store: Arc<ReminderStore>,
}

impl ReminderDeleteTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReminderDeleteTool {
    fn name(&self) -> &str {
        "reminder_delete"
    }

    fn description(&self) -> &str {
        "Удаляет напоминание по его ID."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "string",
                    "description": "ID напоминания из reminder_list."
                }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'id' обязателен".into()))?;

        self.store
            .delete(id)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("Напоминание {id} удалено."))
    }
}

/// `reminder_get_summary` — the same summary the scheduler logs.
pub struct ReminderSummaryTool {
    store: Arc<ReminderStore>,
}

impl ReminderSummaryTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReminderSummaryTool {
    fn name(&self) -> &str {
        "reminder_get_summary"
    }

    fn description(&self) -> &str {
        "Краткая сводка активных напоминаний."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, _args_json: &str) -> Result<String, ToolError> {
        Ok(self.store.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<ReminderStore> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ReminderStore::open(dir.path().join("reminders.json")).expect("open");
        std::mem::forget(dir);
        Arc::new(store)
    }

    #[tokio::test]
    async fn add_list_complete_flow() {
        let store = store();
        let add = ReminderAddTool::new(Arc::clone(&store));
        let list = ReminderListTool::new(Arc::clone(&store));
        let complete = ReminderCompleteTool::new(Arc::clone(&store));

        let result = add
            .execute(r#"{"title": "позвонить маме", "reminder_time": "2026-09-01T12:00:00Z"}"#)
            .await
            .expect("add");
        assert!(result.contains("Напоминание создано"));

        let listed = list.execute("{}").await.expect("list");
        assert!(listed.contains("позвонить маме"));

        let id = store.list(false)[0].id.clone();
        let done = complete
            .execute(&format!(r#"{{"id": "{id}"}}"#))
            .await
            .expect("complete");
        assert!(done.contains("выполнено"));
        assert_eq!(list.execute("{}").await.expect("list"), "Напоминаний нет.");
    }

    #[tokio::test]
    async fn add_rejects_bad_time() {
        let add = ReminderAddTool::new(store());
        let err = add
            .execute(r#"{"title": "x", "reminder_time": "завтра"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
