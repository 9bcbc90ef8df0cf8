//! System tool group.

use crate::tools::FunctionTool;

/// `get_current_time` — current UTC time in RFC3339.
pub fn current_time_tool() -> FunctionTool {
    FunctionTool::builder(
        "get_current_time",
        "Возвращает текущее время в формате RFC3339 (UTC). Вызывай, когда \
         пользователь спрашивает про дату или время.",
    )
    .handler(|_args| async move {
        Ok(chrono::Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    })
}

#[cfg(test)]
mod tests {
    use crate::tools::Tool;

    #[tokio::test]
    async fn returns_a_parseable_timestamp() {
        let tool = super::current_time_tool();
        assert_eq!(tool.name(), "get_current_time");
        let result = tool.execute("{}").await.expect("execute");
        assert!(chrono::DateTime::parse_from_rfc3339(&result).is_ok());
    }
}
