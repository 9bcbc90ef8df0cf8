//! End-to-end scenarios for the non-streaming agent loop, driven by the
//! scripted LLM stub.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use converse_agent::agent::{Agent, ChatRequest};
use converse_agent::tools::{FunctionTool, ToolRegistry};
use converse_core::conversation::CompressionSettings;
use converse_core::message::{Message, Role};
use converse_store::{ConversationRepository, MemoryRepository};

use support::{assistant_response, tool_call_response, StubLlm};

fn agent_with(
    llm: Arc<StubLlm>,
    registry: Arc<ToolRegistry>,
    max_tool_iterations: usize,
) -> (Agent, Arc<MemoryRepository>) {
    support::init_tracing();
    let repository = Arc::new(MemoryRepository::new());
    let agent = Agent::new(llm, repository.clone(), registry, max_tool_iterations);
    (agent, repository)
}

/// Scenario 1: a plain turn with no tool calls.
#[tokio::test]
async fn simple_turn_appends_system_user_assistant() {
    let llm = Arc::new(StubLlm::scripted(vec![assistant_response("Здравствуйте")]));
    let (agent, repository) = agent_with(llm, Arc::new(ToolRegistry::new()), 5);

    let response = agent.chat(ChatRequest::new("Привет")).await.expect("turn");

    assert_eq!(response.message, "Здравствуйте");
    assert!(!response.conversation_id.is_empty());
    assert!(response.tool_call.is_none());
    assert_eq!(response.token_usage.expect("usage").total_tokens, 15);

    let history = repository
        .get_history(&response.conversation_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].role, Role::User);
    assert_eq!(history[1].content.as_deref(), Some("Привет"));
    assert_eq!(history[2].role, Role::Assistant);
    assert_eq!(history[2].content.as_deref(), Some("Здравствуйте"));
}

/// Scenario 2: one tool round-trip, with `type` normalisation on the way in.
#[tokio::test]
async fn single_tool_round_trip_grows_history_in_order() {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(
        FunctionTool::builder("get_current_time", "Текущее время")
            .handler(|_| async move { Ok("2025-01-01T00:00:00Z".to_string()) }),
    ));

    let llm = Arc::new(StubLlm::scripted(vec![
        tool_call_response("t1", "get_current_time", "{}"),
        assistant_response("Сейчас 2025-01-01T00:00:00Z"),
    ]));
    let (agent, repository) = agent_with(llm, registry, 5);

    let response = agent
        .chat(ChatRequest::new("Который час?"))
        .await
        .expect("turn");

    assert_eq!(response.message, "Сейчас 2025-01-01T00:00:00Z");
    let surfaced = response.tool_call.expect("first tool call surfaced");
    assert_eq!(surfaced.id, "t1");
    assert_eq!(surfaced.function.name, "get_current_time");

    let history = repository
        .get_history(&response.conversation_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].role, Role::User);

    let with_calls = &history[2];
    assert_eq!(with_calls.role, Role::Assistant);
    let calls = with_calls.tool_calls.as_ref().expect("tool calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "t1");
    // Missing `type` was normalised before the append.
    assert_eq!(calls[0].call_type.as_deref(), Some("function"));

    let tool_msg = &history[3];
    assert_eq!(tool_msg.role, Role::Tool);
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("t1"));
    assert_eq!(tool_msg.content.as_deref(), Some("2025-01-01T00:00:00Z"));

    assert_eq!(history[4].role, Role::Assistant);
    // Two LLM calls' usage accumulated.
    assert_eq!(response.token_usage.expect("usage").total_tokens, 30);
}

/// Scenario 3: the iteration cap forces one final tool-less call.
#[tokio::test]
async fn iteration_cap_forces_tool_less_terminal_call() {
    let executions = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(ToolRegistry::new());
    {
        let executions = Arc::clone(&executions);
        registry.register(Arc::new(
            FunctionTool::builder("busy_tool", "Счётчик вызовов").handler(move |_| {
                let executions = Arc::clone(&executions);
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok("ещё".to_string())
                }
            }),
        ));
    }

    let llm = Arc::new(StubLlm::looping("busy_tool"));
    let (agent, repository) = agent_with(Arc::clone(&llm), registry, 2);

    let response = agent.chat(ChatRequest::new("Работай")).await.expect("turn");

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(!response.message.is_empty());
    // 2 looped calls + 1 forced tool-less call + the initial call = 4 total.
    assert_eq!(llm.chat_calls.load(Ordering::SeqCst), 4);

    let history = repository
        .get_history(&response.conversation_id)
        .await
        .expect("history");
    // The synthetic summary request landed before the terminal answer.
    let synthetic = &history[history.len() - 2];
    assert_eq!(synthetic.role, Role::User);
    assert!(synthetic.content.as_deref().unwrap().contains("не вызывая инструменты"));
    assert_eq!(history.last().unwrap().role, Role::Assistant);
}

/// Scenario 4: compression replaces old dialogue, keeping the recent pairs.
#[tokio::test]
async fn compression_fires_and_keeps_recent_suffix() {
    let llm = Arc::new(StubLlm::scripted(vec![
        assistant_response("📋 Резюме"), // the summary call
        assistant_response("ок"),       // the turn itself
    ]));
    let (agent, repository) = agent_with(llm, Arc::new(ToolRegistry::new()), 5);

    // Prefill: system + 6 user/assistant pairs.
    let id = repository.create_conversation(None).await.expect("create");
    repository
        .init_conversation(&id, "prompt")
        .await
        .expect("init");
    for i in 0..6 {
        repository
            .add_message(&id, Message::user(format!("вопрос {i}")))
            .await
            .expect("add");
        repository
            .add_message(&id, Message::assistant(format!("ответ {i}")))
            .await
            .expect("add");
    }
    let before = repository.get_history(&id).await.expect("history").len();

    let request = ChatRequest {
        compression_settings: Some(CompressionSettings {
            enabled: true,
            message_threshold: 6,
            keep_recent_messages: 2,
            ..CompressionSettings::default()
        }),
        ..ChatRequest::new("новый вопрос").with_conversation(&id)
    };
    let response = agent.chat(request).await.expect("turn");

    let history = repository.get_history(&id).await.expect("history");
    assert!(history.len() < before);

    // [system, summary, kept pair, user turn, assistant reply]
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content.as_deref(), Some("📋 Резюме"));
    assert_eq!(history[2].content.as_deref(), Some("вопрос 5"));
    assert_eq!(history[3].content.as_deref(), Some("ответ 5"));
    assert_eq!(history[4].content.as_deref(), Some("новый вопрос"));
    assert_eq!(history[5].content.as_deref(), Some("ок"));

    let stats = response.compression_stats.expect("stats");
    assert_eq!(stats.total_compressions, 1);
    assert_eq!(stats.last_summary.as_deref(), Some("📋 Резюме"));
}

/// Boundary: an empty user message still completes the turn.
#[tokio::test]
async fn empty_user_message_still_produces_an_answer() {
    let llm = Arc::new(StubLlm::scripted(vec![assistant_response(
        "Чем могу помочь?",
    )]));
    let (agent, repository) = agent_with(llm, Arc::new(ToolRegistry::new()), 5);

    let response = agent.chat(ChatRequest::new("")).await.expect("turn");
    assert_eq!(response.message, "Чем могу помочь?");

    let history = repository
        .get_history(&response.conversation_id)
        .await
        .expect("history");
    assert_eq!(history[1].content.as_deref(), Some(""));
    assert_eq!(history.last().unwrap().role, Role::Assistant);
}

/// A failing tool feeds an error string back and the turn still completes.
#[tokio::test]
async fn tool_failure_is_not_fatal_to_the_turn() {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(
        FunctionTool::builder("flaky", "Падает всегда").handler(|_| async move {
            Err(converse_agent::tools::ToolError::Execution(
                "нет соединения".to_string(),
            ))
        }),
    ));

    let llm = Arc::new(StubLlm::scripted(vec![
        tool_call_response("t1", "flaky", "{}"),
        assistant_response("Инструмент недоступен, отвечаю сам"),
    ]));
    let (agent, repository) = agent_with(llm, registry, 5);

    let response = agent.chat(ChatRequest::new("Проверь")).await.expect("turn");
    assert_eq!(response.message, "Инструмент недоступен, отвечаю сам");

    let history = repository
        .get_history(&response.conversation_id)
        .await
        .expect("history");
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).expect("tool message");
    assert!(tool_msg.content.as_deref().unwrap().starts_with("Ошибка:"));
}

/// Settings reconciliation rewrites the system prompt on format change.
#[tokio::test]
async fn format_change_updates_the_system_prompt() {
    let llm = Arc::new(StubLlm::scripted(vec![
        assistant_response("раз"),
        assistant_response("два"),
    ]));
    let (agent, repository) = agent_with(llm, Arc::new(ToolRegistry::new()), 5);

    let first = agent.chat(ChatRequest::new("первый")).await.expect("turn");
    let id = first.conversation_id;

    let original_prompt = repository.get_history(&id).await.expect("history")[0]
        .content
        .clone()
        .expect("prompt");

    let request = ChatRequest {
        response_format: Some(converse_core::conversation::ResponseFormat::Json),
        ..ChatRequest::new("второй").with_conversation(&id)
    };
    agent.chat(request).await.expect("turn");

    let updated_prompt = repository.get_history(&id).await.expect("history")[0]
        .content
        .clone()
        .expect("prompt");
    assert_ne!(original_prompt, updated_prompt);
    assert!(updated_prompt.contains("JSON"));
}
