//! Process wiring: config → provider, repository, tool registry, agent,
//! scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use converse_core::config::{ConverseConfig, LlmConfig, LlmProviderKind, StorageBackend};
use converse_rag::VectorIndex;
use converse_reminders::{ReminderScheduler, ReminderStore};
use converse_store::{
    ConversationRepository, MemoryRepository, RedisRepository, SqliteRepository,
};

use crate::agent::{Agent, AgentError};
use crate::chat_completions::ChatCompletionsClient;
use crate::client::LlmClient;
use crate::local::LocalClient;
use crate::rag_service::RagQueryService;
use crate::tools::{
    pipeline, rag, reminders, system, ToolRegistry,
};

/// Everything a serving process needs, assembled from config.
pub struct ConverseRuntime {
    pub agent: Arc<Agent>,
    pub registry: Arc<ToolRegistry>,
    pub rag_index: Arc<RwLock<VectorIndex>>,
    pub reminder_store: Arc<ReminderStore>,
    pub scheduler: Arc<ReminderScheduler>,
}

/// Select the LLM provider variant.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProviderKind::ChatCompletions => Arc::new(ChatCompletionsClient::new(config)?),
        LlmProviderKind::Local => Arc::new(LocalClient::new(config)?),
    };
    info!(provider = client.name(), model = %config.model, "LLM client ready");
    Ok(client)
}

/// Select the conversation repository tier.
pub async fn build_repository(
    config: &ConverseConfig,
) -> Result<Arc<dyn ConversationRepository>, AgentError> {
    let storage = &config.storage;
    let repository: Arc<dyn ConversationRepository> = match storage.backend {
        StorageBackend::Memory => Arc::new(MemoryRepository::new()),
        StorageBackend::KvTtl => Arc::new(
            RedisRepository::connect(&storage.kv_url, storage.kv_ttl_hours).await?,
        ),
        StorageBackend::Sql => {
            if let Some(parent) = Path::new(&storage.sql_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AgentError::Internal(e.to_string()))?;
                }
            }
            Arc::new(SqliteRepository::open(&storage.sql_path)?)
        }
    };
    info!(backend = ?storage.backend, "conversation repository ready");
    Ok(repository)
}

/// Register the built-in tool groups against the shared resources.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    llm: Arc<dyn LlmClient>,
    rag_service: Arc<RagQueryService>,
    reminder_store: Arc<ReminderStore>,
    pipeline_output_dir: PathBuf,
) {
    let index = rag_service.index();

    registry.register(Arc::new(system::current_time_tool()));

    registry.register(Arc::new(rag::RagIndexDocumentsTool::new(Arc::clone(&index))));
    registry.register(Arc::new(rag::RagSearchTool::new(Arc::clone(&index))));
    registry.register(Arc::new(rag::RagIndexInfoTool::new(Arc::clone(&index))));
    registry.register(Arc::new(rag::AskWithRagTool::new(Arc::clone(&rag_service))));
    registry.register(Arc::new(rag::CompareRagAnswersTool::new(Arc::clone(
        &rag_service,
    ))));
    registry.register(Arc::new(rag::CompareRagRerankingTool::new(Arc::clone(
        &rag_service,
    ))));

    registry.register(Arc::new(pipeline::search_docs_tool(Arc::clone(&index))));
    registry.register(Arc::new(pipeline::summarize_tool(Arc::clone(&llm))));
    registry.register(Arc::new(pipeline::save_to_file_tool(pipeline_output_dir)));

    registry.register(Arc::new(reminders::ReminderAddTool::new(Arc::clone(
        &reminder_store,
    ))));
    registry.register(Arc::new(reminders::ReminderListTool::new(Arc::clone(
        &reminder_store,
    ))));
    registry.register(Arc::new(reminders::ReminderCompleteTool::new(Arc::clone(
        &reminder_store,
    ))));
    registry.register(Arc::new(reminders::ReminderDeleteTool::new(Arc::clone(
        &reminder_store,
    ))));
    registry.register(Arc::new(reminders::ReminderSummaryTool::new(Arc::clone(
        &reminder_store,
    ))));
}

/// Assemble the full runtime. The reminder scheduler is returned stopped;
/// call `scheduler.start()` once the runtime owns a tokio reactor.
pub async fn build_runtime(config: &ConverseConfig) -> Result<ConverseRuntime, AgentError> {
    let llm = build_llm_client(&config.llm)?;
    let repository = build_repository(config).await?;

    let rag_index = Arc::new(RwLock::new(VectorIndex::new()));
    let rag_service = Arc::new(RagQueryService::new(
        Arc::clone(&llm),
        Arc::clone(&rag_index),
    ));

    let store_path = PathBuf::from(&config.reminders.store_path);
    let reminder_store = Arc::new(
        ReminderStore::open(&store_path).map_err(|e| AgentError::Internal(e.to_string()))?,
    );
    let scheduler = Arc::new(ReminderScheduler::new(
        Arc::clone(&reminder_store),
        config.reminders.check_interval_minutes,
    ));

    let pipeline_output_dir = store_path
        .parent()
        .map(|p| p.join("pipeline"))
        .unwrap_or_else(|| PathBuf::from("pipeline"));

    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(
        &registry,
        Arc::clone(&llm),
        Arc::clone(&rag_service),
        Arc::clone(&reminder_store),
        pipeline_output_dir,
    );
    info!(tools = registry.len(), "tool registry populated");

    let agent = Arc::new(Agent::new(
        llm,
        repository,
        Arc::clone(&registry),
        config.agent.max_tool_iterations,
    ));

    Ok(ConverseRuntime {
        agent,
        registry,
        rag_index,
        reminder_store,
        scheduler,
    })
}
