use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Outer deadline for a single LLM request, seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
/// Hard bound on the tool-call loop within one turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;

/// Top-level config (converse.toml + CONVERSE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Default for ConverseConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            reminders: RemindersConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// Which LLM wire shape the process talks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProviderKind {
    /// JSON-over-HTTPS chat-completions shape with SSE streaming.
    ChatCompletions,
    /// Local server speaking newline-delimited JSON. The default pairs with
    /// the default base URL, which points at a local runtime.
    #[default]
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer credential for the chat-completions variant; unused locally.
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Durability tier for conversation histories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    #[default]
    Memory,
    KvTtl,
    Sql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_kv_url")]
    pub kv_url: String,
    #[serde(default = "default_kv_ttl_hours")]
    pub kv_ttl_hours: u64,
    #[serde(default = "default_sql_path")]
    pub sql_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            kv_url: default_kv_url(),
            kv_ttl_hours: default_kv_ttl_hours(),
            sql_path: default_sql_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_reminder_store_path")]
    pub store_path: String,
    #[serde(default = "default_check_interval_minutes")]
    pub check_interval_minutes: u64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            store_path: default_reminder_store_path(),
            check_interval_minutes: default_check_interval_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen2.5:7b".to_string()
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_kv_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_kv_ttl_hours() -> u64 {
    24
}
fn default_sql_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.converse/converse.db", home)
}
fn default_reminder_store_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.converse/reminders.json", home)
}
fn default_check_interval_minutes() -> u64 {
    5
}
fn default_max_tool_iterations() -> usize {
    DEFAULT_MAX_TOOL_ITERATIONS
}

impl ConverseConfig {
    /// Load config from a TOML file with CONVERSE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ConverseConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONVERSE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.converse/converse.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ConverseConfig::default();
        assert_eq!(config.llm.provider, LlmProviderKind::Local);
        assert_eq!(config.llm.request_timeout_secs, 180);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.kv_ttl_hours, 24);
        assert_eq!(config.reminders.check_interval_minutes, 5);
        assert_eq!(config.agent.max_tool_iterations, 5);
    }

    #[test]
    fn backend_selector_parses_kebab_case() {
        let backend: StorageBackend = serde_json::from_str("\"kv-ttl\"").expect("parse");
        assert_eq!(backend, StorageBackend::KvTtl);
        let provider: LlmProviderKind = serde_json::from_str("\"chat-completions\"").expect("parse");
        assert_eq!(provider, LlmProviderKind::ChatCompletions);
    }
}
