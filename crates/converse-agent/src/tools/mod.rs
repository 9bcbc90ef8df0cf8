//! Tool system for agent tool calling.
//!
//! Every tool satisfies the same string-in / string-out contract:
//! `execute(args_json) -> String`. The returned string is opaque to the
//! registry; domain-level failures are ordinary results starting with an
//! error marker, while argument and execution failures surface as
//! [`ToolError`] and are stringified by the executor.

pub mod pipeline;
pub mod rag;
pub mod reminders;
pub mod system;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{FunctionSchema, ToolSchema};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("неизвестный инструмент: {0}")]
    UnknownTool(String),

    #[error("некорректные аргументы: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "rag_search").
    fn name(&self) -> &str;
    /// Human-readable description shown to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters (object, properties, required).
    fn parameters(&self) -> Value;
    /// Execute with the raw JSON argument string the model emitted.
    async fn execute(&self, args_json: &str) -> Result<String, ToolError>;
}

/// Parse the model-emitted argument string. An empty string counts as `{}` —
/// models frequently send nothing for zero-parameter tools.
pub fn parse_args(args_json: &str) -> Result<Value, ToolError> {
    let trimmed = args_json.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(trimmed).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Process-wide tool registry.
///
/// Registration happens once at startup; during serving the registry is
/// read-only, so the lock is effectively uncontended.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A duplicate name replaces the prior registration.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap();
        if tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool re-registered, replacing previous");
        } else {
            debug!(tool = %name, "tool registered");
        }
    }

    /// Wire-shape schemas for every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let tools = self.tools.read().unwrap();
        let mut schemas: Vec<ToolSchema> = tools
            .values()
            .map(|tool| ToolSchema {
                schema_type: "function".to_string(),
                function: FunctionSchema {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.parameters(),
                },
            })
            .collect();
        schemas.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        schemas
    }

    pub fn tool_names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap();
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// Dispatch by name. The guard is dropped before awaiting the tool.
    pub async fn execute(&self, name: &str, args_json: &str) -> Result<String, ToolError> {
        let tool = {
            let tools = self.tools.read().unwrap();
            tools.get(name).cloned()
        };
        match tool {
            Some(tool) => tool.execute(args_json).await,
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

/// Direct tool invocation request from a client: `{tool, arguments}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvokeRequest {
    pub tool: String,
    /// Raw JSON argument string, exactly as a model would emit it.
    #[serde(default)]
    pub arguments: String,
}

/// Result of a direct invocation. `success` is heuristic: false when the
/// call failed or the result opens with a known error marker.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvokeResponse {
    pub result: String,
    pub tool: String,
    pub success: bool,
}

impl ToolRegistry {
    /// Client-facing passthrough used outside the agent loop.
    pub async fn invoke(&self, request: ToolInvokeRequest) -> ToolInvokeResponse {
        match self.execute(&request.tool, &request.arguments).await {
            Ok(result) => {
                let success = !result.starts_with("Ошибка") && !result.starts_with('❌');
                ToolInvokeResponse {
                    result,
                    tool: request.tool,
                    success,
                }
            }
            Err(e) => ToolInvokeResponse {
                result: format!("Ошибка: {e}"),
                tool: request.tool,
                success: false,
            },
        }
    }
}

type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// Declaratively-built tool: name, description, and per-parameter metadata
/// reflected into the JSON-Schema shape, plus an async closure handler.
///
/// The counterpart of the explicit style (a struct implementing [`Tool`]);
/// both end in the same trait object.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: ToolHandler,
}

impl FunctionTool {
    pub fn builder(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> FunctionToolBuilder {
        FunctionToolBuilder {
            name: name.into(),
            description: description.into(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

pub struct FunctionToolBuilder {
    name: String,
    description: String,
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl FunctionToolBuilder {
    /// Declare one parameter: name, JSON type, description, required flag.
    pub fn param(
        mut self,
        name: &str,
        param_type: &str,
        description: &str,
        required: bool,
    ) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": param_type, "description": description }),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Attach the async handler and finish the tool.
    pub fn handler<F, Fut>(self, handler: F) -> FunctionTool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        FunctionTool {
            name: self.name,
            description: self.description,
            parameters: json!({
                "type": "object",
                "properties": Value::Object(self.properties),
                "required": self.required,
            }),
            handler: Arc::new(move |args| -> BoxFuture<'static, Result<String, ToolError>> {
                Box::pin(handler(args))
            }),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args_json: &str) -> Result<String, ToolError> {
        let args = parse_args(args_json)?;
        (self.handler)(args).await
    }
}
