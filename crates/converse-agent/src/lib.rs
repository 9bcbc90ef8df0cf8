//! The agent core: LLM provider contract and variants, tool system, prompt
//! builder, history compressor, RAG query service, and the orchestration
//! loop itself (non-streaming and streaming).

pub mod agent;
pub mod bootstrap;
pub mod chat_completions;
pub mod client;
pub mod compress;
pub mod executor;
pub mod local;
pub mod prompt;
pub mod rag_service;
pub mod stream;
pub mod tools;

pub use agent::{Agent, AgentError, ChatRequest, ChatResponse};
pub use bootstrap::{build_runtime, ConverseRuntime};
pub use chat_completions::ChatCompletionsClient;
pub use client::{ChatChunk, LlmClient, LlmError, LlmResponse, ToolCallDelta, ToolSchema};
pub use compress::{CompressionResult, CompressionStats, HistoryCompressor};
pub use executor::ToolExecutor;
pub use local::LocalClient;
pub use prompt::PromptBuilder;
pub use rag_service::{RagAnswer, RagQueryService};
pub use stream::{StreamEvent, StreamEventKind};
pub use tools::{FunctionTool, Tool, ToolError, ToolRegistry};
