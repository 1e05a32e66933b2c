//! LLM and embedding client abstractions.
//!
//! `LLMClient` is the function-calling contract every LLM-driven component
//! (Smart Parser, Hybrid Extractors, ReAct loop, Orchestrator) depends on
//! through an `Arc<dyn LLMClient>`, so the review graph never hard-codes a
//! provider.

mod client;
mod types;

pub use client::{
    AnthropicClient, ClientConfig, EmbeddingClient, HttpEmbeddingClient, LLMClient,
    NullEmbeddingClient, NullLlmClient, OpenAIClient, ScriptedLlmClient, ScriptedResponse,
    TrackedClient,
};
pub use types::{
    CacheControl, ChatMessage, ChatRole, CostTracker, ModelCosts, ModelSpec, ModelTier, Provider,
    ToolCall, ToolDefinition, TokenUsage,
};
