//! Wire types for LLM requests, responses, tool-calling, and cost tracking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// Model tier, used only for display/cost bucketing (no routing logic here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Flagship,
    Balanced,
    Fast,
}

/// Model definition with pricing, used to compute cost for the cost tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    pub tier: ModelTier,
    pub input_cost_per_m: f64,
    pub output_cost_per_m: f64,
}

impl ModelSpec {
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input_cost + output_cost
    }

    pub fn claude_sonnet() -> Self {
        Self {
            id: "claude-3-5-sonnet-20241022".to_string(),
            provider: Provider::Anthropic,
            tier: ModelTier::Balanced,
            input_cost_per_m: 3.0,
            output_cost_per_m: 15.0,
        }
    }

    pub fn claude_haiku() -> Self {
        Self {
            id: "claude-3-5-haiku-20241022".to_string(),
            provider: Provider::Anthropic,
            tier: ModelTier::Fast,
            input_cost_per_m: 0.8,
            output_cost_per_m: 4.0,
        }
    }

    pub fn gpt4o() -> Self {
        Self {
            id: "gpt-4o".to_string(),
            provider: Provider::OpenAI,
            tier: ModelTier::Balanced,
            input_cost_per_m: 2.5,
            output_cost_per_m: 10.0,
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation sent to/from an LLM. Assistant messages that
/// requested tool calls carry them in `tool_calls`; tool-result messages
/// carry the originating call id in `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            cache_control: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            cache_control: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            cache_control: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn with_cache(mut self) -> Self {
        self.cache_control = Some(CacheControl::Ephemeral);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

/// A function-calling tool definition exposed to the LLM by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One tool invocation the LLM requested (`{id, function: {name,
/// arguments: JSON-string}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON string of arguments, parsed by the caller.
    pub arguments: String,
}

/// Token usage statistics for one completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Cost tracking for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub request_count: u64,
    pub by_model: HashMap<String, ModelCosts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

impl CostTracker {
    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.request_count += 1;
        if let Some(c) = cost {
            self.total_cost += c;
        }
        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.request_count += 1;
        if let Some(c) = cost {
            entry.cost += c;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_cost_calculation() {
        let sonnet = ModelSpec::claude_sonnet();
        let cost = sonnet.calculate_cost(1_000_000, 500_000);
        assert!((cost - 10.5).abs() < 0.01);
    }

    #[test]
    fn cost_tracker_accumulates_across_models() {
        let mut tracker = CostTracker::default();
        tracker.record("sonnet", &TokenUsage { input_tokens: 1000, output_tokens: 500 }, Some(0.01));
        tracker.record("sonnet", &TokenUsage { input_tokens: 2000, output_tokens: 1000 }, Some(0.02));
        assert_eq!(tracker.total_input_tokens, 3000);
        assert_eq!(tracker.request_count, 2);
        assert!((tracker.total_cost - 0.03).abs() < 1e-9);
    }

    #[test]
    fn chat_message_tool_result_carries_call_id() {
        let msg = ChatMessage::tool_result("call-1", "{}");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(msg.role, ChatRole::Tool);
    }
}
