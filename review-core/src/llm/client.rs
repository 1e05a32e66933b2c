//! LLM client trait and provider implementations.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::types::{ChatMessage, ChatRole, CostTracker, ModelSpec, Provider, ToolCall, ToolDefinition, TokenUsage};

/// The function-calling contract every LLM-driven component depends on.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Plain completion, no tools offered.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_output_tokens: u32,
    ) -> Result<String>;

    /// Completion with tool definitions offered; returns the text plus any
    /// tool calls the model requested.
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)>;

    fn provider(&self) -> Provider;
}

/// Configuration shared by concrete provider clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: String,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: default_model.into(),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Build an HTTP client, falling back to a no-proxy client if proxy
/// auto-detection panics in sandboxed environments.
fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        _ => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build fallback HTTP client"),
    }
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// Anthropic Claude client (messages API with tool-use).
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut out = Vec::new();
        for m in messages {
            if m.role == ChatRole::System {
                system = Some(m.content.clone());
                continue;
            }
            out.push(AnthropicMessage {
                role: role_str(m.role).to_string(),
                content: m.content.clone(),
            });
        }
        (system, out)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(other)]
    Unknown,
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f64, max_output_tokens: u32) -> Result<String> {
        let (text, _) = self.chat_with_tools(messages, &[], temperature).await?;
        let _ = max_output_tokens;
        Ok(text)
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)> {
        let (system, anthropic_messages) = Self::split_system(messages);
        let request = AnthropicRequest {
            model: self.config.default_model.clone(),
            max_tokens: 4096,
            temperature,
            system,
            messages: anthropic_messages,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm_failure(format!("anthropic returned {status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_failure(format!("invalid anthropic response: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                AnthropicContentBlock::Unknown => {}
            }
        }

        Ok((text, tool_calls))
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

/// OpenAI-compatible chat-completions client (works for OpenAI and
/// OpenAI-compatible gateways).
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolDef {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAIFunctionDef,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    temperature: f64,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAIToolDef>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: OpenAIUsage,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f64, max_output_tokens: u32) -> Result<String> {
        let (text, _) = self.chat_with_tools(messages, &[], temperature).await?;
        let _ = max_output_tokens;
        Ok(text)
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)> {
        let request = OpenAIRequest {
            model: self.config.default_model.clone(),
            temperature,
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: role_str(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            tools: tools
                .iter()
                .map(|t| OpenAIToolDef {
                    kind: "function",
                    function: OpenAIFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url()))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm_failure(format!("openai returned {status}: {body}")));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| Error::llm_failure(format!("invalid openai response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_failure("openai response had no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok((choice.message.content.unwrap_or_default(), tool_calls))
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}

/// Always-unavailable client; used when no LLM is configured so the engine
/// routes straight to the deterministic fallback path.
pub struct NullLlmClient;

#[async_trait]
impl LLMClient for NullLlmClient {
    async fn chat(&self, _messages: &[ChatMessage], _temperature: f64, _max_output_tokens: u32) -> Result<String> {
        Err(Error::llm_failure("no LLM client configured"))
    }

    async fn chat_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)> {
        Err(Error::llm_failure("no LLM client configured"))
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

/// A queue of canned responses, consumed in order. Used by tests to replay
/// literal end-to-end scenarios without a network call.
pub struct ScriptedLlmClient {
    responses: Mutex<std::collections::VecDeque<ScriptedResponse>>,
}

pub enum ScriptedResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLlmClient {
    async fn chat(&self, _messages: &[ChatMessage], _temperature: f64, _max_output_tokens: u32) -> Result<String> {
        let (text, _) = self.chat_with_tools(&[], &[], 0.0).await?;
        Ok(text)
    }

    async fn chat_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)> {
        let mut queue = self.responses.lock().await;
        match queue.pop_front() {
            Some(ScriptedResponse::Text(text)) => Ok((text, Vec::new())),
            Some(ScriptedResponse::ToolCalls(calls)) => Ok((String::new(), calls)),
            None => Err(Error::llm_failure("scripted client exhausted")),
        }
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

/// Wraps any `LLMClient` and records token/cost usage into a shared tracker.
pub struct TrackedClient<C: LLMClient> {
    inner: C,
    model: ModelSpec,
    tracker: Arc<Mutex<CostTracker>>,
}

impl<C: LLMClient> TrackedClient<C> {
    pub fn new(inner: C, model: ModelSpec, tracker: Arc<Mutex<CostTracker>>) -> Self {
        Self { inner, model, tracker }
    }
}

#[async_trait]
impl<C: LLMClient> LLMClient for TrackedClient<C> {
    async fn chat(&self, messages: &[ChatMessage], temperature: f64, max_output_tokens: u32) -> Result<String> {
        self.inner.chat(messages, temperature, max_output_tokens).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f64,
    ) -> Result<(String, Vec<ToolCall>)> {
        let result = self.inner.chat_with_tools(messages, tools, temperature).await?;
        let approx_input: u64 = messages.iter().map(|m| (m.content.len() / 4) as u64).sum();
        let approx_output = (result.0.len() / 4) as u64;
        let usage = TokenUsage {
            input_tokens: approx_input,
            output_tokens: approx_output,
        };
        let cost = self.model.calculate_cost(usage.input_tokens, usage.output_tokens);
        self.tracker.lock().await.record(&self.model.id, &usage, Some(cost));
        Ok(result)
    }

    fn provider(&self) -> Provider {
        self.inner.provider()
    }
}

/// Batch-embedding contract.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed up to 25 strings at a time internally; failures return `Ok(vec![])`
    /// rather than propagating past the skill boundary.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Always-empty embedding client, used when no embedding API is configured.
pub struct NullEmbeddingClient;

#[async_trait]
impl EmbeddingClient for NullEmbeddingClient {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }
}

/// HTTP-backed embedding client batching requests at `BATCH_SIZE` strings.
pub struct HttpEmbeddingClient {
    config: ClientConfig,
    http: Client,
}

impl HttpEmbeddingClient {
    const BATCH_SIZE: usize = 25;

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(Self::BATCH_SIZE) {
            let request = EmbeddingApiRequest {
                model: &self.config.default_model,
                input: chunk,
            };
            let response = match self
                .http
                .post(format!(
                    "{}/v1/embeddings",
                    self.config.base_url.as_deref().unwrap_or("https://api.openai.com")
                ))
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(_) => return Ok(Vec::new()),
            };
            if !response.status().is_success() {
                return Ok(Vec::new());
            }
            match response.json::<EmbeddingApiResponse>().await {
                Ok(parsed) => out.extend(parsed.data.into_iter().map(|d| d.embedding)),
                Err(_) => return Ok(Vec::new()),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_always_fails() {
        let client = NullLlmClient;
        let err = client.chat(&[], 0.0, 100).await.unwrap_err();
        assert!(matches!(err, Error::LlmFailure(_)));
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order() {
        let client = ScriptedLlmClient::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "1".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::Text("[]".to_string()),
        ]);
        let (_, calls) = client.chat_with_tools(&[], &[], 0.1).await.unwrap();
        assert_eq!(calls.len(), 1);
        let (text, calls) = client.chat_with_tools(&[], &[], 0.1).await.unwrap();
        assert_eq!(text, "[]");
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn null_embedding_client_returns_empty() {
        let client = NullEmbeddingClient;
        let result = client.embed(&["a".to_string()]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn tracked_client_records_usage() {
        let tracker = Arc::new(Mutex::new(CostTracker::default()));
        let tracked = TrackedClient::new(
            ScriptedLlmClient::new(vec![ScriptedResponse::Text("hello there".to_string())]),
            ModelSpec::claude_haiku(),
            tracker.clone(),
        );
        let _ = tracked
            .chat_with_tools(&[ChatMessage::user("hi")], &[], 0.1)
            .await
            .unwrap();
        let snapshot = tracker.lock().await;
        assert_eq!(snapshot.request_count, 1);
    }
}
