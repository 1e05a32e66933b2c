//! ReAct Agent Loop: per-clause LLM-driven tool loop, dispatching
//! concurrent tool calls through the skill registry until the model stops
//! requesting tools or a hard per-clause timeout fires the deterministic
//! fallback path.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, LLMClient, ToolCall, ToolDefinition};
use crate::model::ClauseFindings;
use crate::skills::{SkillRegistry, SkillResult};
use crate::trajectory::TrajectoryEvent;

const TOOL_RESULT_CHAR_LIMIT: usize = 3000;

/// The directive every ReAct prompt opens with: instructs the
/// model to use tools to gather grounding context before rendering findings,
/// and to stop calling tools once it has enough to answer.
pub const REACT_SYSTEM_DIRECTIVE: &str = "You are reviewing one clause of a contract. \
    Use the available tools to gather whatever context you need — the clause's own \
    text and surroundings, relevant defined terms, baseline comparisons, and \
    cross-reference validity — before forming an opinion. Call tools concurrently \
    when they are independent of each other. Once you have enough information, stop \
    calling tools and respond with a final JSON object describing risks, deviations, \
    and proposed diffs for this clause. Do not call a tool you have already called \
    with the same arguments.";

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}

fn tool_result_message(call: &ToolCall, result: &crate::skills::SkillResult) -> ChatMessage {
    let serialized = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    ChatMessage::tool_result(call.id.clone(), truncate_chars(&serialized, TOOL_RESULT_CHAR_LIMIT))
}

/// Hashes a tool name and its raw argument string so repeated calls with
/// the same arguments can be recognized without re-parsing JSON.
fn call_signature(name: &str, arguments: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(arguments.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Dispatches each call through the skill registry, except calls whose
/// `(name, arguments)` signature is already in `seen` — the system
/// directive asks the model not to repeat those, but enforces it here
/// instead of trusting the model to comply.
async fn dispatch_tool_calls(
    registry: &SkillRegistry,
    calls: &[ToolCall],
    seen: &mut HashSet<String>,
) -> Vec<(ToolCall, SkillResult)> {
    let is_fresh: Vec<bool> = calls
        .iter()
        .map(|call| seen.insert(call_signature(&call.name, &call.arguments)))
        .collect();

    let futures = calls.iter().zip(&is_fresh).map(|(call, fresh)| async move {
        let result = if *fresh {
            let arguments: serde_json::Value = serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
            registry.prepare_and_call(&call.name, arguments).await
        } else {
            SkillResult::err(format!("{} already called with these arguments", call.name), 0)
        };
        (call.clone(), result)
    });
    join_all(futures).await
}

/// Run the ReAct loop for one clause. `tools` is the (optionally
/// domain-filtered) tool catalog offered to the model; `max_iterations`
/// bounds the loop per the clause's `ClauseAnalysisPlan`.
pub async fn run_react_loop(
    llm: Arc<dyn LLMClient>,
    registry: &SkillRegistry,
    clause_id: &str,
    clause_text: &str,
    tools: &[ToolDefinition],
    max_iterations: u32,
    temperature: f64,
    clause_timeout: Duration,
) -> Result<(
    ClauseFindings,
    std::collections::HashMap<String, serde_json::Value>,
    Vec<TrajectoryEvent>,
    Vec<ChatMessage>,
)> {
    let start = Instant::now();
    let mut events = Vec::new();
    let mut skill_context: std::collections::HashMap<String, serde_json::Value> = std::collections::HashMap::new();
    let mut messages = vec![
        ChatMessage::system(REACT_SYSTEM_DIRECTIVE),
        ChatMessage::user(format!("Clause {clause_id}:\n\n{clause_text}")),
    ];
    let mut called_signatures: HashSet<String> = HashSet::new();

    let outcome = tokio::time::timeout(clause_timeout, async {
        for iteration in 0..max_iterations {
            if start.elapsed() >= clause_timeout {
                return Err(Error::llm_failure("react loop exceeded clause timeout"));
            }
            let iter_start = Instant::now();
            let (text, tool_calls) = llm.chat_with_tools(&messages, tools, temperature).await?;

            if tool_calls.is_empty() {
                events.push(TrajectoryEvent::react_iteration(
                    clause_id,
                    iteration,
                    0,
                    iter_start.elapsed().as_millis() as u64,
                ));
                let findings = parse_findings(clause_id, &text)?;
                messages.push(ChatMessage::assistant(text));
                return Ok(findings);
            }

            messages.push(ChatMessage::assistant_with_tool_calls(text, tool_calls.clone()));
            let results = dispatch_tool_calls(registry, &tool_calls, &mut called_signatures).await;
            for (call, result) in &results {
                messages.push(tool_result_message(call, result));
                if let Some(data) = &result.data {
                    if result.success {
                        skill_context.insert(call.name.clone(), data.clone());
                    }
                }
            }
            events.push(TrajectoryEvent::react_iteration(
                clause_id,
                iteration,
                tool_calls.len(),
                iter_start.elapsed().as_millis() as u64,
            ));
        }
        Err(Error::llm_failure(format!(
            "react loop for clause {clause_id} exhausted {max_iterations} iterations without a final answer"
        )))
    })
    .await;

    match outcome {
        Ok(Ok(findings)) => Ok((findings, skill_context, events, messages)),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Err(Error::llm_failure(format!(
            "react loop for clause {clause_id} exceeded the per-clause timeout"
        ))),
    }
}

fn parse_findings(clause_id: &str, text: &str) -> Result<ClauseFindings> {
    let value = crate::signature::extract_json(text)?;
    let mut findings = ClauseFindings::new(clause_id);
    findings.risks = value
        .get("risks")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    findings.deviations = value
        .get("deviations")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    findings.diffs = value
        .get("diffs")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    findings.notes = value.get("notes").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    findings.completed = true;
    findings.backfill_ids();
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedLlmClient, ScriptedResponse};
    use crate::model::{SkillBackend, SkillRegistration};

    fn registry_with_echo_tool() -> SkillRegistry {
        let mut registry = SkillRegistry::new();
        registry
            .register_local(
                SkillRegistration {
                    skill_id: "get_clause_context".to_string(),
                    name: "get_clause_context".to_string(),
                    description: "test".to_string(),
                    input_schema: serde_json::json!({"type": "object"}),
                    output_schema: serde_json::json!({"type": "object"}),
                    backend: SkillBackend::Local,
                    local_handler: Some("noop".to_string()),
                    remote_workflow_id: None,
                    domain: "generic".to_string(),
                    category: "navigation".to_string(),
                },
                Arc::new(Ok),
                Arc::new(|v| {
                    Box::pin(async move { Ok(serde_json::json!({"echo": v})) })
                        as crate::skills::SkillFuture
                }),
            )
            .unwrap();
        registry
    }

    fn registry_with_two_echo_tools() -> SkillRegistry {
        let mut registry = registry_with_echo_tool();
        registry
            .register_local(
                SkillRegistration {
                    skill_id: "resolve_definition".to_string(),
                    name: "resolve_definition".to_string(),
                    description: "test".to_string(),
                    input_schema: serde_json::json!({"type": "object"}),
                    output_schema: serde_json::json!({"type": "object"}),
                    backend: SkillBackend::Local,
                    local_handler: Some("noop".to_string()),
                    remote_workflow_id: None,
                    domain: "generic".to_string(),
                    category: "navigation".to_string(),
                },
                Arc::new(Ok),
                Arc::new(|v| {
                    Box::pin(async move { Ok(serde_json::json!({"echo": v})) })
                        as crate::skills::SkillFuture
                }),
            )
            .unwrap();
        registry
    }

    #[test]
    fn call_signature_differs_by_name_and_by_arguments() {
        let a = call_signature("get_clause_context", "{\"clause_id\":\"1\"}");
        let b = call_signature("get_clause_context", "{\"clause_id\":\"2\"}");
        let c = call_signature("resolve_definition", "{\"clause_id\":\"1\"}");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, call_signature("get_clause_context", "{\"clause_id\":\"1\"}"));
    }

    #[tokio::test]
    async fn immediate_final_answer_short_circuits_the_loop() {
        let response = serde_json::json!({"risks": [], "deviations": [], "diffs": [], "notes": "fine"}).to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let registry = registry_with_echo_tool();
        let (findings, skill_context, events, messages) = run_react_loop(
            llm,
            &registry,
            "1.1",
            "clause text",
            &[],
            3,
            0.0,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(findings.completed);
        assert_eq!(findings.notes, "fine");
        assert_eq!(events.len(), 1);
        assert!(skill_context.is_empty());
        assert_eq!(messages.len(), 3); // system, user, final assistant
    }

    #[tokio::test]
    async fn tool_call_then_final_answer_runs_two_iterations() {
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::Text(
                serde_json::json!({"risks": [], "deviations": [], "diffs": [], "notes": "done"}).to_string(),
            ),
        ]));
        let registry = registry_with_echo_tool();
        let (findings, skill_context, events, messages) = run_react_loop(
            llm,
            &registry,
            "1.1",
            "clause text",
            &[],
            3,
            0.0,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(findings.completed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.get("tools_called").unwrap(), &serde_json::Value::from(1u64));
        assert_eq!(skill_context.len(), 1);
        assert!(skill_context.contains_key("get_clause_context"));
        // system, user, assistant(tool call), tool result, final assistant
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn repeating_a_call_with_the_same_arguments_is_not_dispatched_twice() {
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-2".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::Text(
                serde_json::json!({"risks": [], "deviations": [], "diffs": [], "notes": "done"}).to_string(),
            ),
        ]));
        let registry = registry_with_echo_tool();
        let (findings, skill_context, events, _messages) =
            run_react_loop(llm, &registry, "1.1", "clause text", &[], 3, 0.0, Duration::from_secs(5))
                .await
                .unwrap();
        assert!(findings.completed);
        assert_eq!(skill_context.len(), 1);
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn skill_context_has_exactly_one_entry_per_distinct_tool_called() {
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedResponse::ToolCalls(vec![
                ToolCall {
                    id: "call-1".to_string(),
                    name: "get_clause_context".to_string(),
                    arguments: "{}".to_string(),
                },
                ToolCall {
                    id: "call-2".to_string(),
                    name: "resolve_definition".to_string(),
                    arguments: "{}".to_string(),
                },
            ]),
            ScriptedResponse::Text(
                serde_json::json!({"risks": [], "deviations": [], "diffs": [], "notes": "done"}).to_string(),
            ),
        ]));
        let registry = registry_with_two_echo_tools();
        let (findings, skill_context, _events, _messages) =
            run_react_loop(llm, &registry, "1.1", "clause text", &[], 3, 0.0, Duration::from_secs(5))
                .await
                .unwrap();
        assert!(findings.completed);
        assert_eq!(skill_context.len(), 2);
        assert!(skill_context.contains_key("get_clause_context"));
        assert!(skill_context.contains_key("resolve_definition"));
    }

    #[tokio::test]
    async fn exhausting_max_iterations_without_final_answer_is_an_error() {
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ScriptedResponse::ToolCalls(vec![ToolCall {
                id: "call-2".to_string(),
                name: "get_clause_context".to_string(),
                arguments: "{}".to_string(),
            }]),
        ]));
        let registry = registry_with_echo_tool();
        let result = run_react_loop(llm, &registry, "1.1", "clause text", &[], 2, 0.0, Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
