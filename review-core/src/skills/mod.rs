//! Skill registry and dispatcher: the function-calling surface
//! every LLM-driven component (ReAct loop, deterministic fallback) goes
//! through to touch the document, the baseline, or the FIDIC-specific
//! domain tools.
//!
//! A skill is registered once with an `input_schema`/`output_schema` pair
//! and a backend (`Local` dispatches straight to an in-process handler,
//! `Remote` is reserved for a future out-of-process workflow runner — no
//! remote backend ships here, per the non-goal on persistent task storage
//! and external transports).

mod local;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::model::{SkillBackend, SkillRegistration};

pub use local::{register_builtin_skills, SkillContext};

/// Outcome of one skill invocation, returned to the ReAct loop as a tool
/// result message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SkillResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl SkillResult {
    pub fn ok(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time_ms,
        }
    }

    pub fn err(message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            execution_time_ms,
        }
    }
}

/// A local skill's prepare+execute pair. `prepare` normalizes the raw
/// tool-call arguments (defaulting, coercion) before `execute` runs; keeping
/// them separate lets the deterministic fallback path call
/// `prepare_and_call` with a synthetic argument map instead of one parsed
/// from an LLM tool call. `execute` is async — skills such as
/// `fidic_search_er` and `load_review_criteria` call out to an embedding
/// API or the LLM client.
pub type SkillFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type PrepareFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
pub type ExecuteFn = Arc<dyn Fn(Value) -> SkillFuture + Send + Sync>;

struct LocalSkill {
    prepare: PrepareFn,
    execute: ExecuteFn,
}

/// The skill registry: owns every `SkillRegistration` plus, for local
/// backends, the prepare/execute closures that actually run them.
#[derive(Default)]
pub struct SkillRegistry {
    registrations: HashMap<String, SkillRegistration>,
    local_skills: HashMap<String, LocalSkill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local skill. Returns an error if `registration.backend`
    /// is not `Local` or `registration.local_handler` is unset — the
    /// registration contract requires both.
    pub fn register_local(
        &mut self,
        registration: SkillRegistration,
        prepare: PrepareFn,
        execute: ExecuteFn,
    ) -> Result<()> {
        if registration.backend != SkillBackend::Local {
            return Err(Error::configuration(format!(
                "skill {} registered as local but backend is {:?}",
                registration.skill_id, registration.backend
            )));
        }
        if registration.local_handler.is_none() {
            return Err(Error::configuration(format!(
                "skill {} missing local_handler",
                registration.skill_id
            )));
        }
        let skill_id = registration.skill_id.clone();
        self.local_skills.insert(skill_id.clone(), LocalSkill { prepare, execute });
        self.registrations.insert(skill_id, registration);
        Ok(())
    }

    pub fn get(&self, skill_id: &str) -> Option<&SkillRegistration> {
        self.registrations.get(skill_id)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Tool definitions for every registered skill whose domain is `"*"`
    /// (universal) or matches `domain_filter`, for passing to
    /// `chat_with_tools`. No filter returns every registered skill.
    pub fn get_tool_definitions(&self, domain_filter: Option<&str>) -> Vec<ToolDefinition> {
        let mut out: Vec<ToolDefinition> = self
            .registrations
            .values()
            .filter(|r| domain_filter.map(|d| r.domain == "*" || r.domain == d).unwrap_or(true))
            .map(to_tool_definition)
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Normalize `raw_arguments` via the skill's `prepare` step then run
    /// `execute`, timing the whole call. Used both by the ReAct loop's tool
    /// dispatch and by the deterministic fallback path.
    pub async fn prepare_and_call(&self, skill_id: &str, raw_arguments: Value) -> SkillResult {
        let start = Instant::now();
        let Some(skill) = self.local_skills.get(skill_id) else {
            return SkillResult::err(
                format!("unknown or non-local skill: {skill_id}"),
                start.elapsed().as_millis() as u64,
            );
        };
        let input = match (skill.prepare)(raw_arguments) {
            Ok(input) => input,
            Err(e) => return SkillResult::err(e.to_string(), start.elapsed().as_millis() as u64),
        };
        match (skill.execute)(input).await {
            Ok(data) => SkillResult::ok(data, start.elapsed().as_millis() as u64),
            Err(e) => SkillResult::err(e.to_string(), start.elapsed().as_millis() as u64),
        }
    }
}

fn to_tool_definition(registration: &SkillRegistration) -> ToolDefinition {
    ToolDefinition {
        name: registration.skill_id.clone(),
        description: registration.description.clone(),
        parameters: registration.input_schema.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkillBackend;

    fn dummy_registration(skill_id: &str) -> SkillRegistration {
        SkillRegistration {
            skill_id: skill_id.to_string(),
            name: skill_id.to_string(),
            description: "test skill".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            backend: SkillBackend::Local,
            local_handler: Some("noop".to_string()),
            remote_workflow_id: None,
            domain: "generic".to_string(),
            category: "test".to_string(),
        }
    }

    fn sync_ok(v: Value) -> SkillFuture {
        Box::pin(async move { Ok(v) })
    }

    #[test]
    fn registering_without_local_handler_fails() {
        let mut registry = SkillRegistry::new();
        let mut reg = dummy_registration("x");
        reg.local_handler = None;
        let result = registry.register_local(reg, Arc::new(Ok), Arc::new(sync_ok));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn prepare_and_call_runs_prepare_then_execute() {
        let mut registry = SkillRegistry::new();
        registry
            .register_local(
                dummy_registration("echo"),
                Arc::new(|v| Ok(v)),
                Arc::new(|v: Value| Box::pin(async move { Ok(serde_json::json!({"echoed": v})) }) as SkillFuture),
            )
            .unwrap();
        let result = registry.prepare_and_call("echo", serde_json::json!({"a": 1})).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["echoed"]["a"], 1);
    }

    #[tokio::test]
    async fn unknown_skill_returns_error_result_not_panic() {
        let registry = SkillRegistry::new();
        let result = registry.prepare_and_call("nope", serde_json::json!({})).await;
        assert!(!result.success);
    }

    #[test]
    fn tool_definitions_filter_by_domain() {
        let mut registry = SkillRegistry::new();
        let mut fidic_reg = dummy_registration("fidic_thing");
        fidic_reg.domain = "fidic".to_string();
        registry
            .register_local(fidic_reg, Arc::new(Ok), Arc::new(sync_ok))
            .unwrap();
        registry
            .register_local(dummy_registration("generic_thing"), Arc::new(Ok), Arc::new(sync_ok))
            .unwrap();
        let fidic_only = registry.get_tool_definitions(Some("fidic"));
        assert_eq!(fidic_only.len(), 1);
        assert_eq!(fidic_only[0].name, "fidic_thing");
        assert_eq!(registry.get_tool_definitions(None).len(), 2);
    }

    #[test]
    fn universal_skills_match_any_domain_filter() {
        let mut registry = SkillRegistry::new();
        let mut universal_reg = dummy_registration("universal_thing");
        universal_reg.domain = "*".to_string();
        registry
            .register_local(universal_reg, Arc::new(Ok), Arc::new(sync_ok))
            .unwrap();
        let mut fidic_reg = dummy_registration("fidic_thing");
        fidic_reg.domain = "fidic".to_string();
        registry
            .register_local(fidic_reg, Arc::new(Ok), Arc::new(sync_ok))
            .unwrap();
        let fidic_only = registry.get_tool_definitions(Some("fidic"));
        assert_eq!(fidic_only.len(), 2);
        let spa_only = registry.get_tool_definitions(Some("spa"));
        assert_eq!(spa_only.len(), 1);
        assert_eq!(spa_only[0].name, "universal_thing");
    }
}
