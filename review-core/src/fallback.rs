//! Deterministic Fallback Path: a no-LLM per-clause analysis
//! used when the ReAct loop fails, times out, or is disabled by
//! `ExecutionMode::Legacy`. Runs every required skill once, deterministically,
//! and returns whatever they find with no risk inference of its own.

use crate::model::{ClauseFindings, ClauseNode, DocumentStructure};
use crate::skills::SkillRegistry;
use crate::trajectory::TrajectoryEvent;

/// Resolve a clause's text the same way `get_clause_context` would, without
/// going through the skill dispatcher — used when the clause itself is the
/// skill input source.
fn resolve_clause_text(structure: &DocumentStructure, clause_id: &str) -> Option<String> {
    structure.find_clause(clause_id).map(ClauseNode::full_text)
}

/// Run the deterministic fallback path for one clause: call every skill in
/// `required_skills` once via `prepare_and_call`, collecting their raw
/// output into `skill_context`. No risks or diffs are produced here — those
/// are left to a later deterministic pass or to human review; the fallback's
/// job is only to populate context a human reviewer can read.
pub async fn run_deterministic_fallback(
    registry: &SkillRegistry,
    structure: &DocumentStructure,
    clause_id: &str,
    required_skills: &[String],
    reason: &str,
) -> (ClauseFindings, std::collections::HashMap<String, serde_json::Value>, TrajectoryEvent) {
    let mut findings = ClauseFindings::new(clause_id);
    let mut skill_context = std::collections::HashMap::new();

    let clause_text = resolve_clause_text(structure, clause_id);
    let mut notes_parts = Vec::new();

    for skill_id in required_skills {
        let arguments = default_arguments(skill_id, clause_id, clause_text.as_deref());
        let result = registry.prepare_and_call(skill_id, arguments).await;
        if !result.success {
            notes_parts.push(format!("{skill_id}: {}", result.error.clone().unwrap_or_default()));
        }
        if let Some(data) = result.data.clone() {
            skill_context.insert(skill_id.clone(), data);
        }
    }

    findings.notes = if notes_parts.is_empty() {
        "deterministic fallback: no risk inference performed, see skill_context".to_string()
    } else {
        format!(
            "deterministic fallback: no risk inference performed; skill errors: {}",
            notes_parts.join("; ")
        )
    };
    findings.completed = true;

    let event = TrajectoryEvent::fallback_triggered(clause_id, reason);
    (findings, skill_context, event)
}

fn default_arguments(skill_id: &str, clause_id: &str, clause_text: Option<&str>) -> serde_json::Value {
    match skill_id {
        "fidic_merge_gc_pc" => serde_json::json!({"clause_id": clause_id}),
        "fidic_search_er" => serde_json::json!({"query": clause_text.unwrap_or_default()}),
        "fidic_check_pc_consistency" => serde_json::json!({
            "clause_id": clause_id,
            "pc_text": clause_text.unwrap_or_default(),
        }),
        _ => serde_json::json!({"clause_id": clause_id}),
    }
}
