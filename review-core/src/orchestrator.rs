//! Orchestrator: the LLM-driven planner that turns a review
//! checklist into a `ReviewPlan` up front, and revisits that plan at the
//! midpoint of the run if clause analysis is surfacing more risk than
//! expected.

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{ChatMessage, LLMClient};
use crate::model::{AnalysisDepth, ClauseAnalysisPlan, Risk, ReviewChecklistItem, ReviewPlan};
use crate::signature::extract_json;

const MAX_ADJUSTMENT_RISKS: usize = 5;
const MAX_ADJUSTMENT_REMAINING_ENTRIES: usize = 10;

fn default_plan_entry(item: &ReviewChecklistItem, priority_order: u32) -> ClauseAnalysisPlan {
    let depth = match item.priority {
        crate::model::Priority::Critical | crate::model::Priority::High => AnalysisDepth::Deep,
        crate::model::Priority::Medium => AnalysisDepth::Standard,
        crate::model::Priority::Low => AnalysisDepth::Quick,
    };
    ClauseAnalysisPlan {
        clause_id: item.clause_id.clone(),
        analysis_depth: depth,
        suggested_tools: item.required_skills.clone(),
        max_iterations: depth.default_max_iterations(),
        priority_order,
        rationale: "default plan: depth derived from checklist priority".to_string(),
        skip_diffs: false,
        skip_validate: false,
    }
}

/// Build the deterministic default plan: one entry per checklist item,
/// ordered as given, depth derived from priority.
pub fn default_review_plan(checklist: &[ReviewChecklistItem]) -> ReviewPlan {
    let mut plan = ReviewPlan::new("default: priority-derived depth, checklist order");
    for (i, item) in checklist.iter().enumerate() {
        plan.entries.insert(item.clause_id.clone(), default_plan_entry(item, i as u32));
    }
    plan
}

fn plan_prompt(checklist: &[ReviewChecklistItem]) -> Vec<ChatMessage> {
    let instructions = "You are planning a contract review. For each checklist item \
        below, decide an analysis_depth (quick, standard, or deep), which suggested \
        tools (skill ids) are likely relevant, and a priority_order (lower runs \
        first). Respond with JSON: {\"global_strategy\": string, \"entries\": \
        {\"<clause_id>\": {\"analysis_depth\": string, \"suggested_tools\": \
        [string], \"priority_order\": integer, \"rationale\": string, \
        \"skip_diffs\": bool, \"skip_validate\": bool}}}.";
    let checklist_json = serde_json::to_string(checklist).unwrap_or_default();
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!("Checklist:\n{checklist_json}")),
    ]
}

fn plan_from_json(value: &Value, checklist: &[ReviewChecklistItem]) -> Option<ReviewPlan> {
    let entries_value = value.get("entries")?.as_object()?;
    let global_strategy = value
        .get("global_strategy")
        .and_then(Value::as_str)
        .unwrap_or("llm-generated plan")
        .to_string();
    let mut plan = ReviewPlan::new(global_strategy);
    for (i, item) in checklist.iter().enumerate() {
        let Some(entry) = entries_value.get(&item.clause_id) else {
            plan.entries.insert(item.clause_id.clone(), default_plan_entry(item, i as u32));
            continue;
        };
        let depth = entry
            .get("analysis_depth")
            .and_then(Value::as_str)
            .map(AnalysisDepth::parse_or_default)
            .unwrap_or(AnalysisDepth::Standard);
        let suggested_tools = entry
            .get("suggested_tools")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_else(|| item.required_skills.clone());
        let priority_order = entry.get("priority_order").and_then(Value::as_u64).unwrap_or(i as u64) as u32;
        plan.entries.insert(
            item.clause_id.clone(),
            ClauseAnalysisPlan {
                clause_id: item.clause_id.clone(),
                analysis_depth: depth,
                suggested_tools,
                max_iterations: depth.default_max_iterations(),
                priority_order,
                rationale: entry
                    .get("rationale")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                skip_diffs: entry.get("skip_diffs").and_then(Value::as_bool).unwrap_or(false),
                skip_validate: entry.get("skip_validate").and_then(Value::as_bool).unwrap_or(false),
            },
        );
    }
    Some(plan)
}

/// Generate the initial review plan for `checklist`. Falls back to `default_review_plan` on any LLM failure or
/// unparseable response.
pub async fn generate_review_plan(llm: Arc<dyn LLMClient>, checklist: &[ReviewChecklistItem]) -> ReviewPlan {
    if checklist.is_empty() {
        return ReviewPlan::new("empty checklist");
    }
    let messages = plan_prompt(checklist);
    match llm.chat(&messages, 0.2, 4096).await {
        Ok(response) => extract_json(&response)
            .ok()
            .and_then(|v| plan_from_json(&v, checklist))
            .unwrap_or_else(|| default_review_plan(checklist)),
        Err(_) => default_review_plan(checklist),
    }
}

/// Whether the run has reached the exact integer-division midpoint of the
/// checklist — one of the two triggers `maybe_adjust_plan` checks before
/// spending an LLM call.
pub fn is_plan_adjustment_checkpoint(completed_count: usize, total_count: usize) -> bool {
    total_count > 0 && completed_count == total_count / 2
}

fn has_high_risk_finding(risks: &[Risk]) -> bool {
    risks.iter().any(|r| {
        let level = r.risk_level.to_ascii_lowercase();
        level == "high" || level == "critical"
    })
}

/// Whether `maybe_adjust_plan` should spend an LLM call at all: a high or
/// critical risk was just found, or the run is at the checklist's midpoint
/// ("triggers an LLM call only when a high-risk finding was
/// observed OR when completed_count == total_count/2").
pub fn should_trigger_plan_adjustment(current_risks: &[Risk], completed_count: usize, total_count: usize) -> bool {
    has_high_risk_finding(current_risks) || is_plan_adjustment_checkpoint(completed_count, total_count)
}

fn adjustment_prompt(checklist: &[ReviewChecklistItem], plan: &ReviewPlan, current_risks: &[Risk]) -> Vec<ChatMessage> {
    let instructions = "You are partway through a contract review. Given the risks \
        found so far, decide whether any remaining clauses need a deeper analysis \
        pass than originally planned. Respond with JSON: {\"entries\": \
        {\"<clause_id>\": {\"analysis_depth\": string}}} listing only the clauses \
        whose depth should change. Return {\"entries\": {}} if no change is needed.";
    let remaining: Vec<&ReviewChecklistItem> = checklist
        .iter()
        .filter(|c| plan.get(&c.clause_id).map(|p| p.priority_order).unwrap_or(0) as usize >= checklist.len() / 2)
        .take(MAX_ADJUSTMENT_REMAINING_ENTRIES)
        .collect();
    let abbreviated_risks: Vec<&Risk> = current_risks.iter().take(MAX_ADJUSTMENT_RISKS).collect();
    let risks_json = serde_json::to_string(&abbreviated_risks).unwrap_or_default();
    let remaining_json = serde_json::to_string(&remaining).unwrap_or_default();
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!("Risks found so far:\n{risks_json}\n\nRemaining checklist items:\n{remaining_json}")),
    ]
}

/// Apply a plan adjustment in place, bumping the analysis depth of whichever
/// clauses the LLM flags. Does nothing — not
/// even an LLM call — unless `should_trigger_plan_adjustment` says to. On
/// any LLM failure the plan is left unchanged — a missed adjustment
/// degrades gracefully, unlike a missed initial plan.
pub async fn maybe_adjust_plan(
    llm: Arc<dyn LLMClient>,
    checklist: &[ReviewChecklistItem],
    plan: &mut ReviewPlan,
    current_risks: &[Risk],
    completed_count: usize,
    total_count: usize,
) {
    if !should_trigger_plan_adjustment(current_risks, completed_count, total_count) {
        return;
    }
    let messages = adjustment_prompt(checklist, plan, current_risks);
    let Ok(response) = llm.chat(&messages, 0.2, 2048).await else { return };
    let Ok(value) = extract_json(&response) else { return };
    let Some(entries) = value.get("entries").and_then(Value::as_object) else { return };
    for (clause_id, entry) in entries {
        let Some(depth_str) = entry.get("analysis_depth").and_then(Value::as_str) else { continue };
        let depth = AnalysisDepth::parse_or_default(depth_str);
        if let Some(existing) = plan.entries.get_mut(clause_id) {
            existing.analysis_depth = depth;
            existing.max_iterations = depth.default_max_iterations();
        }
    }
    plan.plan_version += 1;
}
