//! The Review Graph: the nine-node state machine that drives one
//! review task from upload to summary, pausing at a checkpointed interrupt
//! boundary whenever a diff needs a human decision.
//!
//! Nodes never talk to each other directly — each one reads `ReviewGraphState`,
//! does its work, and returns the whole state back to `run_graph`, which
//! decides the next node via the conditional-edge router functions below.
//! This mirrors the explicit state-patch style the rest of the engine uses
//! (clause findings keyed by id, never a pointer into the tree).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::fallback::run_deterministic_fallback;
use crate::llm::{ChatMessage, LLMClient};
use crate::model::{DiffActionType, DiffStatus, DocumentDiff, ExecutionMode, ReviewGraphState, Risk, UserDecision};
use crate::orchestrator;
use crate::react::run_react_loop;
use crate::skills::SkillRegistry;
use crate::trajectory::TrajectoryEvent;

/// The nine nodes of the review graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphNode {
    Init,
    ParseDocument,
    PlanReview,
    ClauseAnalyze,
    ClauseGenerateDiffs,
    ClauseValidate,
    HumanApproval,
    SaveClause,
    Summarize,
}

/// Persists graph state at the human-approval interrupt boundary so a run
/// can be resumed later, out of process if need be. No concrete backend
/// ships here (no persistent task storage, per the non-goal) — callers
/// supply their own, e.g. an in-memory map for tests or a caller-owned store.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, task_id: &str, node: GraphNode, state: &ReviewGraphState) -> Result<()>;
    async fn load(&self, task_id: &str) -> Result<Option<(GraphNode, ReviewGraphState)>>;
}

/// A `Checkpointer` that keeps everything in memory, useful for tests and
/// single-process deployments where durability across restarts isn't needed.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: tokio::sync::Mutex<std::collections::HashMap<String, (GraphNode, ReviewGraphState)>>,
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, task_id: &str, node: GraphNode, state: &ReviewGraphState) -> Result<()> {
        self.inner.lock().await.insert(task_id.to_string(), (node, state.clone()));
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<(GraphNode, ReviewGraphState)>> {
        Ok(self.inner.lock().await.get(task_id).cloned())
    }
}

/// Everything a running graph needs besides the state it's mutating.
pub struct GraphRuntime {
    pub llm: Arc<dyn LLMClient>,
    pub skills: Arc<SkillRegistry>,
    pub checkpointer: Arc<dyn Checkpointer>,
}

fn enter(state: &mut ReviewGraphState, node: GraphNode) {
    state.trajectory.push(TrajectoryEvent::node_enter(node_name(node)));
}

fn exit(state: &mut ReviewGraphState, node: GraphNode) {
    state.trajectory.push(TrajectoryEvent::node_exit(node_name(node)));
}

fn node_name(node: GraphNode) -> &'static str {
    match node {
        GraphNode::Init => "init",
        GraphNode::ParseDocument => "parse_document",
        GraphNode::PlanReview => "plan_review",
        GraphNode::ClauseAnalyze => "clause_analyze",
        GraphNode::ClauseGenerateDiffs => "clause_generate_diffs",
        GraphNode::ClauseValidate => "clause_validate",
        GraphNode::HumanApproval => "human_approval",
        GraphNode::SaveClause => "save_clause",
        GraphNode::Summarize => "summarize",
    }
}

async fn run_init(state: &mut ReviewGraphState) {
    enter(state, GraphNode::Init);
    state.is_complete = false;
    state.error = None;
    exit(state, GraphNode::Init);
}

async fn run_parse_document(state: &mut ReviewGraphState) -> Result<()> {
    enter(state, GraphNode::ParseDocument);
    let Some(primary) = state.documents.iter().find(|d| d.role == crate::model::DocumentRole::Primary) else {
        return Err(Error::parse_failure("task has no primary document"));
    };
    let Some(structure) = &primary.structure else {
        return Err(Error::parse_failure("primary document has not been parsed yet"));
    };
    state.primary_structure = Some(structure.clone());
    exit(state, GraphNode::ParseDocument);
    Ok(())
}

async fn run_plan_review(runtime: &GraphRuntime, state: &mut ReviewGraphState) {
    enter(state, GraphNode::PlanReview);
    let plan = orchestrator::generate_review_plan(runtime.llm.clone(), &state.review_checklist).await;
    state.plan_version = plan.plan_version;
    state.review_plan = Some(plan);
    exit(state, GraphNode::PlanReview);
}

fn current_clause_id(state: &ReviewGraphState) -> Option<String> {
    state
        .review_plan
        .as_ref()
        .map(|plan| plan.ordered_clause_ids(&state.review_checklist))
        .and_then(|ids| ids.get(state.current_clause_index).cloned())
        .or_else(|| state.review_checklist.get(state.current_clause_index).map(|c| c.clause_id.clone()))
}

async fn run_clause_analyze(runtime: &GraphRuntime, state: &mut ReviewGraphState) {
    enter(state, GraphNode::ClauseAnalyze);
    // Retry count resets on every fresh entry into clause_analyze, not on the outer loop's clause advance.
    state.clause_retry_count = 0;

    let Some(clause_id) = current_clause_id(state) else {
        exit(state, GraphNode::ClauseAnalyze);
        return;
    };
    state.current_clause_id = Some(clause_id.clone());

    let clause_text = state
        .primary_structure
        .as_ref()
        .and_then(|s| s.find_clause(&clause_id))
        .map(crate::model::ClauseNode::full_text)
        .unwrap_or_default();
    state.current_clause_text = Some(clause_text.clone());

    let plan_entry = state.review_plan.as_ref().and_then(|p| p.get(&clause_id)).cloned();
    let max_iterations = plan_entry.as_ref().map(|p| p.max_iterations).unwrap_or(3);
    let required_skills = plan_entry.map(|p| p.suggested_tools).unwrap_or_default();

    let should_use_react = state.execution_mode == ExecutionMode::Gen3;
    let tools = runtime.skills.get_tool_definitions(state.domain_id.as_deref());

    let outcome = if should_use_react {
        run_react_loop(
            runtime.llm.clone(),
            &runtime.skills,
            &clause_id,
            &clause_text,
            &tools,
            max_iterations,
            0.2,
            Duration::from_secs(120),
        )
        .await
    } else {
        Err(Error::internal("legacy execution mode always uses the deterministic path"))
    };

    // A successful ReAct run with an empty skill_context is treated the same
    // as a failure: it never actually grounded its answer in the document.
    let react_result = outcome.and_then(|(findings, skill_context, events, messages)| {
        if skill_context.is_empty() {
            Err(Error::llm_failure("react loop produced no grounded skill_context"))
        } else {
            Ok((findings, skill_context, events, messages))
        }
    });

    match react_result {
        Ok((findings, skill_context, events, messages)) => {
            state.current_risks = findings.risks.clone();
            state.current_skill_context = skill_context;
            state.findings.insert(clause_id.clone(), findings);
            state.trajectory.extend(events);
            state.agent_messages.extend(messages);
        }
        Err(e) => {
            state.trajectory.push(TrajectoryEvent::fallback_triggered(&clause_id, &e.to_string()));
            let (findings, skill_context, event) =
                run_deterministic_fallback(&runtime.skills, state.primary_structure.as_ref().unwrap(), &clause_id, &required_skills, &e.to_string())
                    .await;
            state.current_risks = findings.risks.clone();
            state.current_skill_context = skill_context;
            state.findings.insert(clause_id, findings);
            state.trajectory.push(event);
        }
    }

    exit(state, GraphNode::ClauseAnalyze);
}

fn redline_prompt(clause_id: &str, clause_text: &str, risks: &[Risk]) -> Vec<ChatMessage> {
    let instructions = "You are drafting contract redlines. For each risk below, propose \
        one edit that fixes it: an action_type (replace, delete, or insert), the \
        original_text it replaces (omit or null for insert), the proposed_text, and a \
        short reason. Respond with JSON: {\"diffs\": [{\"risk_id\": string, \
        \"action_type\": string, \"original_text\": string|null, \"proposed_text\": \
        string, \"reason\": string}]}.";
    let risks_json = serde_json::to_string(risks).unwrap_or_default();
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!("Clause {clause_id}:\n{clause_text}\n\nRisks:\n{risks_json}")),
    ]
}

fn parse_diff_action_type(raw: &str) -> Option<DiffActionType> {
    match raw.to_ascii_lowercase().as_str() {
        "replace" => Some(DiffActionType::Replace),
        "delete" => Some(DiffActionType::Delete),
        "insert" => Some(DiffActionType::Insert),
        _ => None,
    }
}

fn diffs_from_json(
    value: &Value,
    clause_id: &str,
    risk_level_by_id: &std::collections::HashMap<String, String>,
) -> Option<Vec<DocumentDiff>> {
    let entries = value.get("diffs")?.as_array()?;
    let mut diffs = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(action_type) = entry.get("action_type").and_then(Value::as_str).and_then(parse_diff_action_type) else {
            continue;
        };
        let risk_id = entry.get("risk_id").and_then(Value::as_str).unwrap_or_default().to_string();
        diffs.push(DocumentDiff {
            diff_id: uuid::Uuid::new_v4().to_string(),
            risk_id: if risk_id.is_empty() { None } else { Some(risk_id.clone()) },
            clause_id: clause_id.to_string(),
            action_type,
            original_text: entry.get("original_text").and_then(Value::as_str).map(str::to_string),
            proposed_text: entry.get("proposed_text").and_then(Value::as_str).map(str::to_string),
            reason: entry.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
            risk_level: risk_level_by_id.get(&risk_id).cloned().unwrap_or_else(|| "medium".to_string()),
            status: DiffStatus::Pending,
        });
    }
    Some(diffs)
}

/// For each current risk, ask the LLM to draft a redline fixing it. Falls
/// back to no diffs on any LLM failure or unparseable response — a clause
/// with risks but no diffs still reaches `clause_validate`, which passes it
/// through to human approval with nothing pending.
async fn run_clause_generate_diffs(runtime: &GraphRuntime, state: &mut ReviewGraphState) {
    enter(state, GraphNode::ClauseGenerateDiffs);
    if let Some(clause_id) = state.current_clause_id.clone() {
        if state.current_risks.is_empty() {
            state.current_diffs = Vec::new();
        } else {
            let clause_text = state.current_clause_text.clone().unwrap_or_default();
            let risk_level_by_id: std::collections::HashMap<String, String> =
                state.current_risks.iter().map(|r| (r.risk_id.clone(), r.risk_level.clone())).collect();
            let messages = redline_prompt(&clause_id, &clause_text, &state.current_risks);
            state.current_diffs = match runtime.llm.chat(&messages, 0.2, 2048).await {
                Ok(response) => crate::signature::extract_json(&response)
                    .ok()
                    .and_then(|v| diffs_from_json(&v, &clause_id, &risk_level_by_id))
                    .unwrap_or_default(),
                Err(_) => Vec::new(),
            };
        }
    }
    exit(state, GraphNode::ClauseGenerateDiffs);
}

async fn run_clause_validate(state: &mut ReviewGraphState) -> bool {
    enter(state, GraphNode::ClauseValidate);
    let valid = state
        .current_diffs
        .iter()
        .all(|d| d.original_text.is_some() || d.action_type == crate::model::DiffActionType::Insert);
    exit(state, GraphNode::ClauseValidate);
    valid
}

async fn run_human_approval(state: &mut ReviewGraphState) {
    enter(state, GraphNode::HumanApproval);
    state.pending_diffs = state.current_diffs.iter().cloned().filter(|d| d.status == DiffStatus::Pending).collect();
    state.awaiting_approval = !state.pending_diffs.is_empty();
    if state.awaiting_approval {
        state.trajectory.push(TrajectoryEvent::new(
            crate::trajectory::TrajectoryEventType::InterruptHit,
            format!("{} diff(s) awaiting approval", state.pending_diffs.len()),
        ));
    }
    exit(state, GraphNode::HumanApproval);
}

/// Apply the human's decision to one diff's status and to its copy kept in
/// `findings`, then fold it into `all_diffs` unless it was rejected.
async fn run_save_clause(state: &mut ReviewGraphState) {
    enter(state, GraphNode::SaveClause);
    state.all_risks.extend(state.current_risks.drain(..));
    let clause_id = state.current_clause_id.clone();
    for mut diff in state.current_diffs.drain(..) {
        if let Some(decision) = state.user_decisions.get(&diff.diff_id) {
            diff.status = match decision {
                UserDecision::Approve => DiffStatus::Approved,
                UserDecision::Reject => DiffStatus::Rejected,
            };
        }
        if let Some(findings) = clause_id.as_ref().and_then(|id| state.findings.get_mut(id)) {
            if let Some(existing) = findings.diffs.iter_mut().find(|d| d.diff_id == diff.diff_id) {
                existing.status = diff.status;
            }
        }
        if diff.status != DiffStatus::Rejected {
            state.all_diffs.push(diff);
        }
    }
    state.current_clause_index += 1;
    exit(state, GraphNode::SaveClause);
}

/// `save_clause`, then the Orchestrator's second entry point:
/// a midpoint or high-risk-triggered plan adjustment. Not one of the nine
/// graph nodes itself — it rides along with every `save_clause` transition.
async fn run_save_clause_and_maybe_adjust(runtime: &GraphRuntime, state: &mut ReviewGraphState) {
    let risks_just_found = state.current_risks.clone();
    run_save_clause(state).await;

    let completed_count = state.current_clause_index;
    let total_count = state.review_checklist.len();
    let checklist = state.review_checklist.clone();
    if let Some(plan) = state.review_plan.as_mut() {
        orchestrator::maybe_adjust_plan(runtime.llm.clone(), &checklist, plan, &risks_just_found, completed_count, total_count).await;
        state.plan_version = plan.plan_version;
        state.needs_plan_adjustment = false;
    }
}

async fn run_summarize(state: &mut ReviewGraphState) {
    enter(state, GraphNode::Summarize);
    // Literal Chinese phrasing preserved from the upstream summary template.
    state.summary_notes = format!(
        "审查完成，共 {} 个条款，发现 {} 个风险，提出 {} 处修改建议。",
        state.review_checklist.len(),
        state.all_risks.len(),
        state.all_diffs.len()
    );
    state.is_complete = true;
    exit(state, GraphNode::Summarize);
}

/// `clause_analyze -> clause_generate_diffs`, or straight to `summarize` if
/// every checklist item has been saved.
pub fn route_next_clause_or_end(state: &ReviewGraphState) -> GraphNode {
    if state.current_clause_index >= state.review_checklist.len() {
        GraphNode::Summarize
    } else {
        GraphNode::ClauseAnalyze
    }
}

/// `clause_analyze -> clause_generate_diffs`, or straight to `save_clause`
/// when the clause's plan entry sets `skip_diffs`.
pub fn route_after_analyze(state: &ReviewGraphState) -> GraphNode {
    let skip_diffs = state
        .current_clause_id
        .as_ref()
        .and_then(|id| state.review_plan.as_ref().and_then(|p| p.get(id)))
        .map(|p| p.skip_diffs)
        .unwrap_or(false);
    if skip_diffs {
        GraphNode::SaveClause
    } else {
        GraphNode::ClauseGenerateDiffs
    }
}

/// `clause_validate -> human_approval` on success; on failure, back to
/// `clause_generate_diffs` (incrementing the retry count) while under
/// `max_retries`, or straight to `save_clause` once the budget is spent.
pub fn route_validation(state: &mut ReviewGraphState, valid: bool) -> GraphNode {
    if valid {
        GraphNode::HumanApproval
    } else if state.clause_retry_count >= state.max_retries {
        GraphNode::SaveClause
    } else {
        state.clause_retry_count += 1;
        GraphNode::ClauseGenerateDiffs
    }
}

/// `human_approval -> save_clause` once every pending diff has a decision
/// recorded, else stay at `human_approval` (the caller's resume path).
pub fn route_after_approval(state: &ReviewGraphState) -> GraphNode {
    let all_decided = state.pending_diffs.iter().all(|d| state.user_decisions.contains_key(&d.diff_id));
    if !state.awaiting_approval || all_decided {
        GraphNode::SaveClause
    } else {
        GraphNode::HumanApproval
    }
}

/// Run the graph from `Init` through to either `Summarize` (task complete)
/// or a paused `HumanApproval` interrupt (state is checkpointed and control
/// returns to the caller).
pub async fn run_graph(runtime: &GraphRuntime, mut state: ReviewGraphState) -> Result<ReviewGraphState> {
    run_init(&mut state).await;
    run_parse_document(&mut state).await?;
    run_plan_review(runtime, &mut state).await;

    'clauses: loop {
        match route_next_clause_or_end(&state) {
            GraphNode::Summarize => {
                run_summarize(&mut state).await;
                return Ok(state);
            }
            GraphNode::ClauseAnalyze => {}
            _ => unreachable!("route_next_clause_or_end only returns ClauseAnalyze or Summarize"),
        }

        run_clause_analyze(runtime, &mut state).await;
        if route_after_analyze(&state) == GraphNode::SaveClause {
            run_save_clause_and_maybe_adjust(runtime, &mut state).await;
            continue;
        }
        run_clause_generate_diffs(runtime, &mut state).await;

        loop {
            let valid = run_clause_validate(&mut state).await;
            match route_validation(&mut state, valid) {
                GraphNode::HumanApproval => break,
                GraphNode::SaveClause => {
                    run_save_clause_and_maybe_adjust(runtime, &mut state).await;
                    continue 'clauses;
                }
                GraphNode::ClauseGenerateDiffs => {
                    run_clause_generate_diffs(runtime, &mut state).await;
                }
                _ => unreachable!("route_validation only returns HumanApproval, SaveClause, or ClauseGenerateDiffs"),
            }
        }

        run_human_approval(&mut state).await;
        if state.awaiting_approval {
            runtime.checkpointer.save(&state.task_id, GraphNode::HumanApproval, &state).await?;
            return Ok(state);
        }

        run_save_clause_and_maybe_adjust(runtime, &mut state).await;
    }
}

/// Resume a checkpointed run after the caller has recorded user decisions
/// for every pending diff.
pub async fn resume_graph(runtime: &GraphRuntime, task_id: &str) -> Result<ReviewGraphState> {
    let Some((node, mut state)) = runtime.checkpointer.load(task_id).await? else {
        return Err(Error::interrupt_mismatch(format!("no checkpoint found for task {task_id}")));
    };
    if node != GraphNode::HumanApproval {
        return Err(Error::interrupt_mismatch(format!(
            "task {task_id} checkpoint is at {node:?}, not human_approval"
        )));
    }
    match route_after_approval(&state) {
        GraphNode::SaveClause => {
            run_save_clause_and_maybe_adjust(runtime, &mut state).await;
            run_graph(runtime, state).await
        }
        GraphNode::HumanApproval => Err(Error::interrupt_mismatch(format!(
            "task {task_id} still has undecided pending diffs"
        ))),
        _ => unreachable!("route_after_approval only returns SaveClause or HumanApproval"),
    }
}
