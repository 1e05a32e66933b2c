//! Core data model: clause trees, definitions, cross-references,
//! diffs, findings, plans, and the review graph's state record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::trajectory::TrajectoryEvent;

/// A node in a clause tree. `child.level > parent.level` and offsets are
/// monotonically non-decreasing in depth-first order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseNode {
    pub clause_id: String,
    pub title: Option<String>,
    pub level: u32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub children: Vec<ClauseNode>,
}

impl ClauseNode {
    pub fn new(clause_id: impl Into<String>, level: u32, text: impl Into<String>) -> Self {
        Self {
            clause_id: clause_id.into(),
            title: None,
            level,
            text: text.into(),
            start_offset: 0,
            end_offset: 0,
            children: Vec::new(),
        }
    }

    /// Count this node plus every descendant.
    pub fn subtree_count(&self) -> usize {
        1 + self.children.iter().map(ClauseNode::subtree_count).sum::<usize>()
    }

    /// Find a node by clause_id anywhere in this subtree.
    pub fn find(&self, clause_id: &str) -> Option<&ClauseNode> {
        if self.clause_id == clause_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(clause_id))
    }

    /// This node's own text concatenated with every descendant's text, in
    /// document order. Used by `get_clause_context`.
    pub fn full_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push('\n');
            out.push_str(&child.full_text());
        }
        out
    }
}

/// Source of a `CrossReference` or `DefinitionEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Regex,
    Llm,
    Manual,
}

/// Category tag for a definition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionCategory {
    Party,
    Date,
    Amount,
    General,
}

/// The kind of target a cross-reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Clause,
    Article,
    Section,
    Appendix,
    Schedule,
    Annex,
    Paragraph,
}

/// term/definition pair extracted from a document.
///
/// Invariant: `2 <= term.len() <= 50`, `4 <= definition_text.len() <= 2000`
/// (the extractor's validation truncates longer text to 2000 chars plus a
/// marker, so the *stored* form caps at 2003, per the testable property in §8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionEntry {
    pub term: String,
    pub definition_text: String,
    pub source: ExtractionSource,
    pub confidence: f64,
    pub source_clause_id: Option<String>,
    pub aliases: Vec<String>,
    pub category: Option<DefinitionCategory>,
}

/// A textual pointer from one clause to another.
///
/// Invariant: `source_clause_id != target_clause_id` (no self-references).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub source_clause_id: String,
    pub target_clause_id: String,
    pub reference_text: String,
    pub is_valid: Option<bool>,
    pub source: ExtractionSource,
    pub confidence: f64,
    pub reference_type: ReferenceType,
}

/// Structure-detection configuration produced by the Smart Parser and
/// consumed by the Structure Parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentParserConfig {
    pub clause_pattern: String,
    pub chapter_pattern: Option<String>,
    pub definitions_section_id: Option<String>,
    pub max_depth: u32,
    pub structure_type: String,
    pub cross_reference_patterns: Vec<String>,
    pub confidence: f64,
}

impl DocumentParserConfig {
    /// Default fallback config: numeric-dotted clause numbering.
    pub fn numeric_dotted_fallback() -> Self {
        Self {
            clause_pattern: r"^(\d+(?:\.\d+)*)\s".to_string(),
            chapter_pattern: None,
            definitions_section_id: None,
            max_depth: 6,
            structure_type: "numeric_dotted".to_string(),
            cross_reference_patterns: Vec::new(),
            confidence: 0.5,
        }
    }
}

/// The parse result for one document.
///
/// Invariant: `total_clauses == clauses.iter().map(ClauseNode::subtree_count).sum()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub document_id: String,
    pub structure_type: String,
    pub clauses: Vec<ClauseNode>,
    pub definitions: HashMap<String, String>,
    pub definitions_v2: Vec<DefinitionEntry>,
    pub cross_references: Vec<CrossReference>,
    pub total_clauses: usize,
}

impl DocumentStructure {
    pub fn empty(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            structure_type: "numeric_dotted".to_string(),
            clauses: Vec::new(),
            definitions: HashMap::new(),
            definitions_v2: Vec::new(),
            cross_references: Vec::new(),
            total_clauses: 0,
        }
    }

    pub fn recompute_total_clauses(&mut self) {
        self.total_clauses = self.clauses.iter().map(ClauseNode::subtree_count).sum();
    }

    pub fn find_clause(&self, clause_id: &str) -> Option<&ClauseNode> {
        self.clauses.iter().find_map(|c| c.find(clause_id))
    }

    /// The set of every clause_id present in the tree, for cross-reference
    /// validity checks.
    pub fn clause_id_set(&self) -> std::collections::HashSet<&str> {
        fn collect<'a>(node: &'a ClauseNode, set: &mut std::collections::HashSet<&'a str>) {
            set.insert(node.clause_id.as_str());
            for c in &node.children {
                collect(c, set);
            }
        }
        let mut set = std::collections::HashSet::new();
        for c in &self.clauses {
            collect(c, &mut set);
        }
        set
    }
}

/// Priority tier of a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

/// One entry in the review checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewChecklistItem {
    pub clause_id: String,
    pub clause_name: String,
    pub priority: Priority,
    pub required_skills: Vec<String>,
    pub description: String,
}

/// Backend kind for a registered skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillBackend {
    Local,
    Remote,
}

/// Registration metadata for one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRegistration {
    pub skill_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub backend: SkillBackend,
    pub local_handler: Option<String>,
    pub remote_workflow_id: Option<String>,
    pub domain: String,
    pub category: String,
}

/// The kind of edit a DocumentDiff proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffActionType {
    Replace,
    Delete,
    Insert,
}

/// Human-decision lifecycle of a DocumentDiff. Transitions are monotonic:
/// `Pending -> {Approved, Rejected}`, set only by human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Pending,
    Approved,
    Rejected,
}

/// A proposed textual edit against a specific clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDiff {
    #[serde(default)]
    pub diff_id: String,
    pub risk_id: Option<String>,
    pub clause_id: String,
    pub action_type: DiffActionType,
    pub original_text: Option<String>,
    pub proposed_text: Option<String>,
    pub reason: String,
    pub risk_level: String,
    pub status: DiffStatus,
}

/// One identified risk for a clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default)]
    pub risk_id: String,
    pub clause_id: String,
    pub risk_level: String,
    pub description: String,
}

/// A detected deviation from a baseline or standard form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deviation {
    pub clause_id: String,
    pub summary: String,
}

/// Aggregated analysis for one clause.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClauseFindings {
    pub clause_id: String,
    pub risks: Vec<Risk>,
    pub deviations: Vec<Deviation>,
    pub diffs: Vec<DocumentDiff>,
    pub notes: String,
    pub completed: bool,
}

impl ClauseFindings {
    pub fn new(clause_id: impl Into<String>) -> Self {
        Self {
            clause_id: clause_id.into(),
            ..Default::default()
        }
    }

    /// Assigns a fresh id to any risk or diff the model returned without
    /// one. The model is asked for `risk_id`/`diff_id` in its JSON output
    /// but isn't trusted to always supply a unique one.
    pub fn backfill_ids(&mut self) {
        for risk in &mut self.risks {
            if risk.risk_id.trim().is_empty() {
                risk.risk_id = Uuid::new_v4().to_string();
            }
        }
        for diff in &mut self.diffs {
            if diff.diff_id.trim().is_empty() {
                diff.diff_id = Uuid::new_v4().to_string();
            }
        }
    }
}

/// Analysis depth assigned to a clause by the Orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Quick,
    Standard,
    Deep,
}

impl AnalysisDepth {
    /// Parse from an LLM-supplied string, defaulting to `Standard` on any
    /// value outside the valid enum.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "quick" => Self::Quick,
            "deep" => Self::Deep,
            "standard" => Self::Standard,
            _ => Self::Standard,
        }
    }

    pub fn default_max_iterations(self) -> u32 {
        match self {
            Self::Quick => 2,
            Self::Standard => 3,
            Self::Deep => 5,
        }
    }
}

/// The orchestrator's per-clause execution recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseAnalysisPlan {
    pub clause_id: String,
    pub analysis_depth: AnalysisDepth,
    pub suggested_tools: Vec<String>,
    pub max_iterations: u32,
    pub priority_order: u32,
    pub rationale: String,
    pub skip_diffs: bool,
    pub skip_validate: bool,
}

/// The full plan across all checklist items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPlan {
    pub entries: HashMap<String, ClauseAnalysisPlan>,
    pub global_strategy: String,
    pub plan_version: u32,
}

impl ReviewPlan {
    pub fn new(global_strategy: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            global_strategy: global_strategy.into(),
            plan_version: 0,
        }
    }

    pub fn get(&self, clause_id: &str) -> Option<&ClauseAnalysisPlan> {
        self.entries.get(clause_id)
    }

    /// Checklist items ordered by `priority_order` ascending, falling back to
    /// the incoming order for clauses without a plan entry.
    pub fn ordered_clause_ids(&self, checklist: &[ReviewChecklistItem]) -> Vec<String> {
        let mut ids: Vec<String> = checklist.iter().map(|c| c.clause_id.clone()).collect();
        ids.sort_by_key(|id| {
            self.entries
                .get(id)
                .map(|p| p.priority_order)
                .unwrap_or(u32::MAX)
        });
        ids
    }
}

/// A document uploaded for one task (role: primary/baseline/supplement/reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentRole {
    Primary,
    Baseline,
    Supplement,
    Reference,
}

/// A document attached to a task, holding its parsed structure once available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDocument {
    pub document_id: String,
    pub role: DocumentRole,
    pub filename: String,
    pub structure: Option<DocumentStructure>,
}

/// The review graph's execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Legacy,
    Gen3,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Gen3
    }
}

/// A user's decision on one pending diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    Approve,
    Reject,
}

/// The review graph's state record.
///
/// Ownership: the graph owns all state; each node mutates by returning a
/// partial patch merged into this record by the graph engine. `findings`
/// references clauses by id (string), never by tree pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewGraphState {
    pub task_id: String,
    pub our_party: Option<String>,
    pub language: String,
    pub domain_id: Option<String>,
    pub material_type: Option<String>,
    pub documents: Vec<TaskDocument>,
    pub primary_structure: Option<DocumentStructure>,
    pub review_checklist: Vec<ReviewChecklistItem>,
    pub current_clause_index: usize,
    pub current_clause_id: Option<String>,
    pub current_clause_text: Option<String>,
    pub current_risks: Vec<Risk>,
    pub current_diffs: Vec<DocumentDiff>,
    pub current_skill_context: HashMap<String, Value>,
    pub findings: HashMap<String, ClauseFindings>,
    pub all_risks: Vec<Risk>,
    pub all_diffs: Vec<DocumentDiff>,
    pub pending_diffs: Vec<DocumentDiff>,
    pub user_decisions: HashMap<String, UserDecision>,
    pub user_feedback: HashMap<String, String>,
    pub review_plan: Option<ReviewPlan>,
    pub plan_version: u32,
    pub agent_messages: Vec<crate::llm::ChatMessage>,
    pub clause_retry_count: u32,
    pub max_retries: u32,
    pub is_complete: bool,
    pub error: Option<String>,
    pub execution_mode: ExecutionMode,
    pub awaiting_approval: bool,
    pub summary_notes: String,
    pub needs_plan_adjustment: bool,
    pub cost_summary: crate::llm::CostTracker,
    pub trajectory: Vec<TrajectoryEvent>,
}

impl ReviewGraphState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            our_party: None,
            language: "en".to_string(),
            domain_id: None,
            material_type: None,
            documents: Vec::new(),
            primary_structure: None,
            review_checklist: Vec::new(),
            current_clause_index: 0,
            current_clause_id: None,
            current_clause_text: None,
            current_risks: Vec::new(),
            current_diffs: Vec::new(),
            current_skill_context: HashMap::new(),
            findings: HashMap::new(),
            all_risks: Vec::new(),
            all_diffs: Vec::new(),
            pending_diffs: Vec::new(),
            user_decisions: HashMap::new(),
            user_feedback: HashMap::new(),
            review_plan: None,
            plan_version: 0,
            agent_messages: Vec::new(),
            clause_retry_count: 0,
            max_retries: 2,
            is_complete: false,
            error: None,
            execution_mode: ExecutionMode::default(),
            awaiting_approval: false,
            summary_notes: String::new(),
            needs_plan_adjustment: false,
            cost_summary: crate::llm::CostTracker::default(),
            trajectory: Vec::new(),
        }
    }

    /// Invariant: `current_clause_index <= review_checklist.len()`.
    pub fn index_in_bounds(&self) -> bool {
        self.current_clause_index <= self.review_checklist.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_ids_assigns_missing_risk_and_diff_ids_but_leaves_existing_ones() {
        let mut findings = ClauseFindings::new("1");
        findings.risks.push(Risk {
            risk_id: String::new(),
            clause_id: "1".to_string(),
            risk_level: "medium".to_string(),
            description: "ambiguous notice period".to_string(),
        });
        findings.diffs.push(DocumentDiff {
            diff_id: "kept".to_string(),
            risk_id: None,
            clause_id: "1".to_string(),
            action_type: DiffActionType::Replace,
            original_text: None,
            proposed_text: None,
            reason: "clarify".to_string(),
            risk_level: "medium".to_string(),
            status: DiffStatus::Pending,
        });
        findings.backfill_ids();
        assert!(!findings.risks[0].risk_id.is_empty());
        assert_eq!(findings.diffs[0].diff_id, "kept");
    }

    #[test]
    fn subtree_count_counts_self_and_descendants() {
        let mut root = ClauseNode::new("1", 0, "root");
        let mut child = ClauseNode::new("1.1", 1, "child");
        child.children.push(ClauseNode::new("1.1.1", 2, "grandchild"));
        root.children.push(child);
        assert_eq!(root.subtree_count(), 3);
    }

    #[test]
    fn document_structure_total_clauses_matches_sum() {
        let mut structure = DocumentStructure::empty("doc-1");
        let mut root = ClauseNode::new("1", 0, "root");
        root.children.push(ClauseNode::new("1.1", 1, "child"));
        structure.clauses.push(root);
        structure.recompute_total_clauses();
        assert_eq!(structure.total_clauses, 2);
    }

    #[test]
    fn cross_reference_self_reference_is_never_produced_by_validation_helper() {
        let cr = CrossReference {
            source_clause_id: "1".to_string(),
            target_clause_id: "2".to_string(),
            reference_text: "Clause 2".to_string(),
            is_valid: Some(true),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            reference_type: ReferenceType::Clause,
        };
        assert_ne!(cr.source_clause_id, cr.target_clause_id);
    }

    #[test]
    fn analysis_depth_defaults_to_standard_on_invalid_input() {
        assert_eq!(AnalysisDepth::parse_or_default("bogus"), AnalysisDepth::Standard);
        assert_eq!(AnalysisDepth::parse_or_default("Deep"), AnalysisDepth::Deep);
    }

    #[test]
    fn review_plan_orders_by_priority_order() {
        let mut plan = ReviewPlan::new("default");
        plan.entries.insert(
            "a".to_string(),
            ClauseAnalysisPlan {
                clause_id: "a".to_string(),
                analysis_depth: AnalysisDepth::Quick,
                suggested_tools: vec![],
                max_iterations: 2,
                priority_order: 1,
                rationale: String::new(),
                skip_diffs: true,
                skip_validate: true,
            },
        );
        plan.entries.insert(
            "b".to_string(),
            ClauseAnalysisPlan {
                clause_id: "b".to_string(),
                analysis_depth: AnalysisDepth::Deep,
                suggested_tools: vec![],
                max_iterations: 5,
                priority_order: 0,
                rationale: String::new(),
                skip_diffs: false,
                skip_validate: false,
            },
        );
        let checklist = vec![
            ReviewChecklistItem {
                clause_id: "a".to_string(),
                clause_name: "A".to_string(),
                priority: Priority::Low,
                required_skills: vec![],
                description: String::new(),
            },
            ReviewChecklistItem {
                clause_id: "b".to_string(),
                clause_name: "B".to_string(),
                priority: Priority::Critical,
                required_skills: vec![],
                description: String::new(),
            },
        ];
        assert_eq!(plan.ordered_clause_ids(&checklist), vec!["b", "a"]);
    }
}
