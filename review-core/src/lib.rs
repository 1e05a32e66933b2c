//! # review-core
//!
//! The contract review engine: parses a long-form legal document into a
//! clause tree with definitions and cross-references, builds a per-clause
//! review plan, and runs each clause through either an LLM-driven ReAct
//! agent or a deterministic skill loop, pausing at a checkpointed
//! human-approval interrupt whenever a proposed edit needs a decision.
//!
//! ## Core components
//!
//! - **model**: the clause tree, definitions, cross-references, diffs,
//!   findings, plans, and the review graph's state record.
//! - **patterns**: the regex/keyword library behind structure detection,
//!   definition extraction, and cross-reference extraction.
//! - **smart_parser** / **structure_parser**: detect a document's clause
//!   numbering scheme, then build its clause tree.
//! - **extractors**: hybrid regex+LLM definition and cross-reference
//!   extraction.
//! - **skills**: the registry and dispatcher exposing domain tools
//!   (clause lookup, definition resolution, FIDIC-specific helpers) via
//!   function-calling.
//! - **react** / **fallback**: the per-clause analysis pipeline, either
//!   LLM-driven or deterministic.
//! - **orchestrator**: plan generation and midpoint plan adjustment.
//! - **graph**: the nine-node review graph tying the above together,
//!   including the human-approval interrupt boundary.
//! - **llm**: provider clients, cost tracking, and the chat/tool-call
//!   transport abstraction every LLM-facing component depends on.
//! - **signature**: the three-layer JSON extractor used to parse model
//!   output.
//! - **config**: engine configuration loaded from the environment.
//! - **error** / **trajectory**: the error taxonomy and the observable
//!   event stream recorded as a review runs.

pub mod config;
pub mod error;
pub mod extractors;
pub mod fallback;
pub mod graph;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod patterns;
pub mod react;
pub mod signature;
pub mod skills;
pub mod smart_parser;
pub mod structure_parser;
pub mod trajectory;

pub use config::ReviewEngineConfig;
pub use error::{Error, Result};
pub use graph::{Checkpointer, GraphNode, GraphRuntime, InMemoryCheckpointer};
pub use llm::{
    AnthropicClient, ChatMessage, ClientConfig, CostTracker, EmbeddingClient, LLMClient,
    NullLlmClient, OpenAIClient, Provider, ScriptedLlmClient, ScriptedResponse, ToolCall,
    ToolDefinition,
};
pub use model::{
    AnalysisDepth, ClauseAnalysisPlan, ClauseFindings, ClauseNode, CrossReference,
    DefinitionCategory, DefinitionEntry, Deviation, DiffActionType, DiffStatus, DocumentDiff,
    DocumentParserConfig, DocumentRole, DocumentStructure, ExecutionMode, ExtractionSource,
    Priority, ReferenceType, Risk, ReviewChecklistItem, ReviewGraphState, ReviewPlan,
    SkillBackend, SkillRegistration, TaskDocument, UserDecision,
};
pub use signature::extract_json;
pub use skills::{register_builtin_skills, SkillContext, SkillRegistry, SkillResult};
pub use trajectory::{export_events, ExportFormat, TrajectoryEvent, TrajectoryEventType};
