//! Trajectory event stream for observing review-graph execution.
//!
//! Events are appended to `ReviewGraphState::trajectory` as the graph runs
//! and can be exported for post-hoc debugging. This is an in-process,
//! append-only log — not a push protocol (out of scope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Kind of event recorded in a task's trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectoryEventType {
    /// A review-graph node was entered.
    NodeEnter,
    /// A review-graph node completed and returned a state patch.
    NodeExit,
    /// One ReAct loop iteration completed.
    ReactIteration,
    /// A tool call was dispatched.
    ToolUse,
    /// The deterministic fallback path was entered for a clause.
    FallbackTriggered,
    /// The human-approval interrupt boundary was hit.
    InterruptHit,
    /// The graph resumed from an interrupt.
    Resumed,
    /// An error was recovered locally (LLM/tool/route failure).
    RecoveredError,
}

/// One recorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryEvent {
    pub event_type: TrajectoryEventType,
    pub timestamp: DateTime<Utc>,
    pub clause_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
}

impl TrajectoryEvent {
    pub fn new(event_type: TrajectoryEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            clause_id: None,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn for_clause(mut self, clause_id: impl Into<String>) -> Self {
        self.clause_id = Some(clause_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn node_enter(node: &str) -> Self {
        Self::new(TrajectoryEventType::NodeEnter, format!("entered {node}"))
    }

    pub fn node_exit(node: &str) -> Self {
        Self::new(TrajectoryEventType::NodeExit, format!("exited {node}"))
    }

    /// Records one iteration's tool count and elapsed time.
    pub fn react_iteration(clause_id: &str, iteration: u32, tools_called: usize, elapsed_ms: u64) -> Self {
        Self::new(
            TrajectoryEventType::ReactIteration,
            format!("iteration {iteration}: {tools_called} tool call(s) in {elapsed_ms}ms"),
        )
        .for_clause(clause_id)
        .with_data("iteration", iteration)
        .with_data("tools_called", tools_called as u64)
        .with_data("elapsed_ms", elapsed_ms)
    }

    pub fn fallback_triggered(clause_id: &str, reason: &str) -> Self {
        Self::new(TrajectoryEventType::FallbackTriggered, reason).for_clause(clause_id)
    }

    pub fn as_log_line(&self) -> String {
        match &self.clause_id {
            Some(clause_id) => format!(
                "[{}] {} clause={} {}",
                self.timestamp.to_rfc3339(),
                self.event_type,
                clause_id,
                self.message
            ),
            None => format!("[{}] {} {}", self.timestamp.to_rfc3339(), self.event_type, self.message),
        }
    }
}

impl std::fmt::Display for TrajectoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NodeEnter => "NODE_ENTER",
            Self::NodeExit => "NODE_EXIT",
            Self::ReactIteration => "REACT_ITERATION",
            Self::ToolUse => "TOOL_USE",
            Self::FallbackTriggered => "FALLBACK_TRIGGERED",
            Self::InterruptHit => "INTERRUPT_HIT",
            Self::Resumed => "RESUMED",
            Self::RecoveredError => "RECOVERED_ERROR",
        };
        write!(f, "{s}")
    }
}

/// Export format for a trajectory.
pub enum ExportFormat {
    JsonLines,
    Markdown,
}

/// Render a full trajectory for a caller that wants to inspect a run's
/// timeline without re-deriving it from the graph state.
pub fn export_events(events: &[TrajectoryEvent], format: ExportFormat) -> String {
    match format {
        ExportFormat::JsonLines => events
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n"),
        ExportFormat::Markdown => {
            let mut out = String::from("# Trajectory\n\n");
            for event in events {
                out.push_str(&format!("- {}\n", event.as_log_line()));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn react_iteration_event_carries_the_required_fields() {
        let event = TrajectoryEvent::react_iteration("4.1", 2, 1, 450);
        assert_eq!(event.clause_id.as_deref(), Some("4.1"));
        assert_eq!(event.data.get("iteration").unwrap(), &Value::from(2));
        assert_eq!(event.data.get("tools_called").unwrap(), &Value::from(1u64));
    }

    #[test]
    fn export_markdown_includes_every_event() {
        let events = vec![
            TrajectoryEvent::node_enter("parse_document"),
            TrajectoryEvent::node_exit("parse_document"),
        ];
        let markdown = export_events(&events, ExportFormat::Markdown);
        assert!(markdown.contains("NODE_ENTER"));
        assert!(markdown.contains("NODE_EXIT"));
    }

    #[test]
    fn export_jsonlines_round_trips_each_event() {
        let events = vec![TrajectoryEvent::fallback_triggered("1.1", "ReAct returned empty")];
        let rendered = export_events(&events, ExportFormat::JsonLines);
        let parsed: TrajectoryEvent = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.event_type, TrajectoryEventType::FallbackTriggered);
    }
}
