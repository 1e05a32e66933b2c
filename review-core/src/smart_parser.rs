//! Smart Parser: LLM-assisted detection of a document's clause
//! numbering scheme, producing a `DocumentParserConfig` for the Structure
//! Parser to apply.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, LLMClient};
use crate::model::DocumentParserConfig;
use crate::patterns::FALLBACK_CLAUSE_PATTERNS;
use crate::signature::extract_json;

const SAMPLE_CHARS: usize = 6000;

/// Instructions for the clause-numbering detection call. The actual parse
/// goes through `config_from_json` below rather than strict output
/// deserialization, since a partial or slightly malformed response should
/// degrade to the fallback pattern instead of failing the whole call.
const DETECTION_INSTRUCTIONS: &str = "You are analyzing the structure of a legal contract. \
    Identify how clauses are numbered (e.g. dotted decimal like 14.2.1, \
    FIDIC-style Sub-Clauses, Chinese 第X条 articles, or plain Article/Section \
    numbering), where the defined-terms section is if there is one, how deeply \
    the numbering nests, and any regex-expressible pattern used for internal \
    cross-references (e.g. 'Clause 14.2' or '第十四条'). Respond with a single \
    JSON object with these fields: \
    {\"clause_pattern\": \"<regex with one capturing group matching a clause number \
    at the start of a line>\", \
    \"chapter_pattern\": \"<regex matching a higher-level chapter heading, or null>\", \
    \"definitions_section_id\": \"<clause id of the defined-terms section, or null>\", \
    \"max_depth\": <maximum nesting depth of the clause numbering>, \
    \"structure_type\": \"<short label for the detected numbering scheme>\", \
    \"cross_reference_patterns\": [\"<regex for an internal cross-reference, one \
    capturing group>\", ...], \
    \"confidence\": <confidence that this detection is correct, 0.0-1.0>}";

fn sample(text: &str) -> &str {
    match text.char_indices().nth(SAMPLE_CHARS) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn build_prompt(text_sample: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DETECTION_INSTRUCTIONS),
        ChatMessage::user(format!("Document sample:\n\n{text_sample}")),
    ]
}

fn count_matches(text: &str, pattern: &str) -> usize {
    Regex::new(pattern).map(|re| re.find_iter(text).count()).unwrap_or(0)
}

fn config_from_json(value: &Value) -> Option<DocumentParserConfig> {
    let clause_pattern = value.get("clause_pattern")?.as_str()?.to_string();
    if Regex::new(&clause_pattern).is_err() {
        return None;
    }
    let cross_reference_patterns = value
        .get("cross_reference_patterns")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter(|p| Regex::new(p).is_ok())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(DocumentParserConfig {
        clause_pattern,
        chapter_pattern: value.get("chapter_pattern").and_then(Value::as_str).map(str::to_string),
        definitions_section_id: value
            .get("definitions_section_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        max_depth: value.get("max_depth").and_then(Value::as_u64).unwrap_or(6).max(1) as u32,
        structure_type: value
            .get("structure_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        cross_reference_patterns,
        confidence: value.get("confidence").and_then(Value::as_f64).unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

/// Try each fallback clause-numbering pattern against `text` and return the
/// one with the most matches, breaking ties by catalog order.
fn best_fallback_pattern(text: &str) -> DocumentParserConfig {
    let mut best: Option<(&str, &str, usize)> = None;
    for (name, pattern) in FALLBACK_CLAUSE_PATTERNS {
        let count = count_matches(text, pattern);
        if best.map(|(_, _, best_count)| count > best_count).unwrap_or(count > 0) {
            best = Some((name, pattern, count));
        }
    }
    match best {
        Some((name, pattern, _)) => DocumentParserConfig {
            clause_pattern: pattern.to_string(),
            chapter_pattern: None,
            definitions_section_id: None,
            max_depth: 6,
            structure_type: name.to_string(),
            cross_reference_patterns: Vec::new(),
            confidence: 0.4,
        },
        None => DocumentParserConfig::numeric_dotted_fallback(),
    }
}

/// Detect the document's `DocumentParserConfig`: ask the LLM,
/// validate its proposal, and fall back to the best-matching built-in
/// pattern (or the numeric-dotted default) if the LLM proposal is missing,
/// malformed, or under-matches the document.
pub async fn detect_parser_config(llm: Arc<dyn LLMClient>, document_text: &str) -> DocumentParserConfig {
    let text_sample = sample(document_text);
    let messages = build_prompt(text_sample);

    let llm_config = match llm.chat(&messages, 0.0, 1024).await {
        Ok(response) => extract_json(&response).ok().and_then(|v| config_from_json(&v)),
        Err(_) => None,
    };

    let fallback = best_fallback_pattern(document_text);

    match llm_config {
        Some(proposed) => {
            let proposed_matches = count_matches(document_text, &proposed.clause_pattern);
            let fallback_matches = count_matches(document_text, &fallback.clause_pattern);
            // The LLM proposal wins ties; it only loses when it strictly
            // under-matches the best built-in pattern.
            if proposed_matches >= fallback_matches && proposed_matches > 0 {
                proposed
            } else {
                fallback
            }
        }
        None => fallback,
    }
}

/// Validate a proposed cross-reference pattern has at least one capturing
/// group, defensively defaulting to whole-match (group 0) otherwise. Mirrors
/// the same defensive handling `patterns::extract_cross_references` applies
/// to caller-supplied extra patterns.
pub fn safe_group_index(regex: &Regex) -> usize {
    if regex.captures_len() > 1 {
        1
    } else {
        0
    }
}

pub fn compile_cross_reference_patterns(config: &DocumentParserConfig) -> Vec<Regex> {
    config
        .cross_reference_patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

pub(crate) fn err_if_empty(config: &DocumentParserConfig) -> Result<()> {
    if config.clause_pattern.trim().is_empty() {
        return Err(Error::parse_failure("detected clause_pattern is empty"));
    }
    Ok(())
}
