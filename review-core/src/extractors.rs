//! Hybrid Extractors: regex-first, LLM-supplement extraction of
//! definitions and cross-references, run after the Structure Parser has
//! already done its own regex-only pass.
//!
//! Phase A reuses the Pattern Library directly (already done by the
//! Structure Parser for the whole tree); phases B and C here are the
//! *supplement* steps — an inline-party sweep and an LLM call per batch —
//! that raise recall above what a frozen regex catalog can reach.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::llm::{ChatMessage, LLMClient};
use crate::model::{ClauseNode, CrossReference, DefinitionEntry, DocumentStructure, ExtractionSource, ReferenceType};
use crate::patterns;
use crate::signature::extract_json;

const DEFINITIONS_PROMPT_CHAR_LIMIT: usize = 8000;
const CROSS_REFERENCE_PROMPT_CHAR_LIMIT: usize = 4000;
const MAX_LLM_DEFINITIONS: usize = 60;
const MAX_CROSS_REFERENCE_BATCH_CLAUSES: usize = 50;

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn definitions_key(term: &str) -> String {
    patterns::normalize_for_comparison(term)
}

/// Validate and normalize one candidate definition:
/// term must be 2-50 chars, definition_text at least 4 chars, longer text
/// truncated to 2000 chars plus a 3-character "..." marker (2003 stored max).
fn validate_definition(term: &str, definition_text: &str, source: ExtractionSource, confidence: f64) -> Option<DefinitionEntry> {
    let term = term.trim().trim_matches('"').to_string();
    if term.chars().count() < 2 || term.chars().count() > 50 {
        return None;
    }
    let definition_text = definition_text.trim();
    if definition_text.chars().count() < 4 {
        return None;
    }
    let definition_text = if definition_text.chars().count() > 2000 {
        format!("{}...", truncate_chars(definition_text, 2000))
    } else {
        definition_text.to_string()
    };
    Some(DefinitionEntry {
        term,
        definition_text,
        source,
        confidence,
        source_clause_id: None,
        aliases: Vec::new(),
        category: None,
    })
}

fn definitions_llm_prompt(text_sample: &str, already_found: &[String]) -> Vec<ChatMessage> {
    let instructions = "You are extracting defined terms from a legal contract. \
        Some terms have already been found by regex and are listed below under \
        'already found' — do not repeat them. Find any remaining defined terms \
        and their definitions. Respond with a JSON object: {\"definitions\": \
        [{\"term\": string, \"definition_text\": string}, ...]}. If none remain, \
        return {\"definitions\": []}.";
    let already = if already_found.is_empty() {
        "(none)".to_string()
    } else {
        already_found.join(", ")
    };
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!(
            "Already found: {already}\n\nDocument excerpt:\n{}",
            truncate_chars(text_sample, DEFINITIONS_PROMPT_CHAR_LIMIT)
        )),
    ]
}

/// Run the hybrid definitions extractor over `structure`'s full document
/// text: phase A (regex, already populated in `structure.definitions_v2`),
/// phase B (inline-party sweep — already covered by the Pattern Library's
/// own inline-party rules), phase C (LLM supplement, capped at 60 extra
/// terms, skipped entirely on any LLM failure).
pub async fn extract_definitions_hybrid(
    llm: Arc<dyn LLMClient>,
    structure: &mut DocumentStructure,
    full_text: &str,
) -> Result<()> {
    let mut seen: std::collections::HashSet<String> = structure
        .definitions_v2
        .iter()
        .map(|d| definitions_key(&d.term))
        .collect();
    let already_found: Vec<String> = structure.definitions_v2.iter().map(|d| d.term.clone()).collect();

    let messages = definitions_llm_prompt(full_text, &already_found);
    let response = match llm.chat(&messages, 0.0, 2048).await {
        Ok(r) => r,
        Err(_) => return Ok(()), // LLM supplement is best-effort; regex phase already ran.
    };

    let Ok(value) = extract_json(&response) else {
        return Ok(());
    };
    let Some(candidates) = value.get("definitions").and_then(Value::as_array) else {
        return Ok(());
    };

    let mut added = 0usize;
    for candidate in candidates {
        if added >= MAX_LLM_DEFINITIONS {
            break;
        }
        let Some(term) = candidate.get("term").and_then(Value::as_str) else { continue };
        let Some(definition_text) = candidate.get("definition_text").and_then(Value::as_str) else { continue };
        let key = definitions_key(term);
        if seen.contains(&key) {
            continue;
        }
        let Some(mut entry) = validate_definition(term, definition_text, ExtractionSource::Llm, 0.7) else {
            continue;
        };
        entry.category = Some(patterns::guess_definition_category(&entry.term, &entry.definition_text));
        seen.insert(key);
        structure.definitions_v2.push(entry);
        added += 1;
    }

    for (term, definition_text) in structure.definitions_v2.iter().map(|d| (d.term.clone(), d.definition_text.clone())) {
        structure.definitions.entry(term).or_insert(definition_text);
    }

    Ok(())
}

/// Strip a leading "第" and a trailing "条"/"款"/"项" marker so an LLM-returned
/// target like "第三条" normalizes the same way the regex catalog's own
/// capture groups already do (they match the markers but don't capture them).
fn strip_article_markers(raw: &str) -> &str {
    let s = raw.trim().strip_prefix('第').unwrap_or(raw.trim());
    for suffix in ['条', '款', '项'] {
        if let Some(rest) = s.strip_suffix(suffix) {
            return rest;
        }
    }
    s
}

fn cross_reference_llm_prompt(clause: &ClauseNode) -> Vec<ChatMessage> {
    let instructions = "Find references to other clauses, articles, sections, \
        schedules, or appendices inside this clause's text that a regex catalog \
        might miss (e.g. 'as set out in the preceding sub-paragraph', 'the \
        Schedule referred to above'). Respond with JSON: {\"references\": \
        [{\"target_clause_id\": string, \"reference_text\": string}]}. If there \
        are none, return {\"references\": []}.";
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(truncate_chars(&clause.text, CROSS_REFERENCE_PROMPT_CHAR_LIMIT).to_string()),
    ]
}

/// Run the hybrid cross-reference extractor's LLM supplement over the first
/// `MAX_CROSS_REFERENCE_BATCH_CLAUSES` clauses in document order, merging in only targets the regex phase missed.
pub async fn extract_cross_references_hybrid(llm: Arc<dyn LLMClient>, structure: &mut DocumentStructure) -> Result<()> {
    let clause_ids = structure.clause_id_set().into_iter().map(str::to_string).collect::<std::collections::HashSet<_>>();
    let mut flat = Vec::new();
    flatten(&structure.clauses, &mut flat);

    let mut existing: std::collections::HashSet<(String, String)> = structure
        .cross_references
        .iter()
        .map(|r| (r.source_clause_id.clone(), r.target_clause_id.clone()))
        .collect();

    let mut supplemental = Vec::new();
    for clause in flat.into_iter().take(MAX_CROSS_REFERENCE_BATCH_CLAUSES) {
        let messages = cross_reference_llm_prompt(clause);
        let Ok(response) = llm.chat(&messages, 0.0, 1024).await else { continue };
        let Ok(value) = extract_json(&response) else { continue };
        let Some(refs) = value.get("references").and_then(Value::as_array) else { continue };
        for r in refs {
            let Some(target_raw) = r.get("target_clause_id").and_then(Value::as_str) else { continue };
            let target_id =
                patterns::chinese_numeral_to_arabic(strip_article_markers(target_raw)).unwrap_or_else(|| target_raw.to_string());
            if target_id == clause.clause_id {
                continue;
            }
            let key = (clause.clause_id.clone(), target_id.clone());
            if existing.contains(&key) {
                continue;
            }
            existing.insert(key);
            let reference_text = r
                .get("reference_text")
                .and_then(Value::as_str)
                .unwrap_or(target_raw)
                .to_string();
            supplemental.push(CrossReference {
                source_clause_id: clause.clause_id.clone(),
                target_clause_id: target_id.clone(),
                reference_text,
                is_valid: Some(clause_ids.contains(&target_id)),
                source: ExtractionSource::Llm,
                confidence: 0.7,
                reference_type: ReferenceType::Clause,
            });
        }
    }

    structure.cross_references.extend(supplemental);
    Ok(())
}

fn flatten<'a>(nodes: &'a [ClauseNode], out: &mut Vec<&'a ClauseNode>) {
    for node in nodes {
        out.push(node);
        flatten(&node.children, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedLlmClient, ScriptedResponse};
    use crate::model::ClauseNode;

    fn structure_with_one_clause(text: &str) -> DocumentStructure {
        let mut s = DocumentStructure::empty("doc-1");
        s.clauses.push(ClauseNode::new("1", 0, text));
        s.recompute_total_clauses();
        s
    }

    #[tokio::test]
    async fn llm_failure_leaves_regex_definitions_untouched() {
        let llm: Arc<dyn LLMClient> = Arc::new(crate::llm::NullLlmClient);
        let mut structure = structure_with_one_clause("text");
        structure.definitions_v2.push(DefinitionEntry {
            term: "Contract".to_string(),
            definition_text: "this agreement".to_string(),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            source_clause_id: None,
            aliases: Vec::new(),
            category: None,
        });
        extract_definitions_hybrid(llm, &mut structure, "text").await.unwrap();
        assert_eq!(structure.definitions_v2.len(), 1);
    }

    #[tokio::test]
    async fn llm_supplement_adds_new_terms_without_duplicating_existing() {
        let response = serde_json::json!({
            "definitions": [
                {"term": "Contract", "definition_text": "duplicate, should be skipped"},
                {"term": "Completion Date", "definition_text": "the date stated in Appendix A"},
            ]
        })
        .to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let mut structure = structure_with_one_clause("text");
        structure.definitions_v2.push(DefinitionEntry {
            term: "Contract".to_string(),
            definition_text: "this agreement".to_string(),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            source_clause_id: None,
            aliases: Vec::new(),
            category: None,
        });
        extract_definitions_hybrid(llm, &mut structure, "text").await.unwrap();
        assert_eq!(structure.definitions_v2.len(), 2);
        assert!(structure.definitions_v2.iter().any(|d| d.term == "Completion Date"));
        let contract_entries: Vec<_> = structure.definitions_v2.iter().filter(|d| d.term == "Contract").collect();
        assert_eq!(contract_entries.len(), 1);
        assert_eq!(contract_entries[0].source, ExtractionSource::Regex);
        assert!(!structure.definitions_v2.iter().any(|d| d.term == "Contract" && d.source == ExtractionSource::Llm));
    }

    #[tokio::test]
    async fn short_definition_text_is_rejected_by_validation() {
        let response = serde_json::json!({"definitions": [{"term": "X", "definition_text": "y"}]}).to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let mut structure = structure_with_one_clause("text");
        extract_definitions_hybrid(llm, &mut structure, "text").await.unwrap();
        assert!(structure.definitions_v2.is_empty());
    }

    #[tokio::test]
    async fn oversized_definition_text_is_truncated_to_the_stored_cap() {
        let long_text = "a".repeat(5000);
        let response = serde_json::json!({
            "definitions": [{"term": "Overlong Term", "definition_text": long_text}]
        })
        .to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let mut structure = structure_with_one_clause("text");
        extract_definitions_hybrid(llm, &mut structure, "text").await.unwrap();
        let entry = structure.definitions_v2.iter().find(|d| d.term == "Overlong Term").unwrap();
        assert_eq!(entry.definition_text.chars().count(), 2003);
        assert!(entry.definition_text.ends_with("..."));
    }

    #[test]
    fn strip_article_markers_removes_the_surrounding_characters_but_not_a_bare_numeral() {
        assert_eq!(strip_article_markers("第三条"), "三");
        assert_eq!(strip_article_markers("第五款"), "五");
        assert_eq!(strip_article_markers("5"), "5");
    }

    #[tokio::test]
    async fn regex_and_llm_cross_references_coexist_after_chinese_numeral_normalization() {
        let response = serde_json::json!({
            "references": [{"target_clause_id": "第三条", "reference_text": "参照第三条"}]
        })
        .to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let mut structure = structure_with_one_clause("依据本条与第三条之规定，并参照 Article 5");
        structure.cross_references.push(CrossReference {
            source_clause_id: "1".to_string(),
            target_clause_id: "5".to_string(),
            reference_text: "Article 5".to_string(),
            is_valid: Some(false),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            reference_type: ReferenceType::Clause,
        });
        extract_cross_references_hybrid(llm, &mut structure).await.unwrap();
        assert_eq!(structure.cross_references.len(), 2);
        assert!(structure.cross_references.iter().any(|r| r.source == ExtractionSource::Regex && r.target_clause_id == "5"));
        assert!(structure
            .cross_references
            .iter()
            .any(|r| r.source == ExtractionSource::Llm && r.target_clause_id == "3"));
    }

    #[tokio::test]
    async fn cross_reference_supplement_skips_self_references() {
        let response = serde_json::json!({"references": [{"target_clause_id": "1", "reference_text": "this clause"}]}).to_string();
        let llm: Arc<dyn LLMClient> = Arc::new(ScriptedLlmClient::new(vec![ScriptedResponse::Text(response)]));
        let mut structure = structure_with_one_clause("as described in this clause");
        extract_cross_references_hybrid(llm, &mut structure).await.unwrap();
        assert!(structure.cross_references.is_empty());
    }
}
