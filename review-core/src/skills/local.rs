//! The ten built-in local skills, registered against a shared
//! `SkillContext` snapshot of the documents under review, plus the LLM
//! and embedding clients the skills that need semantic matching call out to.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{json, Map, Value};
use similar::{ChangeTag, TextDiff};

use super::SkillRegistry;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, EmbeddingClient, LLMClient};
use crate::model::{DocumentStructure, SkillBackend, SkillRegistration};
use crate::patterns;
use crate::signature::extract_json;

/// Read-only view of the task's documents, shared by every local skill via
/// an `Arc` captured in its closures. Skills never mutate the review graph
/// state directly — they return data the ReAct loop folds back in.
pub struct SkillContext {
    pub primary: DocumentStructure,
    pub baseline: Option<DocumentStructure>,
    pub domain_id: Option<String>,
}

fn registration(
    skill_id: &str,
    description: &str,
    input_schema: Value,
    domain: &str,
    category: &str,
) -> SkillRegistration {
    SkillRegistration {
        skill_id: skill_id.to_string(),
        name: skill_id.to_string(),
        description: description.to_string(),
        input_schema,
        output_schema: json!({"type": "object"}),
        backend: SkillBackend::Local,
        local_handler: Some(skill_id.to_string()),
        remote_workflow_id: None,
        domain: domain.to_string(),
        category: category.to_string(),
    }
}

fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::tool_failure("(prepare)", format!("missing required field '{field}'")))
}

fn string_array(input: &Value, field: &str) -> Vec<String> {
    input
        .get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Register all ten built-in skills against `context`, wiring `llm` and
/// `embeddings` into the skills whose contract requires a model call
/// (`extract_financial_terms`, `load_review_criteria`,
/// `fidic_calculate_time_bar`, `fidic_search_er`). Pass
/// `Arc::new(NullLlmClient)` / `Arc::new(NullEmbeddingClient)` to run with
/// regex-only degradation.
pub fn register_builtin_skills(
    registry: &mut SkillRegistry,
    context: Arc<SkillContext>,
    llm: Arc<dyn LLMClient>,
    embeddings: Arc<dyn EmbeddingClient>,
) -> Result<()> {
    register_get_clause_context(registry, context.clone())?;
    register_resolve_definition(registry, context.clone())?;
    register_compare_with_baseline(registry, context.clone())?;
    register_cross_reference_check(registry, context.clone())?;
    register_extract_financial_terms(registry, context.clone(), llm.clone())?;
    register_load_review_criteria(registry, context.clone(), llm.clone(), embeddings.clone())?;
    register_fidic_calculate_time_bar(registry, context.clone(), llm)?;
    register_fidic_merge_gc_pc(registry, context.clone())?;
    register_fidic_search_er(registry, context.clone(), embeddings)?;
    register_fidic_check_pc_consistency(registry, context)?;
    Ok(())
}

fn register_get_clause_context(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    let prepare_ctx = ctx.clone();
    registry.register_local(
        registration(
            "get_clause_context",
            "Return a clause's own text plus its ancestor titles and immediate children, by clause_id.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "*",
            "navigation",
        ),
        Arc::new(move |input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            if prepare_ctx.primary.find_clause(&clause_id).is_none() {
                return Err(Error::tool_failure("get_clause_context", format!("clause {clause_id} not found")));
            }
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let node = ctx
                    .primary
                    .find_clause(clause_id)
                    .ok_or_else(|| Error::tool_failure("get_clause_context", format!("clause {clause_id} not found")))?;
                let children: Vec<Value> = node
                    .children
                    .iter()
                    .map(|c| json!({"clause_id": c.clause_id, "title": c.title}))
                    .collect();
                Ok(json!({
                    "clause_id": node.clause_id,
                    "title": node.title,
                    "text": node.text,
                    "context_text": node.full_text(),
                    "children": children,
                }))
            }) as crate::skills::SkillFuture
        }),
    )
}

/// Quoted-term spans an LLM or author would plausibly mean by "the defined
/// terms referenced here" when `terms` is omitted — ASCII and curly quotes,
/// capped at 80 chars like the pattern library's own definition rules.
fn extract_quoted_terms(text: &str) -> Vec<String> {
    static QUOTED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#""([^"]{1,80})"|\u{201c}([^\u{201d}]{1,80})\u{201d}"#).unwrap());
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in QUOTED.captures_iter(text) {
        let Some(term) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string()) else { continue };
        let key = patterns::normalize_for_comparison(&term);
        if seen.insert(key) {
            out.push(term);
        }
    }
    out
}

fn register_resolve_definition(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    registry.register_local(
        registration(
            "resolve_definition",
            "Resolve the defined terms a clause references: explicit `terms` if given, \
             else every quoted term found in the clause's own text. Looks up definitions_v2 \
             (including aliases) first, then the flat definitions map.",
            json!({
                "type": "object",
                "properties": {
                    "clause_id": {"type": "string"},
                    "terms": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["clause_id"],
            }),
            "*",
            "definitions",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            let terms = string_array(&input, "terms");
            Ok(json!({"clause_id": clause_id, "terms": terms}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let node = ctx
                    .primary
                    .find_clause(clause_id)
                    .ok_or_else(|| Error::tool_failure("resolve_definition", format!("clause {clause_id} not found")))?;
                let explicit = string_array(&input, "terms");
                let candidates = if explicit.is_empty() { extract_quoted_terms(&node.text) } else { explicit };

                let mut found = Map::new();
                let mut not_found = Vec::new();
                for term in candidates {
                    let normalized = patterns::normalize_for_comparison(&term);
                    if let Some(entry) = ctx.primary.definitions_v2.iter().find(|d| {
                        patterns::normalize_for_comparison(&d.term) == normalized
                            || d.aliases.iter().any(|a| patterns::normalize_for_comparison(a) == normalized)
                    }) {
                        found.insert(
                            term,
                            json!({
                                "definition_text": entry.definition_text,
                                "source": entry.source,
                                "confidence": entry.confidence,
                            }),
                        );
                        continue;
                    }
                    let flat_match = ctx
                        .primary
                        .definitions
                        .iter()
                        .find(|(k, _)| patterns::normalize_for_comparison(k) == normalized)
                        .map(|(_, v)| v.clone());
                    match flat_match {
                        Some(definition_text) => {
                            found.insert(term, json!({"definition_text": definition_text, "source": "definitions", "confidence": 0.5}));
                        }
                        None => not_found.push(term),
                    }
                }
                Ok(json!({"clause_id": clause_id, "found": Value::Object(found), "not_found": not_found}))
            }) as crate::skills::SkillFuture
        }),
    )
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unified-diff summary capped at 5 added and 5 removed lines, so a
/// reviewer gets a sense of the change without a full side-by-side render.
fn summarize_diff(old: &str, new: &str) -> Value {
    let diff = TextDiff::from_lines(old, new);
    let mut added = Vec::new();
    let mut removed = Vec::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert if added.len() < 5 => added.push(change.value().trim_end().to_string()),
            ChangeTag::Delete if removed.len() < 5 => removed.push(change.value().trim_end().to_string()),
            _ => {}
        }
    }
    json!({"added": added, "removed": removed})
}

fn register_compare_with_baseline(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    registry.register_local(
        registration(
            "compare_with_baseline",
            "Compare a clause's text against the corresponding clause in the baseline \
             document, summarizing the diff (up to 5 added/5 removed lines) if they differ.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "*",
            "comparison",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let Some(baseline) = &ctx.baseline else {
                    return Ok(json!({
                        "clause_id": clause_id,
                        "has_baseline": false,
                        "is_identical": null,
                        "differences_summary": null,
                    }));
                };
                let primary_text = ctx.primary.find_clause(clause_id).map(|n| n.text.clone()).unwrap_or_default();
                let baseline_text = baseline.find_clause(clause_id).map(|n| n.text.clone()).unwrap_or_default();
                let is_identical = normalize_whitespace(&primary_text) == normalize_whitespace(&baseline_text);
                let differences_summary = if is_identical { None } else { Some(summarize_diff(&baseline_text, &primary_text)) };
                Ok(json!({
                    "clause_id": clause_id,
                    "has_baseline": true,
                    "is_identical": is_identical,
                    "differences_summary": differences_summary,
                }))
            }) as crate::skills::SkillFuture
        }),
    )
}

fn register_cross_reference_check(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    registry.register_local(
        registration(
            "cross_reference_check",
            "List every cross-reference pointing out of a clause, flagging invalid targets.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "*",
            "validation",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let references: Vec<&crate::model::CrossReference> =
                    ctx.primary.cross_references.iter().filter(|r| r.source_clause_id == clause_id).collect();
                let invalid_references: Vec<&crate::model::CrossReference> =
                    references.iter().copied().filter(|r| r.is_valid == Some(false)).collect();
                let incoming = ctx.primary.cross_references.iter().filter(|r| r.target_clause_id == clause_id).count();
                Ok(json!({
                    "clause_id": clause_id,
                    "references": references,
                    "invalid_references": invalid_references,
                    "totals": {
                        "outgoing": references.len(),
                        "incoming": incoming,
                        "invalid": invalid_references.len(),
                    },
                }))
            }) as crate::skills::SkillFuture
        }),
    )
}

fn regex_financial_terms(text: &str) -> Vec<Value> {
    static AMOUNT_PREFIX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)(?:USD|EUR|GBP|RMB|CNY|\$|\u{a3}|\u{20ac}|\u{a5})\s?[\d,]+(?:\.\d+)?").unwrap());
    static AMOUNT_SUFFIX_ZH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d,]+(?:\.\d+)?\s?(?:元|人民币|美元)").unwrap());
    static PERCENTAGE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?\s?%|百分之[〇零一二三四五六七八九十百千万\d]+").unwrap());
    static DURATION: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b\d+\s?(?:days?|months?|years?)\b|\d+\s?(?:个)?(?:天|日|月|年)").unwrap());
    static DATE_ISO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
    static DATE_ZH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}年\d{1,2}月\d{1,2}日").unwrap());

    let mut out = Vec::new();
    for (pattern, kind) in [
        (&*AMOUNT_PREFIX, "amount"),
        (&*AMOUNT_SUFFIX_ZH, "amount"),
        (&*PERCENTAGE, "percentage"),
        (&*DURATION, "duration"),
        (&*DATE_ISO, "date"),
        (&*DATE_ZH, "date"),
    ] {
        for m in pattern.find_iter(text) {
            out.push(json!({"type": kind, "value": m.as_str(), "source": "regex"}));
        }
    }
    out
}

fn financial_terms_prompt(text: &str) -> Vec<ChatMessage> {
    let instructions = "Find financial terms expressed in words rather than symbols or digits \
        (e.g. '合同总价的百分之五', 'twice the Contract Price', 'double the original sum'). \
        For each, give its literal value text, a type ('amount', 'percentage', 'duration', or \
        'date'), and a short semantic_meaning describing what it resolves to. Respond with \
        JSON: {\"terms\": [{\"value\": string, \"type\": string, \"semantic_meaning\": string}, \
        ...]}. If none, return {\"terms\": []}.";
    vec![ChatMessage::system(instructions), ChatMessage::user(text.to_string())]
}

fn register_extract_financial_terms(registry: &mut SkillRegistry, ctx: Arc<SkillContext>, llm: Arc<dyn LLMClient>) -> Result<()> {
    registry.register_local(
        registration(
            "extract_financial_terms",
            "Scan a clause for monetary amounts, percentages, durations, and dates; \
             supplemented by an LLM pass for textual expressions the regex phase can't catch.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "*",
            "finance",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            let llm = llm.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let text = ctx
                    .primary
                    .find_clause(clause_id)
                    .map(|n| n.full_text())
                    .ok_or_else(|| Error::tool_failure("extract_financial_terms", format!("clause {clause_id} not found")))?;

                let mut terms = regex_financial_terms(&text);
                let mut seen: HashSet<String> = terms
                    .iter()
                    .filter_map(|t| t.get("value").and_then(Value::as_str))
                    .map(patterns::normalize_for_comparison)
                    .collect();

                if let Ok(response) = llm.chat(&financial_terms_prompt(&text), 0.0, 1024).await {
                    if let Ok(value) = extract_json(&response) {
                        if let Some(candidates) = value.get("terms").and_then(Value::as_array) {
                            for candidate in candidates {
                                let Some(v) = candidate.get("value").and_then(Value::as_str) else { continue };
                                let key = patterns::normalize_for_comparison(v);
                                if !seen.insert(key) {
                                    continue;
                                }
                                terms.push(json!({
                                    "type": candidate.get("type").and_then(Value::as_str).unwrap_or("other"),
                                    "value": v,
                                    "semantic_meaning": candidate.get("semantic_meaning").and_then(Value::as_str),
                                    "source": "llm",
                                }));
                            }
                        }
                    }
                }

                let count = terms.len();
                Ok(json!({"clause_id": clause_id, "terms": terms, "count": count}))
            }) as crate::skills::SkillFuture
        }),
    )
}

struct ReviewCriterion {
    clause_ref: Option<&'static str>,
    text: &'static str,
}

const CRITERIA_FIDIC: &[ReviewCriterion] = &[
    ReviewCriterion { clause_ref: Some("20.1"), text: "time bar notice periods" },
    ReviewCriterion { clause_ref: Some("13"), text: "variations and claims procedure" },
    ReviewCriterion { clause_ref: Some("11.1"), text: "defects notification period" },
    ReviewCriterion { clause_ref: Some("17.6"), text: "limitation of liability caps" },
    ReviewCriterion { clause_ref: Some("19"), text: "force majeure / exceptional events" },
];

const CRITERIA_SPA: &[ReviewCriterion] = &[
    ReviewCriterion { clause_ref: None, text: "representations and warranties survival" },
    ReviewCriterion { clause_ref: None, text: "indemnification caps and baskets" },
    ReviewCriterion { clause_ref: None, text: "conditions precedent to closing" },
    ReviewCriterion { clause_ref: None, text: "material adverse change definition" },
];

const CRITERIA_GENERIC: &[ReviewCriterion] = &[
    ReviewCriterion { clause_ref: None, text: "governing law" },
    ReviewCriterion { clause_ref: None, text: "termination rights" },
    ReviewCriterion { clause_ref: None, text: "liability limits" },
    ReviewCriterion { clause_ref: None, text: "dispute resolution" },
];

fn review_criteria_catalog(domain_id: &str) -> &'static [ReviewCriterion] {
    match domain_id {
        "fidic" => CRITERIA_FIDIC,
        "spa" => CRITERIA_SPA,
        _ => CRITERIA_GENERIC,
    }
}

fn criteria_filter_prompt(clause_text: &str, candidates: &[&str]) -> Vec<ChatMessage> {
    let instructions = "You are filtering a shortlist of review checklist items down to the \
        ones genuinely applicable to this clause. Respond with JSON: {\"matched_criteria\": \
        [{\"criterion\": string, \"applicable\": bool, \"applicability_reason\": string}, \
        ...]}, at most 3 entries, applicable ones only.";
    let list = candidates.iter().enumerate().map(|(i, c)| format!("{}. {c}", i + 1)).collect::<Vec<_>>().join("\n");
    vec![
        ChatMessage::system(instructions),
        ChatMessage::user(format!("Clause text:\n{clause_text}\n\nCandidate criteria:\n{list}")),
    ]
}

fn criteria_from_json(value: &Value) -> Option<Vec<Value>> {
    let arr = value.get("matched_criteria")?.as_array()?;
    let entries: Vec<Value> = arr
        .iter()
        .filter(|e| e.get("applicable").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|e| {
            let criterion = e.get("criterion")?.as_str()?.to_string();
            let reason = e.get("applicability_reason").and_then(Value::as_str).unwrap_or_default().to_string();
            Some(json!({"criterion": criterion, "applicable": true, "applicability_reason": reason}))
        })
        .collect();
    if entries.is_empty() { None } else { Some(entries) }
}

fn register_load_review_criteria(
    registry: &mut SkillRegistry,
    ctx: Arc<SkillContext>,
    llm: Arc<dyn LLMClient>,
    embeddings: Arc<dyn EmbeddingClient>,
) -> Result<()> {
    registry.register_local(
        registration(
            "load_review_criteria",
            "Match a clause against the domain's review checklist: exact clause reference \
             first, then embedding similarity (threshold 0.5, top 5) filtered by the LLM down \
             to at most 3 applicable entries.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "*",
            "configuration",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            let llm = llm.clone();
            let embeddings = embeddings.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?.to_string();
                let domain_id = ctx.domain_id.clone().unwrap_or_else(|| "generic".to_string());
                let catalog = review_criteria_catalog(&domain_id);
                let normalized_clause = patterns::normalize_for_comparison(&clause_id);

                if let Some(exact) = catalog
                    .iter()
                    .find(|c| c.clause_ref.map(patterns::normalize_for_comparison).as_deref() == Some(normalized_clause.as_str()))
                {
                    return Ok(json!({
                        "domain_id": domain_id,
                        "clause_id": clause_id,
                        "matched_criteria": [{
                            "criterion": exact.text,
                            "applicable": true,
                            "applicability_reason": "exact clause reference match",
                        }],
                    }));
                }

                let empty = json!({"domain_id": domain_id, "clause_id": clause_id, "matched_criteria": []});
                let clause_text = ctx.primary.find_clause(&clause_id).map(|n| n.text.clone()).unwrap_or_default();

                let mut texts = vec![clause_text.clone()];
                texts.extend(catalog.iter().map(|c| c.text.to_string()));
                let vectors = embeddings.embed(&texts).await.unwrap_or_default();
                if vectors.len() != texts.len() {
                    return Ok(empty);
                }

                let clause_vec = &vectors[0];
                let mut scored: Vec<(f32, &ReviewCriterion)> = catalog
                    .iter()
                    .zip(vectors[1..].iter())
                    .map(|(c, v)| (cosine_similarity(clause_vec, v), c))
                    .filter(|(score, _)| *score >= 0.5)
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(5);
                if scored.is_empty() {
                    return Ok(empty);
                }

                let candidate_texts: Vec<&str> = scored.iter().map(|(_, c)| c.text).collect();
                let filtered = match llm.chat(&criteria_filter_prompt(&clause_text, &candidate_texts), 0.0, 1024).await {
                    Ok(response) => extract_json(&response).ok().and_then(|v| criteria_from_json(&v)),
                    Err(_) => None,
                };

                let matched = match filtered {
                    Some(entries) => entries.into_iter().take(3).collect::<Vec<_>>(),
                    None => scored
                        .into_iter()
                        .take(3)
                        .map(|(_, c)| json!({
                            "criterion": c.text,
                            "applicable": true,
                            "applicability_reason": "embedding similarity fallback",
                        }))
                        .collect(),
                };

                Ok(json!({"domain_id": domain_id, "clause_id": clause_id, "matched_criteria": matched}))
            }) as crate::skills::SkillFuture
        }),
    )
}

const HARD_BAR_MARKERS: &[&str] = &["time barred", "shall be barred", "forfeit", "deemed to have waived", "无权提出", "丧失"];
const SOFT_BAR_MARKERS: &[&str] = &["may be rejected", "may be disallowed", "可能不予受理"];
const REASONABLE_PERIOD_MARKERS: &[&str] = &["a reasonable period", "reasonable time", "合理期限", "合理时间"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_lowercase()))
}

fn classify_time_bar(sentence: &str) -> &'static str {
    if contains_any(sentence, HARD_BAR_MARKERS) {
        "hard_bar"
    } else if contains_any(sentence, SOFT_BAR_MARKERS) {
        "soft_bar"
    } else {
        "advisory"
    }
}

fn regex_time_bars(text: &str) -> Vec<Value> {
    static DAY_COUNT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:calendar\s+)?days?|(\d+)\s*(?:个)?(?:日|天)").unwrap());
    let mut out = Vec::new();
    for sentence in text.split(['.', '。']) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if let Some(caps) = DAY_COUNT.captures(sentence) {
            let days: u32 = caps.get(1).or_else(|| caps.get(2)).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            out.push(json!({
                "deadline_days": days,
                "trigger": sentence,
                "consequence": if contains_any(sentence, HARD_BAR_MARKERS) || contains_any(sentence, SOFT_BAR_MARKERS) {
                    Some(sentence)
                } else {
                    None
                },
                "classification": classify_time_bar(sentence),
            }));
        } else if contains_any(sentence, REASONABLE_PERIOD_MARKERS) {
            out.push(json!({
                "deadline_days": 0,
                "trigger": sentence,
                "consequence": Value::Null,
                "classification": "advisory",
            }));
        }
    }
    out
}

fn time_bar_prompt(text: &str) -> Vec<ChatMessage> {
    let instructions = "Identify FIDIC-style notice time bars in this clause: the day count \
        (0 if the deadline is a non-numeric 'reasonable period' instead of a fixed count), the \
        triggering event, the consequence of missing it, and whether it's a hard_bar (claim is \
        lost), soft_bar (claim may be reduced or challenged), or advisory (no penalty stated). \
        Respond with JSON: {\"time_bars\": [{\"deadline_days\": int, \"trigger\": string, \
        \"consequence\": string, \"classification\": string}, ...]}.";
    vec![ChatMessage::system(instructions), ChatMessage::user(text.to_string())]
}

/// Fold the LLM's proposal into the regex phase's findings: fill only the
/// `trigger`/`consequence` fields the regex phase left empty, take the
/// LLM's classification (the regex heuristic is a floor, not ground truth),
/// and append any additional time bar the regex phase missed entirely.
fn enrich_time_bars(time_bars: &mut Vec<Value>, llm_value: &Value) {
    let Some(llm_bars) = llm_value.get("time_bars").and_then(Value::as_array) else { return };
    for (i, llm_bar) in llm_bars.iter().enumerate() {
        if let Some(existing) = time_bars.get_mut(i) {
            if existing.get("trigger").and_then(Value::as_str).unwrap_or_default().is_empty() {
                if let Some(t) = llm_bar.get("trigger").and_then(Value::as_str) {
                    existing["trigger"] = json!(t);
                }
            }
            if existing.get("consequence").map(Value::is_null).unwrap_or(true) {
                if let Some(c) = llm_bar.get("consequence").and_then(Value::as_str) {
                    existing["consequence"] = json!(c);
                }
            }
            if let Some(c) = llm_bar.get("classification").and_then(Value::as_str) {
                if matches!(c, "hard_bar" | "soft_bar" | "advisory") {
                    existing["classification"] = json!(c);
                }
            }
        } else if let Some(days) = llm_bar.get("deadline_days").and_then(Value::as_u64) {
            time_bars.push(json!({
                "deadline_days": days,
                "trigger": llm_bar.get("trigger").cloned().unwrap_or(Value::Null),
                "consequence": llm_bar.get("consequence").cloned().unwrap_or(Value::Null),
                "classification": llm_bar.get("classification").and_then(Value::as_str).unwrap_or("advisory"),
            }));
        }
    }
}

fn register_fidic_calculate_time_bar(registry: &mut SkillRegistry, ctx: Arc<SkillContext>, llm: Arc<dyn LLMClient>) -> Result<()> {
    registry.register_local(
        registration(
            "fidic_calculate_time_bar",
            "Extract notice-period time bars from a clause: day counts, triggers, and \
             consequences, classified hard_bar/soft_bar/advisory.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "fidic",
            "time_bar",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            let llm = llm.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let text = ctx
                    .primary
                    .find_clause(clause_id)
                    .map(|n| n.full_text())
                    .ok_or_else(|| Error::tool_failure("fidic_calculate_time_bar", format!("clause {clause_id} not found")))?;

                let mut time_bars = regex_time_bars(&text);
                if let Ok(response) = llm.chat(&time_bar_prompt(&text), 0.0, 1024).await {
                    if let Ok(value) = extract_json(&response) {
                        enrich_time_bars(&mut time_bars, &value);
                    }
                }
                let has_strict_time_bar = time_bars.iter().any(|t| t["classification"] == "hard_bar");
                Ok(json!({"clause_id": clause_id, "time_bars": time_bars, "has_strict_time_bar": has_strict_time_bar}))
            }) as crate::skills::SkillFuture
        }),
    )
}

fn register_fidic_merge_gc_pc(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    registry.register_local(
        registration(
            "fidic_merge_gc_pc",
            "Merge a FIDIC General Conditions clause with its Particular Conditions amendment, \
             if a supplement document amends it.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}},
                "required": ["clause_id"],
            }),
            "fidic",
            "amendment",
        ),
        Arc::new(|input| {
            let clause_id = require_str(&input, "clause_id")?.to_string();
            Ok(json!({"clause_id": clause_id}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let gc_text = ctx.primary.find_clause(clause_id).map(|n| n.text.clone());
                let pc_text = ctx.baseline.as_ref().and_then(|baseline| baseline.find_clause(clause_id)).map(|n| n.text.clone());
                let merged = match (&gc_text, &pc_text) {
                    (Some(gc), Some(pc)) => format!("{gc}\n\n[Amended by Particular Conditions]\n{pc}"),
                    (Some(gc), None) => gc.clone(),
                    (None, Some(pc)) => pc.clone(),
                    (None, None) => String::new(),
                };
                Ok(json!({
                    "clause_id": clause_id,
                    "general_conditions_text": gc_text,
                    "particular_conditions_text": pc_text,
                    "merged_text": merged,
                    "amended": pc_text.is_some(),
                }))
            }) as crate::skills::SkillFuture
        }),
    )
}

fn collect_clause_texts<'a>(nodes: &'a [crate::model::ClauseNode], out: &mut Vec<(&'a str, Option<&'a str>, &'a str)>) {
    for node in nodes {
        out.push((node.clause_id.as_str(), node.title.as_deref(), node.text.as_str()));
        collect_clause_texts(&node.children, out);
    }
}

fn register_fidic_search_er(registry: &mut SkillRegistry, ctx: Arc<SkillContext>, embeddings: Arc<dyn EmbeddingClient>) -> Result<()> {
    registry.register_local(
        registration(
            "fidic_search_er",
            "Semantic search over the Employer's Requirements document (supplied as a \
             reference document) for text matching a query, ranked by embedding cosine \
             similarity.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "top_k": {"type": "integer"},
                },
                "required": ["query"],
            }),
            "fidic",
            "search",
        ),
        Arc::new(|input| {
            let query = require_str(&input, "query")?.to_string();
            let top_k = input.get("top_k").and_then(Value::as_u64).unwrap_or(5);
            Ok(json!({"query": query, "top_k": top_k}))
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            let embeddings = embeddings.clone();
            Box::pin(async move {
                let query = require_str(&input, "query")?.to_string();
                let top_k = input.get("top_k").and_then(Value::as_u64).unwrap_or(5) as usize;

                let mut candidates = Vec::new();
                if let Some(baseline) = &ctx.baseline {
                    collect_clause_texts(&baseline.clauses, &mut candidates);
                }
                if candidates.is_empty() {
                    return Ok(json!({"query": query, "relevant_sections": []}));
                }

                let mut texts = vec![query.clone()];
                texts.extend(candidates.iter().map(|(_, _, text)| text.to_string()));
                let vectors = embeddings.embed(&texts).await.unwrap_or_default();
                if vectors.len() != texts.len() {
                    return Ok(json!({"query": query, "relevant_sections": []}));
                }

                let query_vec = &vectors[0];
                let mut scored: Vec<(f32, Value)> = candidates
                    .iter()
                    .zip(vectors[1..].iter())
                    .map(|((clause_id, title, text), v)| {
                        let score = cosine_similarity(query_vec, v);
                        (score, json!({"clause_id": clause_id, "title": title, "text": text, "score": score}))
                    })
                    .filter(|(score, _)| *score >= 0.3)
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(top_k);

                let relevant_sections: Vec<Value> = scored.into_iter().map(|(_, v)| v).collect();
                Ok(json!({"query": query, "relevant_sections": relevant_sections}))
            }) as crate::skills::SkillFuture
        }),
    )
}

const AMENDMENT_MARKERS: &[&str] = &["shall be amended", "is deleted", "is replaced", "修订", "删除", "替换"];

fn declares_amendment(pc_text: &str) -> bool {
    AMENDMENT_MARKERS.iter().any(|m| pc_text.contains(m))
}

fn check_obligation_vs_liability_cap(gc_text: &str, pc_text: &str, _clauses: &HashSet<&str>) -> Option<Value> {
    let gc_has = contains_any(gc_text, &["liability", "limitation"]);
    let pc_has = contains_any(pc_text, &["liability", "cap"]);
    (gc_has && pc_has && !declares_amendment(pc_text)).then(|| {
        json!({
            "check": "obligation_vs_liability_cap",
            "description": "Particular Conditions touches a liability cap without declaring an amendment to the General Conditions.",
        })
    })
}

fn check_time_bar_vs_procedure(gc_text: &str, pc_text: &str, _clauses: &HashSet<&str>) -> Option<Value> {
    static DAY_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*days?").unwrap());
    let gc_days = DAY_COUNT.captures(gc_text).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<u32>().ok());
    let pc_days = DAY_COUNT.captures(pc_text).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<u32>().ok());
    match (gc_days, pc_days) {
        (Some(g), Some(p)) if g != p && !declares_amendment(pc_text) => Some(json!({
            "check": "time_bar_vs_procedure",
            "description": format!("notice period changed from {g} to {p} days without amendment language"),
        })),
        _ => None,
    }
}

fn check_payment_vs_schedule(_gc_text: &str, pc_text: &str, _clauses: &HashSet<&str>) -> Option<Value> {
    (contains_any(pc_text, &["payment"]) && !contains_any(pc_text, &["schedule"]) && !declares_amendment(pc_text)).then(|| {
        json!({
            "check": "payment_vs_schedule",
            "description": "Particular Conditions modifies payment terms without referencing the payment schedule.",
        })
    })
}

fn check_risk_transfer_vs_insurance(_gc_text: &str, pc_text: &str, _clauses: &HashSet<&str>) -> Option<Value> {
    (contains_any(pc_text, &["risk"]) && !contains_any(pc_text, &["insurance"])).then(|| {
        json!({
            "check": "risk_transfer_vs_insurance",
            "description": "Particular Conditions shifts risk without a matching insurance provision.",
        })
    })
}

fn check_rights_vs_obligations(_gc_text: &str, pc_text: &str, _clauses: &HashSet<&str>) -> Option<Value> {
    (contains_any(pc_text, &["right"]) && !contains_any(pc_text, &["obligation"])).then(|| {
        json!({
            "check": "rights_vs_obligations",
            "description": "Particular Conditions grants a right without a corresponding obligation.",
        })
    })
}

fn check_cross_reference_stale(_gc_text: &str, pc_text: &str, clauses: &HashSet<&str>) -> Option<Value> {
    static CLAUSE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(?:Clause|Sub-Clause)\s+(\d+(?:\.\d+)*)").unwrap());
    CLAUSE_REF.captures_iter(pc_text).find_map(|caps| {
        let target = caps.get(1)?.as_str();
        (!clauses.contains(target)).then(|| {
            json!({
                "check": "cross_reference_stale",
                "description": format!("Particular Conditions references Clause {target}, which does not exist in the General Conditions."),
            })
        })
    })
}

fn register_fidic_check_pc_consistency(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) -> Result<()> {
    registry.register_local(
        registration(
            "fidic_check_pc_consistency",
            "Run the six pairwise consistency checks between a General Conditions clause and \
             its Particular Conditions text.",
            json!({
                "type": "object",
                "properties": {"clause_id": {"type": "string"}, "pc_text": {"type": "string"}},
                "required": ["clause_id", "pc_text"],
            }),
            "fidic",
            "consistency",
        ),
        Arc::new(|input| {
            require_str(&input, "clause_id")?;
            require_str(&input, "pc_text")?;
            Ok(input)
        }),
        Arc::new(move |input| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let clause_id = require_str(&input, "clause_id")?;
                let pc_text = require_str(&input, "pc_text")?;
                let gc_text = ctx.primary.find_clause(clause_id).map(|n| n.text.clone()).unwrap_or_default();
                let clause_set = ctx.primary.clause_id_set();
                let checks: [fn(&str, &str, &HashSet<&str>) -> Option<Value>; 6] = [
                    check_obligation_vs_liability_cap,
                    check_time_bar_vs_procedure,
                    check_payment_vs_schedule,
                    check_risk_transfer_vs_insurance,
                    check_rights_vs_obligations,
                    check_cross_reference_stale,
                ];
                let consistency_issues: Vec<Value> = checks.iter().filter_map(|check| check(&gc_text, pc_text, &clause_set)).collect();
                Ok(json!({"clause_id": clause_id, "consistency_issues": consistency_issues}))
            }) as crate::skills::SkillFuture
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{NullEmbeddingClient, NullLlmClient};
    use crate::model::{ClauseNode, DefinitionEntry, ExtractionSource};

    fn context_with_one_clause() -> Arc<SkillContext> {
        let mut structure = DocumentStructure::empty("doc-1");
        let mut node = ClauseNode::new("1", 0, r#"The Contractor shall give notice of "Claim" within 28 days, failing which the Contractor shall be barred."#);
        node.title = Some("Notices".to_string());
        structure.clauses.push(node);
        structure.recompute_total_clauses();
        Arc::new(SkillContext {
            primary: structure,
            baseline: None,
            domain_id: Some("fidic".to_string()),
        })
    }

    fn register_with_nulls(registry: &mut SkillRegistry, ctx: Arc<SkillContext>) {
        register_builtin_skills(registry, ctx, Arc::new(NullLlmClient), Arc::new(NullEmbeddingClient)).unwrap();
    }

    #[test]
    fn all_ten_skills_register_without_error() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        assert_eq!(registry.len(), 10);
    }

    #[tokio::test]
    async fn get_clause_context_returns_text_for_known_clause() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("get_clause_context", json!({"clause_id": "1"})).await;
        assert!(result.success);
        assert!(result.data.unwrap()["text"].as_str().unwrap().contains("28 days"));
    }

    #[tokio::test]
    async fn get_clause_context_fails_cleanly_for_unknown_clause() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("get_clause_context", json!({"clause_id": "99"})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn resolve_definition_falls_back_to_quoted_terms_when_none_given() {
        let mut primary = DocumentStructure::empty("doc-1");
        let node = ClauseNode::new("1", 0, r#"As used in this "Claim", the term applies."#);
        primary.clauses.push(node);
        primary.recompute_total_clauses();
        primary.definitions_v2.push(DefinitionEntry {
            term: "Claim".to_string(),
            definition_text: "a request for additional time or money".to_string(),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            source_clause_id: None,
            aliases: vec!["Notice of Claim".to_string()],
            category: None,
        });
        let ctx_owned = SkillContext { primary, baseline: None, domain_id: None };
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, Arc::new(ctx_owned));

        let result = registry.prepare_and_call("resolve_definition", json!({"clause_id": "1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        assert!(data["found"].get("Claim").is_some());
        assert!(data["not_found"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_definition_matches_via_alias() {
        let mut primary = DocumentStructure::empty("doc-1");
        primary.clauses.push(ClauseNode::new("1", 0, "text"));
        primary.recompute_total_clauses();
        primary.definitions_v2.push(DefinitionEntry {
            term: "Claim".to_string(),
            definition_text: "a request for additional time or money".to_string(),
            source: ExtractionSource::Regex,
            confidence: 1.0,
            source_clause_id: None,
            aliases: vec!["Notice of Claim".to_string()],
            category: None,
        });
        let ctx_owned = SkillContext { primary, baseline: None, domain_id: None };
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, Arc::new(ctx_owned));

        let result = registry
            .prepare_and_call("resolve_definition", json!({"clause_id": "1", "terms": ["notice of claim"]}))
            .await;
        assert!(result.success);
        assert!(result.data.unwrap()["found"].get("notice of claim").is_some());
    }

    #[tokio::test]
    async fn compare_with_baseline_summarizes_differences_when_texts_diverge() {
        let mut registry = SkillRegistry::new();
        let mut primary = DocumentStructure::empty("doc-1");
        primary.clauses.push(ClauseNode::new("1", 0, "line one\nline two\n"));
        primary.recompute_total_clauses();
        let mut baseline = DocumentStructure::empty("doc-0");
        baseline.clauses.push(ClauseNode::new("1", 0, "line one\nline changed\n"));
        baseline.recompute_total_clauses();
        let ctx = Arc::new(SkillContext { primary, baseline: Some(baseline), domain_id: None });
        register_with_nulls(&mut registry, ctx);

        let result = registry.prepare_and_call("compare_with_baseline", json!({"clause_id": "1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["is_identical"], false);
        assert!(!data["differences_summary"]["added"].as_array().unwrap().is_empty());
        assert!(!data["differences_summary"]["removed"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn compare_with_baseline_reports_no_baseline_when_none_uploaded() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("compare_with_baseline", json!({"clause_id": "1"})).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["has_baseline"], false);
    }

    #[tokio::test]
    async fn extract_financial_terms_finds_percentages_durations_and_amounts() {
        let mut primary = DocumentStructure::empty("doc-1");
        primary.clauses.push(ClauseNode::new(
            "1",
            0,
            "The advance payment is USD 1,200,000, equal to 30% of the Contract Price, payable within 28 days.",
        ));
        primary.recompute_total_clauses();
        let ctx_owned = SkillContext { primary, baseline: None, domain_id: None };
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, Arc::new(ctx_owned));

        let result = registry.prepare_and_call("extract_financial_terms", json!({"clause_id": "1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        let terms = data["terms"].as_array().unwrap();
        assert!(terms.iter().any(|t| t["type"] == "amount"));
        assert!(terms.iter().any(|t| t["type"] == "percentage"));
        assert!(terms.iter().any(|t| t["type"] == "duration"));
    }

    #[tokio::test]
    async fn load_review_criteria_exact_clause_ref_bypasses_similarity() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("load_review_criteria", json!({"clause_id": "20.1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        let matched = data["matched_criteria"].as_array().unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0]["applicability_reason"], "exact clause reference match");
    }

    #[tokio::test]
    async fn load_review_criteria_returns_empty_without_an_embedding_client() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("load_review_criteria", json!({"clause_id": "1"})).await;
        assert!(result.success);
        assert!(result.data.unwrap()["matched_criteria"].as_array().unwrap().is_empty());
    }

    struct FixedEmbeddingClient;

    #[async_trait::async_trait]
    impl EmbeddingClient for FixedEmbeddingClient {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| if t.contains("notice") { vec![1.0, 0.0] } else { vec![0.0, 1.0] }).collect())
        }
    }

    #[tokio::test]
    async fn fidic_search_er_ranks_by_cosine_similarity_against_the_query() {
        let mut primary = DocumentStructure::empty("doc-1");
        primary.clauses.push(ClauseNode::new("1", 0, "text"));
        primary.recompute_total_clauses();
        let mut baseline = DocumentStructure::empty("er-1");
        let mut matching = ClauseNode::new("er-1", 0, "notice submission requirements");
        matching.title = Some("Notices".to_string());
        baseline.clauses.push(matching);
        baseline.clauses.push(ClauseNode::new("er-2", 0, "site access arrangements"));
        baseline.recompute_total_clauses();
        let ctx = Arc::new(SkillContext { primary, baseline: Some(baseline), domain_id: Some("fidic".to_string()) });

        let mut registry = SkillRegistry::new();
        register_builtin_skills(&mut registry, ctx, Arc::new(NullLlmClient), Arc::new(FixedEmbeddingClient)).unwrap();

        let result = registry.prepare_and_call("fidic_search_er", json!({"query": "notice procedure"})).await;
        assert!(result.success);
        let sections = result.data.unwrap()["relevant_sections"].as_array().unwrap().clone();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0]["clause_id"], "er-1");
    }

    #[tokio::test]
    async fn fidic_search_er_returns_empty_without_a_baseline_document() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("fidic_search_er", json!({"query": "anything"})).await;
        assert!(result.success);
        assert!(result.data.unwrap()["relevant_sections"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fidic_calculate_time_bar_classifies_hard_bar_from_forfeiture_language() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry.prepare_and_call("fidic_calculate_time_bar", json!({"clause_id": "1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["has_strict_time_bar"], true);
        let bars = data["time_bars"].as_array().unwrap();
        assert!(bars.iter().any(|b| b["deadline_days"] == 28 && b["classification"] == "hard_bar"));
    }

    #[tokio::test]
    async fn fidic_calculate_time_bar_discovers_reasonable_period_as_advisory() {
        let mut primary = DocumentStructure::empty("doc-1");
        primary.clauses.push(ClauseNode::new("1", 0, "The Engineer shall respond within a reasonable period."));
        primary.recompute_total_clauses();
        let ctx_owned = SkillContext { primary, baseline: None, domain_id: None };
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, Arc::new(ctx_owned));

        let result = registry.prepare_and_call("fidic_calculate_time_bar", json!({"clause_id": "1"})).await;
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["has_strict_time_bar"], false);
        let bars = data["time_bars"].as_array().unwrap();
        assert!(bars.iter().any(|b| b["deadline_days"] == 0 && b["classification"] == "advisory"));
    }

    #[tokio::test]
    async fn fidic_check_pc_consistency_flags_a_stale_cross_reference() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry
            .prepare_and_call(
                "fidic_check_pc_consistency",
                json!({"clause_id": "1", "pc_text": "Notwithstanding Clause 99.9, notice shall still be given."}),
            )
            .await;
        assert!(result.success);
        let issues = result.data.unwrap()["consistency_issues"].as_array().unwrap().clone();
        assert!(issues.iter().any(|i| i["check"] == "cross_reference_stale"));
    }

    #[tokio::test]
    async fn fidic_check_pc_consistency_is_silent_when_amendment_language_is_present() {
        let mut registry = SkillRegistry::new();
        register_with_nulls(&mut registry, context_with_one_clause());
        let result = registry
            .prepare_and_call(
                "fidic_check_pc_consistency",
                json!({"clause_id": "1", "pc_text": "Sub-Clause 20.1 shall be amended: the liability cap is increased."}),
            )
            .await;
        assert!(result.success);
        let issues = result.data.unwrap()["consistency_issues"].as_array().unwrap().clone();
        assert!(!issues.iter().any(|i| i["check"] == "obligation_vs_liability_cap"));
    }
}
