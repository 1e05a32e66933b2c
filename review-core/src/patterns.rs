//! Pattern & Extraction Library: stateless regex catalogs for
//! clause numbering, definitions, and cross-references, classified by
//! language and variant, plus the pure extraction primitive both hybrid
//! extractors (§4.4) run as their regex phase.
//!
//! Contract: every function here is pure and deterministic — identical input
//! always yields identical output.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{DefinitionCategory, DefinitionEntry, ExtractionSource, CrossReference, ReferenceType};

/// Language classification for a pattern rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

/// One named cross-reference rule.
pub struct CrossRefRule {
    pub name: &'static str,
    pub regex: Regex,
    pub target_group: usize,
    pub reference_type: ReferenceType,
    pub language: Language,
}

/// One named definition rule. `term_group`/`definition_group` index into the
/// regex's capture groups; `confidence` is the value assigned on a match
/// (1.0 for exact forms, 0.9 for the inline-party forms).
pub struct DefinitionRule {
    pub name: &'static str,
    pub regex: Regex,
    pub term_group: usize,
    pub definition_group: usize,
    pub confidence: f64,
    pub language: Language,
}

fn rule(pattern: &str) -> Regex {
    Regex::new(pattern).expect("pattern library regex must compile")
}

/// The built-in cross-reference rule catalog (English + Chinese, 15 rules).
pub static CROSS_REFERENCE_RULES: LazyLock<Vec<CrossRefRule>> = LazyLock::new(|| {
    vec![
        CrossRefRule {
            name: "en_clause",
            regex: rule(r"(?i)\bClause\s+(\d+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Clause,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_sub_clause",
            regex: rule(r"(?i)\bSub-Clause\s+(\d+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Clause,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_article",
            regex: rule(r"(?i)\bArticle\s+(\d+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Article,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_section",
            regex: rule(r"(?i)\bSection\s+(\d+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Section,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_paragraph",
            regex: rule(r"(?i)\bParagraph\s+(\d+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Paragraph,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_section_sign",
            regex: rule(r"§\s*(\d+(?:\.\d+)*)"),
            target_group: 1,
            reference_type: ReferenceType::Section,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_appendix",
            regex: rule(r"(?i)\bAppendix\s+([A-Z0-9]+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Appendix,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_schedule",
            regex: rule(r"(?i)\bSchedule\s+([A-Z0-9]+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Schedule,
            language: Language::English,
        },
        CrossRefRule {
            name: "en_annex",
            regex: rule(r"(?i)\bAnnex\s+([A-Z0-9]+(?:\.\d+)*)\b"),
            target_group: 1,
            reference_type: ReferenceType::Annex,
            language: Language::English,
        },
        CrossRefRule {
            name: "zh_article_arabic",
            regex: rule(r"第\s*(\d+)\s*条"),
            target_group: 1,
            reference_type: ReferenceType::Clause,
            language: Language::Chinese,
        },
        CrossRefRule {
            name: "zh_article_cjk",
            regex: rule(r"第([一二三四五六七八九十百零〇两]+)条"),
            target_group: 1,
            reference_type: ReferenceType::Clause,
            language: Language::Chinese,
        },
        CrossRefRule {
            name: "zh_paragraph",
            regex: rule(r"第\s*(\d+)\s*款"),
            target_group: 1,
            reference_type: ReferenceType::Paragraph,
            language: Language::Chinese,
        },
        CrossRefRule {
            name: "zh_item",
            regex: rule(r"第\s*(\d+)\s*项"),
            target_group: 1,
            reference_type: ReferenceType::Section,
            language: Language::Chinese,
        },
        CrossRefRule {
            name: "zh_see_reference",
            regex: rule(r"(?:见|参见|依据)第\s*(\d+)\s*条"),
            target_group: 1,
            reference_type: ReferenceType::Clause,
            language: Language::Chinese,
        },
        CrossRefRule {
            name: "zh_attachment",
            regex: rule(r"(附件|附录|附表)\s*([一二三四五六七八九十\d]+)"),
            target_group: 2,
            reference_type: ReferenceType::Appendix,
            language: Language::Chinese,
        },
    ]
});

/// The built-in definition rule catalog (English + Chinese, 11 rules).
pub static DEFINITION_RULES: LazyLock<Vec<DefinitionRule>> = LazyLock::new(|| {
    vec![
        DefinitionRule {
            name: "en_means",
            regex: rule(r#""([^"]{1,80})"\s+means\s+([^.]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::English,
        },
        DefinitionRule {
            name: "en_shall_mean",
            regex: rule(r#""([^"]{1,80})"\s+shall\s+mean\s+([^.]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::English,
        },
        DefinitionRule {
            name: "en_refers_to",
            regex: rule(r#""([^"]{1,80})"\s+refers\s+to\s+([^.]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::English,
        },
        DefinitionRule {
            name: "en_is_defined_as",
            regex: rule(r#""([^"]{1,80})"\s+is\s+defined\s+as\s+([^.]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::English,
        },
        DefinitionRule {
            name: "en_hereinafter",
            regex: rule(r#"(.{1,200}?),?\s+hereinafter\s+referred\s+to\s+as\s+"([^"]{1,80})""#),
            term_group: 2,
            definition_group: 1,
            confidence: 0.9,
            language: Language::English,
        },
        DefinitionRule {
            name: "zh_zhi",
            regex: rule(r#""([^"]{1,80})"\s*指\s*([^。]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_shizhi",
            regex: rule(r#""([^"]{1,80})"\s*是指\s*([^。]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_xizhi",
            regex: rule(r#""([^"]{1,80})"\s*系指\s*([^。]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_colon",
            regex: rule(r#""([^"]{1,80})"\s*[:：]\s*([^。]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_ji",
            regex: rule(r#""([^"]{1,80})"\s*,\s*即\s*([^。]{1,2000})"#),
            term_group: 1,
            definition_group: 2,
            confidence: 1.0,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_inline_party_yixia_jiancheng",
            regex: rule(r#"(.{1,200}?)\s*\(以下简称\s*"([^"]{1,80})"\s*\)"#),
            term_group: 2,
            definition_group: 1,
            confidence: 0.9,
            language: Language::Chinese,
        },
        DefinitionRule {
            name: "zh_inline_party_yixia_cheng",
            regex: rule(r#"(.{1,200}?)\s*\(以下(?:称|简称)\s*"([^"]{1,80})"\s*\)"#),
            term_group: 2,
            definition_group: 1,
            confidence: 0.9,
            language: Language::Chinese,
        },
    ]
});

/// Fallback clause-numbering patterns tried by the Smart Parser when the LLM
/// proposal under-matches the document.
pub const FALLBACK_CLAUSE_PATTERNS: &[(&str, &str)] = &[
    ("numeric_dotted", r"^(\d+(?:\.\d+)*)\s"),
    ("zh_article_cjk", r"^第([一二三四五六七八九十百零〇两]+)条"),
    ("zh_article_arabic", r"^第(\d+)条"),
    ("article_n", r"(?i)^Article\s+(\d+)"),
    ("section_n", r"(?i)^Section\s+(\d+)"),
];

/// Convert a CJK numeral (covering 一~九十九, the range calls out)
/// to its arabic string form. Returns `None` if the text isn't a recognized
/// CJK numeral.
pub fn chinese_numeral_to_arabic(text: &str) -> Option<String> {
    if let Ok(n) = text.parse::<u32>() {
        return Some(n.to_string());
    }

    fn digit(c: char) -> Option<u32> {
        match c {
            '零' | '〇' => Some(0),
            '一' => Some(1),
            '二' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        }
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return None;
    }

    // Single digit, e.g. 五 -> 5.
    if chars.len() == 1 {
        return digit(chars[0]).map(|d| d.to_string());
    }

    // 十X / X十 / X十Y forms cover 10..99.
    if let Some(ten_pos) = chars.iter().position(|&c| c == '十') {
        let tens_digit = if ten_pos == 0 {
            1
        } else {
            digit(chars[ten_pos - 1])?
        };
        let ones_digit = if ten_pos + 1 < chars.len() {
            digit(chars[ten_pos + 1])?
        } else {
            0
        };
        let value = tens_digit * 10 + ones_digit;
        if value <= 99 {
            return Some(value.to_string());
        }
    }

    None
}

/// Normalize a term/definition text for comparison: strip surrounding quotes
/// and ASCII-case-fold. Used for first-match-wins dedup and for hybrid
/// extractor merge-key comparisons.
pub fn normalize_for_comparison(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\u{201c}' || c == '\u{201d}')
        .to_lowercase()
}

/// Extract definitions from `text` using the built-in rule catalog plus any
/// caller-supplied extras. Pure, deterministic: identical input yields
/// identical output.
pub fn extract_definitions(
    text: &str,
    source_clause_id: Option<&str>,
    extra_patterns: &[Regex],
) -> Vec<DefinitionEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    let mut consider = |term_raw: &str, def_raw: &str, confidence: f64| {
        let term = normalize_for_comparison(term_raw);
        if term.len() < 2 || term.len() > 50 {
            return;
        }
        if seen.contains(&term) {
            return;
        }
        seen.insert(term.clone());
        out.push(DefinitionEntry {
            term: term_raw.trim().trim_matches('"').to_string(),
            definition_text: def_raw.trim().to_string(),
            source: ExtractionSource::Regex,
            confidence,
            source_clause_id: source_clause_id.map(|s| s.to_string()),
            aliases: Vec::new(),
            category: None,
        });
    };

    for rule in DEFINITION_RULES.iter() {
        for caps in rule.regex.captures_iter(text) {
            let Some(term_match) = caps.get(rule.term_group) else { continue };
            let Some(def_match) = caps.get(rule.definition_group) else { continue };
            consider(term_match.as_str(), def_match.as_str(), rule.confidence);
        }
    }

    for extra in extra_patterns {
        for caps in extra.captures_iter(text) {
            let term_group = if caps.len() > 1 { 1 } else { 0 };
            if let Some(term_match) = caps.get(term_group) {
                consider(term_match.as_str(), term_match.as_str(), 0.8);
            }
        }
    }

    out
}

/// Extract cross-references from `text` (the text of one clause) using the
/// built-in rule catalog plus any caller-supplied extras, validating target
/// existence against `clause_id_set` after Chinese-numeral normalization.
pub fn extract_cross_references(
    text: &str,
    source_clause_id: &str,
    clause_id_set: &HashSet<&str>,
    extra_patterns: &[Regex],
) -> Vec<CrossReference> {
    let mut out = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    let mut consider = |target_raw: &str, reference_text: &str, reference_type: ReferenceType| {
        let target_id = chinese_numeral_to_arabic(target_raw).unwrap_or_else(|| target_raw.to_string());
        if target_id == source_clause_id {
            return; // no self-references
        }
        let key = (target_id.clone(), reference_text.to_string());
        if seen.contains(&key) {
            return;
        }
        seen.insert(key);
        let is_valid = Some(clause_id_set.contains(target_id.as_str()));
        out.push(CrossReference {
            source_clause_id: source_clause_id.to_string(),
            target_clause_id: target_id,
            reference_text: truncate_chars(reference_text, 80),
            is_valid,
            source: ExtractionSource::Regex,
            confidence: 1.0,
            reference_type,
        });
    };

    for rule in CROSS_REFERENCE_RULES.iter() {
        for caps in rule.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let Some(target_match) = caps.get(rule.target_group) else { continue };
            consider(target_match.as_str(), whole.as_str(), rule.reference_type);
        }
    }

    for extra in extra_patterns {
        for caps in extra.captures_iter(text) {
            // Defensive group-index handling: a pattern
            // without capturing groups falls back to group 0.
            let group_index = if caps.len() > 1 { 1 } else { 0 };
            let Some(whole) = caps.get(0) else { continue };
            if let Some(target_match) = caps.get(group_index) {
                consider(target_match.as_str(), whole.as_str(), ReferenceType::Clause);
            }
        }
    }

    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Assign a `DefinitionCategory` heuristically from the definition text, used
/// by hybrid extractors' LLM-supplement path when the model omits a category.
pub fn guess_definition_category(term: &str, definition_text: &str) -> DefinitionCategory {
    let lower = definition_text.to_lowercase();
    if lower.contains("party") || lower.contains("contractor") || lower.contains("employer") || term.contains("甲方") || term.contains("乙方") {
        DefinitionCategory::Party
    } else if lower.contains("date") || lower.contains("day") {
        DefinitionCategory::Date
    } else if lower.contains('$') || lower.contains("amount") || lower.contains("price") {
        DefinitionCategory::Amount
    } else {
        DefinitionCategory::General
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_numeral_handles_double_digit_forms() {
        assert_eq!(chinese_numeral_to_arabic("九十九"), Some("99".to_string()));
        assert_eq!(chinese_numeral_to_arabic("三"), Some("3".to_string()));
        assert_eq!(chinese_numeral_to_arabic("十"), Some("10".to_string()));
        assert_eq!(chinese_numeral_to_arabic("十五"), Some("15".to_string()));
    }

    #[test]
    fn definition_extraction_is_pure_and_deterministic() {
        let text = r#""Contract Price" means the amount stated in Appendix A."#;
        let first = extract_definitions(text, Some("1"), &[]);
        let second = extract_definitions(text, Some("1"), &[]);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].term, "Contract Price");
    }

    #[test]
    fn definition_extraction_drops_duplicate_terms_first_match_wins() {
        let text = r#""Term" means first. "Term" means second."#;
        let entries = extract_definitions(text, None, &[]);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].definition_text.starts_with("first"));
    }

    #[test]
    fn inline_party_definitions_get_lower_confidence() {
        let text = r#"ABC Construction Ltd (以下简称"承包商")"#;
        let entries = extract_definitions(text, None, &[]);
        assert_eq!(entries.len(), 1);
        assert!((entries[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn cross_reference_validity_reflects_clause_id_set() {
        let mut set = HashSet::new();
        set.insert("5");
        let refs = extract_cross_references("See Article 5 for details.", "1", &set, &[]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].is_valid, Some(true));
    }

    #[test]
    fn cross_reference_chinese_numeral_is_normalized_before_validity_check() {
        let mut set = HashSet::new();
        set.insert("99");
        let refs = extract_cross_references("依据第九十九条规定", "1", &set, &[]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target_clause_id, "99");
        assert_eq!(refs[0].is_valid, Some(true));
    }

    #[test]
    fn cross_reference_never_self_references() {
        let mut set = HashSet::new();
        set.insert("5");
        let refs = extract_cross_references("See Clause 5 above.", "5", &set, &[]);
        assert!(refs.is_empty());
    }

    #[test]
    fn extra_pattern_without_capture_group_falls_back_to_group_zero() {
        let mut set = HashSet::new();
        set.insert("7");
        let extra = Regex::new(r"REF-7").unwrap();
        let refs = extract_cross_references("See REF-7 for context.", "1", &set, std::slice::from_ref(&extra));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target_clause_id, "REF-7");
    }
}
