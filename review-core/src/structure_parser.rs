//! Structure Parser: turns raw document text plus a
//! `DocumentParserConfig` into a `DocumentStructure` clause tree, with
//! definitions and cross-references attached via the Pattern Library.

use regex::Regex;

use crate::error::{Error, Result};
use crate::model::{ClauseNode, DocumentParserConfig, DocumentStructure};
use crate::patterns;
use crate::smart_parser::compile_cross_reference_patterns;

const MAX_TITLE_CHARS: usize = 100;

struct ClauseMatch<'a> {
    clause_id: String,
    level: u32,
    line_start: usize,
    rest_of_line: &'a str,
}

fn level_from_clause_id(clause_id: &str, max_depth: u32) -> u32 {
    let dots = clause_id.chars().filter(|&c| c == '.').count() as u32;
    dots.min(max_depth.saturating_sub(1))
}

fn find_clause_matches<'a>(text: &'a str, clause_regex: &Regex) -> Vec<ClauseMatch<'a>> {
    let mut matches = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_start();
        if let Some(caps) = clause_regex.captures(trimmed) {
            let Some(id_match) = caps.get(1).or_else(|| caps.get(0)) else { continue };
            let whole_match = caps.get(0).unwrap();
            let rest = trimmed[whole_match.end()..].trim();
            matches.push(ClauseMatch {
                clause_id: id_match.as_str().to_string(),
                level: 0, // filled in below once we know max_depth
                line_start,
                rest_of_line: rest,
            });
        }
    }
    matches
}

fn extract_title(rest_of_line: &str) -> Option<String> {
    let candidate = rest_of_line.trim();
    if candidate.is_empty() || candidate.chars().count() > MAX_TITLE_CHARS {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Build a clause tree from flat line-anchored matches using a depth stack:
/// each new clause becomes a child of the most recent clause with a
/// strictly lower level.
fn build_tree(text: &str, matches: Vec<ClauseMatch<'_>>, config: &DocumentParserConfig) -> Vec<ClauseNode> {
    if matches.is_empty() {
        return Vec::new();
    }

    let mut roots: Vec<ClauseNode> = Vec::new();
    // stack of (level, path-to-node as indices from roots)
    let mut stack: Vec<(u32, Vec<usize>)> = Vec::new();

    for (i, m) in matches.iter().enumerate() {
        let level = level_from_clause_id(&m.clause_id, config.max_depth);
        let end_offset = matches.get(i + 1).map(|next| next.line_start).unwrap_or(text.len());
        let clause_text = text[m.line_start..end_offset].trim().to_string();

        let mut node = ClauseNode::new(m.clause_id.clone(), level, clause_text);
        node.title = extract_title(m.rest_of_line);
        node.start_offset = m.line_start;
        node.end_offset = end_offset;

        while stack.last().map(|(lvl, _)| *lvl >= level).unwrap_or(false) {
            stack.pop();
        }

        match stack.last() {
            None => {
                let path = vec![roots.len()];
                roots.push(node);
                stack.push((level, path));
            }
            Some((_, parent_path)) => {
                let parent_path = parent_path.clone();
                if let Some(parent) = navigate_mut(&mut roots, &parent_path) {
                    let child_index = parent.children.len();
                    parent.children.push(node);
                    let mut path = parent_path;
                    path.push(child_index);
                    stack.push((level, path));
                }
            }
        }
    }

    roots
}

fn navigate_mut<'a>(roots: &'a mut [ClauseNode], path: &[usize]) -> Option<&'a mut ClauseNode> {
    let mut node = roots.get_mut(*path.first()?)?;
    for &index in &path[1..] {
        node = node.children.get_mut(index)?;
    }
    Some(node)
}

fn walk_cross_references(nodes: &[ClauseNode], extras: &[Regex], out: &mut Vec<crate::model::CrossReference>, clause_ids: &std::collections::HashSet<&str>) {
    for node in nodes {
        out.extend(patterns::extract_cross_references(&node.text, &node.clause_id, clause_ids, extras));
        walk_cross_references(&node.children, extras, out, clause_ids);
    }
}

/// Parse `text` into a `DocumentStructure` per `config`.
pub fn parse_structure(document_id: &str, text: &str, config: &DocumentParserConfig) -> Result<DocumentStructure> {
    let clause_regex = Regex::new(&config.clause_pattern)?;

    let mut raw_matches = find_clause_matches(text, &clause_regex);
    if raw_matches.is_empty() {
        return Err(Error::parse_failure("no clauses matched the detected clause pattern"));
    }
    for m in raw_matches.iter_mut() {
        m.level = level_from_clause_id(&m.clause_id, config.max_depth);
    }

    let clauses = build_tree(text, raw_matches, config);

    let mut structure = DocumentStructure::empty(document_id);
    structure.structure_type = config.structure_type.clone();
    structure.clauses = clauses;
    structure.recompute_total_clauses();

    // Definitions: extract from the designated definitions section if one
    // was detected, else scan every clause.
    let definitions_source: Vec<&ClauseNode> = match &config.definitions_section_id {
        Some(id) => structure.find_clause(id).into_iter().collect(),
        None => Vec::new(),
    };
    let mut definitions = Vec::new();
    if !definitions_source.is_empty() {
        for node in definitions_source {
            definitions.extend(patterns::extract_definitions(&node.full_text(), Some(&node.clause_id), &[]));
        }
    } else {
        collect_definitions(&structure.clauses, &mut definitions);
    }
    for d in &definitions {
        structure.definitions.insert(d.term.clone(), d.definition_text.clone());
    }
    structure.definitions_v2 = definitions;

    // Cross-references: walk every clause with the built-in catalog plus
    // any LLM-proposed extra patterns from the detected config.
    let extras = compile_cross_reference_patterns(config);
    let clause_ids = structure.clause_id_set();
    let mut cross_references = Vec::new();
    walk_cross_references(&structure.clauses, &extras, &mut cross_references, &clause_ids);
    structure.cross_references = cross_references;

    Ok(structure)
}

fn collect_definitions(nodes: &[ClauseNode], out: &mut Vec<crate::model::DefinitionEntry>) {
    for node in nodes {
        out.extend(patterns::extract_definitions(&node.text, Some(&node.clause_id), &[]));
        collect_definitions(&node.children, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_config() -> DocumentParserConfig {
        DocumentParserConfig::numeric_dotted_fallback()
    }

    #[test]
    fn builds_a_nested_tree_from_dotted_numbering() {
        let text = "1 Introduction\nSome intro text.\n1.1 Scope\nScope text.\n1.2 Definitions\nDef text.\n2 Payment\nPayment text.\n";
        let structure = parse_structure("doc", text, &numeric_config()).unwrap();
        assert_eq!(structure.clauses.len(), 2);
        assert_eq!(structure.clauses[0].clause_id, "1");
        assert_eq!(structure.clauses[0].children.len(), 2);
        assert_eq!(structure.clauses[0].children[0].clause_id, "1.1");
        assert_eq!(structure.total_clauses, 4);
    }

    #[test]
    fn title_longer_than_limit_is_dropped() {
        let long_title = "x".repeat(200);
        let text = format!("1 {long_title}\nbody text.\n");
        let structure = parse_structure("doc", &text, &numeric_config()).unwrap();
        assert!(structure.clauses[0].title.is_none());
    }

    #[test]
    fn no_matching_clauses_is_a_parse_failure() {
        let config = DocumentParserConfig {
            clause_pattern: r"^NEVERMATCH\s".to_string(),
            ..numeric_config()
        };
        let result = parse_structure("doc", "plain prose with no clause markers\n", &config);
        assert!(result.is_err());
    }

    #[test]
    fn definitions_section_id_scopes_definition_extraction() {
        let text = "1 Definitions\n\"Contract Price\" means the price in Appendix A.\n2 Scope\n\"Other Term\" means something else.\n";
        let mut config = numeric_config();
        config.definitions_section_id = Some("1".to_string());
        let structure = parse_structure("doc", text, &config).unwrap();
        assert_eq!(structure.definitions_v2.len(), 1);
        assert_eq!(structure.definitions_v2[0].term, "Contract Price");
    }

    #[test]
    fn cross_references_are_collected_across_the_whole_tree() {
        let text = "1 Introduction\nSee Clause 2 for payment terms.\n2 Payment\nAs set out above.\n";
        let structure = parse_structure("doc", text, &numeric_config()).unwrap();
        assert_eq!(structure.cross_references.len(), 1);
        assert_eq!(structure.cross_references[0].target_clause_id, "2");
        assert_eq!(structure.cross_references[0].is_valid, Some(true));
    }
}
