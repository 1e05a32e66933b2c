//! The three-layer JSON extractor used everywhere the engine parses a
//! model's output: a raw response, a fenced code block, or prose with a
//! JSON object embedded in it.

use crate::error::{Error, Result};

/// Three-layer JSON extractor: raw parse, then a fenced ```json code block,
/// then a generic ``` block, then a scan for the first balanced `{...}`.
/// Used for every LLM response the engine must interpret as JSON.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Ok(value);
    }

    if let Some(json_str) = extract_fenced_block(trimmed, "json") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str.trim()) {
            return Ok(value);
        }
    }

    if let Some(json_str) = extract_fenced_block(trimmed, "") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str.trim()) {
            return Ok(value);
        }
    }

    if let Some(json_str) = scan_balanced_braces(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_str) {
            return Ok(value);
        }
    }

    Err(Error::llm_failure(format!(
        "could not extract JSON from LLM response: {}",
        truncate(trimmed, 200)
    )))
}

fn extract_fenced_block<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let fence = if lang.is_empty() {
        "```".to_string()
    } else {
        format!("```{lang}")
    };
    let start = text.find(&fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Scan for the first top-level balanced `{...}` span, tolerant of braces
/// embedded in string literals.
fn scan_balanced_braces(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        let ch = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_json_parses_directly() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn fenced_json_block_is_extracted() {
        let text = "Here is the result:\n```json\n{\"a\": 2}\n```\nLet me know if you need more.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn generic_fenced_block_is_extracted() {
        let text = "```\n{\"a\": 3}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 3);
    }

    #[test]
    fn brace_scan_finds_object_amid_prose() {
        let text = "Sure, here's my analysis: {\"a\": 4, \"nested\": {\"b\": 1}} Hope that helps!";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 4);
        assert_eq!(value["nested"]["b"], 1);
    }

    #[test]
    fn braces_inside_string_values_do_not_break_the_scan() {
        let text = "{\"note\": \"contains a } brace\", \"a\": 5}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"], 5);
    }

    #[test]
    fn unparseable_text_is_an_error() {
        assert!(extract_json("not json at all, just prose.").is_err());
    }
}
