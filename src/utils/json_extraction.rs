//! JSON object extraction from generated text.
//!
//! Generated replies wrap JSON in prose, markdown fences, or reasoning
//! preambles. The extractor tries, in order:
//! 1. A ```` ```json ```` fenced block
//! 2. Any other fenced block containing an object
//! 3. The text itself when it starts with `{`
//! 4. The largest valid object anywhere, preferring later occurrences
//!
//! # Example
//!
//! ```
//! use forgeflow::utils::json_extraction::try_extract_json_object;
//!
//! let reply = "Here are the files: {\"main.py\": \"print(1)\"}";
//! let json = try_extract_json_object(reply);
//! assert_eq!(json.json(), Some("{\"main.py\": \"print(1)\"}"));
//! ```

use std::sync::OnceLock;

use regex::Regex;

/// Result of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// A complete object that parses as JSON.
    Success(String),
    /// An object was started but never closed.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
    },
    /// Nothing object-shaped was found.
    NotFound,
}

impl JsonExtractionResult {
    /// Returns true if an object was extracted.
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    /// Returns the extracted JSON text for the Success case.
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }
}

fn json_fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

fn any_fence_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:[\w+-]+)?[^\n]*\n([\s\S]*?)\n?```").ok())
        .as_ref()
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Attempts to extract one JSON object from `content`.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(json) = extract_from_json_code_block(trimmed) {
        if is_valid_json(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if let Some(json) = extract_from_generic_code_block(trimmed) {
        if is_valid_json(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid_json(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        }
    }

    if let Some(json) = extract_largest_json_object(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed = count_unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return JsonExtractionResult::Truncated {
                partial_json: trimmed[start..].to_string(),
                unclosed_braces: unclosed,
            };
        }
    }

    JsonExtractionResult::NotFound
}

/// Finds the index of the `}` closing the object that starts at `s[0]`.
///
/// Braces inside string literals, including escaped quotes, are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn count_unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}

/// Extracts the object inside a ```` ```json ```` fence.
pub fn extract_from_json_code_block(content: &str) -> Option<String> {
    let caps = json_fence_regex()?.captures(content)?;
    let body = caps.get(1)?.as_str().trim();
    if !body.starts_with('{') {
        return None;
    }
    match find_matching_brace(body) {
        Some(end) => Some(body[..=end].to_string()),
        None => Some(body.to_string()),
    }
}

/// Extracts the first object inside any fenced block.
pub fn extract_from_generic_code_block(content: &str) -> Option<String> {
    for caps in any_fence_regex()?.captures_iter(content) {
        let Some(body) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if let Some(start) = body.find('{') {
            if let Some(end) = find_matching_brace(&body[start..]) {
                return Some(body[start..=start + end].to_string());
            }
        }
    }
    None
}

/// Returns the largest valid object in `content`. Ties go to the later one.
pub fn extract_largest_json_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let substr = &content[start..];
            let end = find_matching_brace(substr)?;
            let candidate = &substr[..=end];
            is_valid_json(candidate).then(|| (start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let input = r#"{"main.py": "print(1)"}"#;
        assert_eq!(try_extract_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_json_code_block() {
        let input = "Here you go:\n```json\n{\"a.py\": \"x = 1\"}\n```\nDone.";
        assert_eq!(
            try_extract_json_object(input).json(),
            Some(r#"{"a.py": "x = 1"}"#)
        );
    }

    #[test]
    fn test_generic_code_block() {
        let input = "```\n{\"a.py\": \"x\"}\n```";
        assert_eq!(try_extract_json_object(input).json(), Some(r#"{"a.py": "x"}"#));
    }

    #[test]
    fn test_object_with_surrounding_prose() {
        let input = r#"Sure: {"name": "test", "count": 5} - that's it!"#;
        assert_eq!(
            try_extract_json_object(input).json(),
            Some(r#"{"name": "test", "count": 5}"#)
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let input = r#"{"main.py": "def f():\n    return {\"k\": 1}"}"#;
        let result = try_extract_json_object(input);
        assert!(result.is_success());
        assert_eq!(find_matching_brace(input), Some(input.len() - 1));
    }

    #[test]
    fn test_prefers_largest_object() {
        let input = r#"Thinking about {"x": 1}. Final: {"a.py": "1", "b.py": "2"}"#;
        assert_eq!(
            try_extract_json_object(input).json(),
            Some(r#"{"a.py": "1", "b.py": "2"}"#)
        );
    }

    #[test]
    fn test_truncated_object() {
        let input = r#"{"main.py": "print(1)", "lib.py": {"#;
        match try_extract_json_object(input) {
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 2),
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found() {
        assert_eq!(
            try_extract_json_object("no structure here"),
            JsonExtractionResult::NotFound
        );
    }
}
