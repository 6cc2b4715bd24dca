//! Response parsing: free-form generated text to a validated [`FileSet`].
//!
//! Parsing never fails. Strategies are tried in order and the first one that
//! yields at least one file wins:
//!
//! 1. Fenced blocks whose first line is a `# filename: path` marker
//!    (`//` and `<!-- -->` comment styles are accepted too), plus
//!    unmarked blocks that look like a dependency manifest
//! 2. A JSON object mapping paths to contents
//! 3. Language heuristics on the first unmarked block, or the whole text
//!
//! When nothing matches, the result is empty and carries diagnostics that the
//! caller stores under `error_log.txt`.
//!
//! # Example
//!
//! ```
//! use forgeflow::parser::ResponseParser;
//!
//! let reply = "```python\n# filename: main.py\nprint('hi')\n```";
//! let parsed = ResponseParser::new("Python").parse(reply);
//! assert_eq!(parsed.files.get("main.py"), Some("print('hi')\n"));
//! ```

mod fences;
mod language;

pub use fences::{scan_fences, split_marker, strip_reasoning, with_trailing_newline, CodeBlock};
pub use language::{is_python, profile_for, LanguageProfile};

use crate::utils::json_extraction::{try_extract_json_object, JsonExtractionResult};
use crate::workspace::{is_directory_marker, FileSet};

/// Outcome of parsing one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    /// Files recovered from the reply.
    pub files: FileSet,
    /// Notes about dropped paths and failed strategies.
    pub diagnostics: Vec<String>,
}

impl ParsedResponse {
    /// Returns true if no file was recovered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Renders the diagnostics as the content of `error_log.txt`.
    pub fn error_log(&self) -> String {
        let mut log = String::from("Failed to extract any files from the generated response.\n");
        for line in &self.diagnostics {
            log.push_str("- ");
            log.push_str(line);
            log.push('\n');
        }
        log
    }
}

/// Parses generated replies for one target language.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    profile: LanguageProfile,
    default_file: Option<String>,
}

impl ResponseParser {
    /// Creates a parser for `language` (e.g. `"Python"`).
    pub fn new(language: &str) -> Self {
        Self {
            profile: profile_for(language),
            default_file: None,
        }
    }

    /// Overrides the filename used when a heuristic match has no name.
    pub fn with_default_file(mut self, name: impl Into<String>) -> Self {
        self.default_file = Some(name.into());
        self
    }

    /// Parses `raw` into files. Never fails; see [`ParsedResponse::diagnostics`].
    pub fn parse(&self, raw: &str) -> ParsedResponse {
        let text = strip_reasoning(raw);
        let mut parsed = ParsedResponse::default();

        let blocks = scan_fences(&text);
        let mut first_unmarked: Option<&str> = None;

        for block in &blocks {
            if let Some((path, content)) = split_marker(&block.body) {
                self.insert(&mut parsed, &path, content);
            } else if let Some(content) = self.as_manifest(&block.body) {
                let manifest = self.profile.manifest;
                self.insert(&mut parsed, manifest, content);
            } else if first_unmarked.is_none() && !block.body.trim().is_empty() {
                first_unmarked = Some(&block.body);
            }
        }

        if !parsed.files.is_empty() {
            return parsed;
        }

        if !blocks.is_empty() {
            parsed
                .diagnostics
                .push(format!("{} code block(s) without a filename marker", blocks.len()));
        }

        self.parse_json(&text, &mut parsed);
        if !parsed.files.is_empty() {
            return parsed;
        }

        let candidate = first_unmarked.unwrap_or(text.as_str());
        if let Some(name) = self.heuristic_name(candidate) {
            let content = with_trailing_newline(candidate.trim().to_string());
            self.insert(&mut parsed, &name, content);
            if !parsed.files.is_empty() {
                return parsed;
            }
        }

        parsed.diagnostics.push(format!(
            "No {} source recognized. Response starts with: {:?}",
            self.profile.name,
            text.trim().chars().take(200).collect::<String>()
        ));
        parsed
    }

    fn insert(&self, parsed: &mut ParsedResponse, path: &str, content: String) {
        if is_directory_marker(path) {
            tracing::debug!(path, "Dropping directory entry from response");
            parsed
                .diagnostics
                .push(format!("skipped directory entry '{}'", path));
            return;
        }
        if let Err(e) = parsed.files.insert(path, content) {
            tracing::warn!(path, error = %e, "Dropping invalid path from response");
            parsed.diagnostics.push(format!("dropped '{}': {}", path, e));
        }
    }

    /// An unmarked block that mentions `requirements.txt` and carries no code.
    fn as_manifest(&self, body: &str) -> Option<String> {
        if !body.contains("requirements.txt") || body.contains('=') || body.contains("import") {
            return None;
        }

        let mut lines = body.lines().skip_while(|l| l.trim().is_empty()).peekable();
        if let Some(first) = lines.peek() {
            let name = first.trim().trim_start_matches(['#', '/', ' ']).trim();
            if name == "requirements.txt" || name == self.profile.manifest {
                lines.next();
            }
        }
        Some(with_trailing_newline(lines.collect::<Vec<_>>().join("\n")))
    }

    fn parse_json(&self, text: &str, parsed: &mut ParsedResponse) {
        let json = match try_extract_json_object(text) {
            JsonExtractionResult::Success(json) => json,
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => {
                parsed.diagnostics.push(format!(
                    "JSON object appears truncated ({} unclosed braces)",
                    unclosed_braces
                ));
                return;
            }
            JsonExtractionResult::NotFound => return,
        };

        let value: serde_json::Value = match serde_json::from_str(&json) {
            Ok(value) => value,
            Err(e) => {
                parsed.diagnostics.push(format!("JSON parse error: {}", e));
                return;
            }
        };

        let Some(object) = value.as_object() else {
            parsed
                .diagnostics
                .push("JSON value is not an object".to_string());
            return;
        };

        for (path, content) in object {
            match content.as_str() {
                Some(content) => self.insert(parsed, path, content.to_string()),
                None => parsed
                    .diagnostics
                    .push(format!("JSON entry '{}' is not a string", path)),
            }
        }
    }

    /// Source in the target language wins over markup it happens to mention.
    fn heuristic_name(&self, candidate: &str) -> Option<String> {
        if self.profile.looks_like_source(candidate) {
            return Some(
                self.default_file
                    .clone()
                    .unwrap_or_else(|| self.profile.entry_point()),
            );
        }
        if candidate.to_ascii_lowercase().contains("<html") {
            return Some("index.html".to_string());
        }
        None
    }
}

/// Parses `raw` with the defaults for `language`.
pub fn parse(raw: &str, language: &str) -> ParsedResponse {
    ResponseParser::new(language).parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marked_blocks_produce_declared_keys() {
        let reply = "Plan done.\n\n```python\n# filename: main.py\nfrom lib import add\nprint(add(1, 2))\n```\n\n```python\n# filename: lib.py\ndef add(a, b):\n    return a + b\n```\n";
        let parsed = parse(reply, "Python");

        assert_eq!(parsed.files.paths().collect::<Vec<_>>(), vec!["lib.py", "main.py"]);
        assert_eq!(
            parsed.files.get("lib.py"),
            Some("def add(a, b):\n    return a + b\n")
        );
        assert!(!parsed.files.get("main.py").unwrap().contains("filename"));
    }

    #[test]
    fn test_last_block_wins_for_duplicate_names() {
        let reply = "```\n# filename: a.py\nx = 1\n```\n```\n# filename: a.py\nx = 2\n```";
        let parsed = parse(reply, "Python");
        assert_eq!(parsed.files.get("a.py"), Some("x = 2\n"));
    }

    #[test]
    fn test_invalid_and_directory_paths_are_dropped() {
        let reply = "```\n# filename: ../escape.py\nx = 1\n```\n```\n# filename: pkg/\n\n```\n```\n# filename: ok.py\ny = 1\n```";
        let parsed = parse(reply, "Python");
        assert_eq!(parsed.files.paths().collect::<Vec<_>>(), vec!["ok.py"]);
        assert_eq!(parsed.diagnostics.len(), 2);
    }

    #[test]
    fn test_manifest_block() {
        let reply = "```\nrequirements.txt\nrequests\nflask\n```\n```python\n# filename: app.py\nimport flask\n```";
        let parsed = parse(reply, "Python");
        assert_eq!(parsed.files.get("requirements.txt"), Some("requests\nflask\n"));
        assert!(parsed.files.contains("app.py"));

        // Pinned versions contain '=' and are not treated as a manifest.
        let pinned = parse("```\n# requirements.txt\nrequests==2.0\n```", "Python");
        assert!(!pinned.files.contains("requirements.txt"));
    }

    #[test]
    fn test_json_fallback() {
        let reply = r#"Here you go: {"main.py": "print(1)\n", "notes/": "", "bad": 3}"#;
        let parsed = parse(reply, "Python");
        assert_eq!(parsed.files.paths().collect::<Vec<_>>(), vec!["main.py"]);
        assert_eq!(parsed.files.get("main.py"), Some("print(1)\n"));
    }

    #[test]
    fn test_heuristic_single_file() {
        let parsed = parse("```python\ndef f():\n    return 1\n```", "Python");
        assert_eq!(parsed.files.get("main.py"), Some("def f():\n    return 1\n"));

        let parsed = parse("function go() {}\nconsole.log(go())", "JavaScript");
        assert!(parsed.files.contains("main.js"));

        let parsed = parse("```\n<!DOCTYPE html>\n<html><body>hi</body></html>\n```", "Python");
        assert!(parsed.files.contains("index.html"));
    }

    #[test]
    fn test_unmarked_test_block_mentioning_html_keeps_default_file() {
        let reply = "```python\nfrom app import render\n\ndef test_render():\n    assert '<html>' in render()\n```";
        let parsed = ResponseParser::new("Python")
            .with_default_file("tests/test_generated.py")
            .parse(reply);

        assert_eq!(
            parsed.files.paths().collect::<Vec<_>>(),
            vec!["tests/test_generated.py"]
        );
        assert!(parsed
            .files
            .get("tests/test_generated.py")
            .unwrap()
            .contains("assert '<html>' in render()"));
    }

    #[test]
    fn test_default_file_override() {
        let parser = ResponseParser::new("Python").with_default_file("tests/test_generated.py");
        let parsed = parser.parse("```python\nimport pytest\n\ndef test_a():\n    assert True\n```");
        assert!(parsed.files.contains("tests/test_generated.py"));
    }

    #[test]
    fn test_unrecognized_text_is_empty_with_diagnostics() {
        let parsed = parse("I'm sorry, I cannot help with that.", "Python");
        assert!(parsed.is_empty());
        assert!(!parsed.diagnostics.is_empty());
        assert!(parsed.error_log().contains("Failed to extract"));

        let parsed = parse("", "Python");
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_reasoning_is_ignored() {
        let reply = "<think>```python\n# filename: wrong.py\n```</think>\n```python\n# filename: right.py\nx = 1\n```";
        let parsed = parse(reply, "Python");
        assert_eq!(parsed.files.paths().collect::<Vec<_>>(), vec!["right.py"]);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let reply = "```python\n# filename: main.py\nprint(1)\n```\n{\"x.py\": \"1\"}";
        assert_eq!(parse(reply, "Python"), parse(reply, "Python"));
    }
}
