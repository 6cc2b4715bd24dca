//! Low-level scanning: reasoning removal, fenced blocks, filename markers.

use std::sync::OnceLock;

use regex::Regex;

/// One fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Info string after the opening backticks (e.g. `python`).
    pub info: String,
    /// Lines between the fences, without the fences.
    pub body: String,
    /// False when the text ended before a closing fence.
    pub terminated: bool,
}

fn think_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok())
        .as_ref()
}

fn marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:#|//|<!--)\s*(?i:filename)\s*:\s*(\S+?)\s*(?:-->)?\s*$").ok()
    })
    .as_ref()
}

/// Removes `<think>...</think>` reasoning sections.
///
/// An unterminated `<think>` drops everything up to the first fence after it.
/// Without any fence, only the tag itself is removed.
pub fn strip_reasoning(text: &str) -> String {
    let stripped = match think_regex() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };

    match stripped.find("<think>") {
        Some(open) => {
            let after = &stripped[open + "<think>".len()..];
            let before = &stripped[..open];
            match after.find("```") {
                Some(fence) => format!("{}{}", before, &after[fence..]),
                None => format!("{}{}", before, after),
            }
        }
        None => stripped,
    }
}

fn is_closing_fence(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 3 && trimmed.chars().all(|c| c == '`')
}

/// Info string of an opening fence line such as "```python". Bare fences give `None`.
fn opening_info(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix("```")?;
    let info = rest.trim_start_matches('`').trim();
    (!info.is_empty()).then(|| info.to_string())
}

/// Scans `text` line by line and returns every fenced block in order.
///
/// An unterminated last block runs to the end of the text. An opening fence
/// with an info string inside an open block ends it and starts a new one.
pub fn scan_fences(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        match current.as_mut() {
            None => {
                if let Some(rest) = line.trim_start().strip_prefix("```") {
                    let info = rest.trim_start_matches('`').trim().to_string();
                    current = Some((info, Vec::new()));
                }
            }
            Some((_, lines)) => {
                if is_closing_fence(line) {
                    if let Some((info, lines)) = current.take() {
                        blocks.push(CodeBlock {
                            info,
                            body: lines.join("\n"),
                            terminated: true,
                        });
                    }
                } else if let Some(next_info) = opening_info(line) {
                    if let Some((info, lines)) = current.take() {
                        blocks.push(CodeBlock {
                            info,
                            body: lines.join("\n"),
                            terminated: false,
                        });
                    }
                    current = Some((next_info, Vec::new()));
                } else {
                    lines.push(line);
                }
            }
        }
    }

    if let Some((info, lines)) = current {
        blocks.push(CodeBlock {
            info,
            body: lines.join("\n"),
            terminated: false,
        });
    }

    blocks
}

/// Splits a leading `# filename: path` marker off a block body.
///
/// Returns the declared path and the remaining content, or `None` when the
/// first non-blank line is not a marker.
pub fn split_marker(body: &str) -> Option<(String, String)> {
    let re = marker_regex()?;
    let mut lines = body.lines().skip_while(|line| line.trim().is_empty());
    let first = lines.next()?;
    let caps = re.captures(first)?;
    let path = caps.get(1)?.as_str().to_string();
    let rest: Vec<&str> = lines.collect();
    Some((path, with_trailing_newline(rest.join("\n"))))
}

/// Normalizes file content to end with exactly one newline (empty stays empty).
pub fn with_trailing_newline(content: String) -> String {
    let trimmed = content.trim_end_matches(['\n', '\r']);
    if trimmed.trim().is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}
