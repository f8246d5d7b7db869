//! Model/part pair extraction from extractor replies
//!
//! LLM-backed extractors embed harvested pairs as a quoted data literal
//! inside free text, on a line of the form:
//!
//! ```text
//! Metadata: {'pairs': [('PM10K', '2293937'), ...]}
//! ```
//!
//! Parsing is a two-stage grammar task: a line-anchored pattern locates the
//! delimited block, then the bracketed payload is parsed as JSON under a
//! tolerant rule (single or double quotes, trailing commas, parenthesized
//! tuples accepted as arrays). Regex is never applied to the payload
//! itself.

use crate::source::Pair;
use regex::Regex;
use std::sync::OnceLock;

fn pairs_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?mis)^\s*Metadata:\s*\{\s*['"]pairs['"]\s*:\s*(\[.*?\])\s*\}\s*$"#)
            .unwrap()
    })
}

/// Locate and parse the pairs block in extracted text.
///
/// Returns the text with the block removed and the parsed pairs. The block
/// is left in place when it is the entire text, or when its payload does
/// not parse; in both cases no pairs are returned for an unparseable
/// payload.
pub fn extract_pairs_block(text: &str) -> (String, Vec<Pair>) {
    let re = pairs_block_regex();

    let Some(caps) = re.captures(text) else {
        return (text.to_string(), Vec::new());
    };

    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let payload = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    let pairs = match parse_pairs_payload(payload) {
        Ok(pairs) => pairs,
        Err(e) => {
            tracing::warn!(
                "Could not parse pairs payload ({}); keeping block in text",
                e
            );
            return (text.to_string(), Vec::new());
        }
    };

    // When the block is the entire content, removing it would leave an
    // empty document; keep it.
    if whole.trim() == text.trim() {
        return (text.to_string(), pairs);
    }

    let cleaned = re.replace(text, "").trim().to_string();
    (cleaned, pairs)
}

/// Parse the bracketed payload as JSON with tolerant quoting: either quote
/// style accepted, trailing commas tolerated, `(...)` tuples read as
/// arrays.
fn parse_pairs_payload(payload: &str) -> Result<Vec<Pair>, String> {
    let normalized = normalize_to_json(payload);
    let value: serde_json::Value =
        serde_json::from_str(&normalized).map_err(|e| format!("invalid payload: {}", e))?;

    let items = value
        .as_array()
        .ok_or_else(|| "payload is not a list".to_string())?;

    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        let pair = match item {
            serde_json::Value::Array(tuple) if tuple.len() == 2 => {
                let model = tuple[0].as_str().ok_or("pair element is not a string")?;
                let part = tuple[1].as_str().ok_or("pair element is not a string")?;
                Pair::new(model, part)
            }
            serde_json::Value::Object(map) => {
                let model = map
                    .get("model_name")
                    .and_then(|v| v.as_str())
                    .ok_or("pair object missing model_name")?;
                let part = map
                    .get("part_number")
                    .and_then(|v| v.as_str())
                    .ok_or("pair object missing part_number")?;
                Pair::new(model, part)
            }
            _ => return Err(format!("unexpected pair item: {}", item)),
        };
        pairs.push(pair);
    }

    Ok(pairs)
}

/// Rewrite the tolerated syntax into strict JSON: single-quoted strings
/// become double-quoted (with escaping fixed up), parentheses become
/// brackets, and trailing commas are dropped. Runs as a single
/// character-level pass that tracks string state.
fn normalize_to_json(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut chars = payload.chars().peekable();
    // None = outside a string; Some(q) = inside a string opened with q
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => {
                if c == '\\' {
                    // Preserve the escape and its target verbatim
                    if let Some(next) = chars.next() {
                        if quote == '\'' && next == '\'' {
                            // \' inside a single-quoted string: plain quote
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(next);
                        }
                    }
                } else if c == quote {
                    out.push('"');
                    in_string = None;
                } else if c == '"' && quote == '\'' {
                    // Literal double quote inside a single-quoted string
                    out.push('\\');
                    out.push('"');
                } else {
                    out.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    out.push('"');
                    in_string = Some(c);
                }
                '(' => out.push('['),
                ')' => out.push(']'),
                ',' => {
                    // Drop the comma if the next non-whitespace closes a
                    // container (trailing comma)
                    let mut lookahead = chars.clone();
                    let mut next_significant = None;
                    for n in lookahead.by_ref() {
                        if !n.is_whitespace() {
                            next_significant = Some(n);
                            break;
                        }
                    }
                    match next_significant {
                        Some(']') | Some(')') | Some('}') | None => {}
                        _ => out.push(','),
                    }
                }
                _ => out.push(c),
            },
        }
    }

    out
}
