//! Some Kiro backends narrate tool calls inline in the assistant text as
//! `[Called <name> with args: { ... }]` instead of emitting a structured
//! `toolUseId`/`input` pair. This is an explicit state machine over the
//! raw text: find each bracketed call with balanced-bracket matching,
//! repair the embedded JSON (trailing commas, bare keys), parse it, and
//! strip the bracket substring out of the text that's shown to the
//! caller. No corpus precedent for this; built directly from spec.md's
//! description of the behavior.

use serde_json::Value;

pub struct BracketCall {
    pub name: String,
    pub args: Value,
}

const MARKER: &str = "[Called ";

/// Scans `text` for `[Called <name> with args: {...}]` spans, parses each
/// one into a `BracketCall`, appends them to `calls`, and returns the text
/// with every recognized span removed.
pub fn strip_and_collect_bracket_calls(text: &str, calls: &mut Vec<BracketCall>) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut cursor = 0usize;

    while let Some(rel_start) = text[cursor..].find(MARKER) {
        let start = cursor + rel_start;
        out.push_str(&text[cursor..start]);

        match find_balanced_bracket_end(bytes, start) {
            Some(end) => {
                let span = &text[start + 1..end];
                if let Some(call) = parse_bracket_span(span) {
                    calls.push(call);
                }
                cursor = end + 1;
            }
            None => {
                // Unterminated bracket: emit the marker verbatim and keep
                // scanning past it rather than looping forever.
                out.push_str(MARKER);
                cursor = start + MARKER.len();
            }
        }
    }
    out.push_str(&text[cursor..]);
    out
}

/// `text[open_idx]` must be `[`. Returns the index of the matching `]`,
/// tracking nested `{}`/`[]` so a brace inside the JSON payload doesn't
/// terminate the scan early.
fn find_balanced_bracket_end(bytes: &[u8], open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[open_idx..].iter().enumerate() {
        let idx = open_idx + offset;
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 && byte == b']' {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_bracket_span(span: &str) -> Option<BracketCall> {
    let rest = span.strip_prefix("Called ")?;
    let (name, after_name) = rest.split_once(" with args: ")?;
    let repaired = repair_json(after_name.trim());
    let args = match serde_json::from_str(&repaired) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(name = name.trim(), error = %err, "dropping bracket tool call: args did not repair to valid JSON");
            return None;
        }
    };
    Some(BracketCall {
        name: name.trim().to_string(),
        args,
    })
}

/// Fixes the two malformations these narrated calls are prone to: a
/// trailing comma before a closing brace/bracket, and object keys written
/// without quotes.
fn repair_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
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
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let mut lookahead = chars.clone();
                while let Some(next) = lookahead.peek() {
                    if next.is_whitespace() {
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                if matches!(lookahead.peek(), Some('}') | Some(']')) {
                    // drop the trailing comma
                } else {
                    out.push(ch);
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                // bare key: collect the identifier and quote it if it's
                // immediately followed by a colon.
                let mut ident = String::new();
                ident.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let mut lookahead = chars.clone();
                while let Some(next) = lookahead.peek() {
                    if next.is_whitespace() {
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                if matches!(lookahead.peek(), Some(':')) && !matches!(ident.as_str(), "true" | "false" | "null") {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_well_formed_bracket_call() {
        let mut calls = Vec::new();
        let text = "Sure, one moment. [Called search with args: {\"query\": \"rust\"}] Done.";
        let stripped = strip_and_collect_bracket_calls(text, &mut calls);
        assert_eq!(stripped, "Sure, one moment.  Done.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].args["query"], "rust");
    }

    #[test]
    fn repairs_bare_keys_and_trailing_commas() {
        let mut calls = Vec::new();
        let text = "[Called list_files with args: {path: \"/tmp\", recursive: true,}]";
        strip_and_collect_bracket_calls(text, &mut calls);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["path"], "/tmp");
        assert_eq!(calls[0].args["recursive"], true);
    }

    #[test]
    fn dedups_identical_calls_are_left_to_caller() {
        let mut calls = Vec::new();
        let text = "[Called ping with args: {}] and again [Called ping with args: {}]";
        strip_and_collect_bracket_calls(text, &mut calls);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn drops_call_whose_args_never_repair_to_valid_json() {
        let mut calls = Vec::new();
        let text = "[Called broken with args: {foo: 1 2}]";
        strip_and_collect_bracket_calls(text, &mut calls);
        assert!(calls.is_empty());
    }

    #[test]
    fn leaves_text_without_bracket_calls_untouched() {
        let mut calls = Vec::new();
        let text = "just a normal reply";
        let stripped = strip_and_collect_bracket_calls(text, &mut calls);
        assert_eq!(stripped, text);
        assert!(calls.is_empty());
    }
}
