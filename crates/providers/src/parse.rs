//! Inline `<use_mcp_tool>` tool-call parser.
//!
//! The inline dialect embeds tool calls in assistant text:
//!
//! ```text
//! <use_mcp_tool>
//!   <server_name>tool-calc</server_name>
//!   <tool_name>add</tool_name>
//!   <arguments>{ "a": 2, "b": 2 }</arguments>
//! </use_mcp_tool>
//! ```
//!
//! The parser is deliberately lenient: case-insensitive, tolerant of tag
//! attributes, and able to synthesize a missing `</arguments>` once before
//! re-parsing. Unrepairable fragments become bad calls the dispatcher
//! answers with a retry instruction.

use std::sync::OnceLock;

use regex::Regex;

use mf_domain::tool::{BadToolCall, ToolCall};

use crate::repair;

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<use_mcp_tool[^>]*?>\s*<server_name[^>]*?>(.*?)</server_name>\s*<tool_name[^>]*?>(.*?)</tool_name>\s*<arguments[^>]*?>\s*([\s\S]*?)\s*</arguments>\s*</use_mcp_tool>",
        )
        .unwrap()
    })
}

/// Extract `(good, bad)` tool calls from assistant text.
///
/// Pure and deterministic: parsing the same string twice yields identical
/// results.
pub fn parse_inline_tool_calls(text: &str) -> (Vec<ToolCall>, Vec<BadToolCall>) {
    let (good, bad) = parse_once(text);

    // One-shot repair: a lone missing </arguments> is synthesized before
    // the next closing tag (or at end of text) and the whole text parsed
    // again. Applied at most once; the second pass's verdict is final.
    if bad.iter().any(|b| b.error.contains("arguments")) {
        if let Some(repaired) = repair_missing_arguments_close(text) {
            tracing::info!("synthesized missing </arguments>, re-parsing tool calls");
            return parse_once(&repaired);
        }
    }

    (good, bad)
}

fn parse_once(text: &str) -> (Vec<ToolCall>, Vec<BadToolCall>) {
    let mut good = Vec::new();
    let bad = detect_unclosed_tags(text);

    for caps in block_re().captures_iter(text) {
        let server_name = caps[1].trim().to_string();
        let tool_name = caps[2].trim().to_string();
        let raw_args = caps[3].trim();

        let arguments = match repair::robust_parse(raw_args) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, raw = raw_args, "unparseable tool arguments");
                serde_json::json!({
                    "error": "Failed to parse arguments",
                    "raw": raw_args,
                })
            }
        };

        good.push(ToolCall {
            id: None,
            server_name,
            tool_name,
            arguments,
        });
    }

    (good, bad)
}

/// Count open vs. close occurrences for each tag; an excess of opens marks
/// the tail fragment as a bad call.
fn detect_unclosed_tags(text: &str) -> Vec<BadToolCall> {
    static OPENS: OnceLock<Vec<(&'static str, Regex, Regex)>> = OnceLock::new();
    let tag_res = OPENS.get_or_init(|| {
        ["use_mcp_tool", "server_name", "tool_name", "arguments"]
            .into_iter()
            .map(|tag| {
                (
                    tag,
                    Regex::new(&format!(r"(?i)<{tag}(?:\s[^>]*)?>")).unwrap(),
                    Regex::new(&format!(r"(?i)</{tag}\s*>")).unwrap(),
                )
            })
            .collect()
    });

    let mut bad = Vec::new();
    for (tag, open_re, close_re) in tag_res {
        let opens: Vec<_> = open_re.find_iter(text).collect();
        let closes = close_re.find_iter(text).count();
        if opens.len() > closes {
            let last_open = opens.last().map(|m| m.start()).unwrap_or(0);
            let fragment: String = text[last_open..].chars().take(200).collect();
            bad.push(BadToolCall {
                error: format!("Unclosed {tag} tag"),
                raw: fragment,
            });
        }
    }
    bad
}

/// Synthesize the missing `</arguments>` before the next closing tag after
/// the last unclosed `<arguments>`, or at end of text. Returns `None` when
/// the text does not actually contain an unclosed arguments tag.
fn repair_missing_arguments_close(text: &str) -> Option<String> {
    static OPEN: OnceLock<Regex> = OnceLock::new();
    static CLOSE: OnceLock<Regex> = OnceLock::new();
    let open_re = OPEN.get_or_init(|| Regex::new(r"(?i)<arguments(?:\s[^>]*)?>").unwrap());
    let close_re = CLOSE.get_or_init(|| Regex::new(r"(?i)</arguments\s*>").unwrap());

    let opens: Vec<_> = open_re.find_iter(text).collect();
    if opens.len() <= close_re.find_iter(text).count() {
        return None;
    }

    let open_end = opens.last()?.end();
    let insert_at = text[open_end..]
        .find("</")
        .map(|rel| open_end + rel)
        .unwrap_or(text.len());

    let mut repaired = String::with_capacity(text.len() + 13);
    repaired.push_str(&text[..insert_at]);
    repaired.push_str("</arguments>");
    repaired.push_str(&text[insert_at..]);
    Some(repaired)
}
