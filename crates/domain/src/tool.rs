use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel call id tagging tool calls that could not be parsed. The
/// dispatcher emits a retry-instruction result under this id so the model
/// can correct its syntax on the next turn.
pub const FAILED_CALL_ID: &str = "FAILED";

/// A message in a conversation transcript (provider-agnostic).
///
/// Ordering within a transcript is significant and never changed after
/// append. `tool_calls` is populated only for assistant messages produced
/// by a structured-dialect provider; `tool_call_id` only for tool-role
/// messages feeding results back to such a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

/// A structured tool call as recorded on an assistant message
/// (structured dialect only). `name` is the wire form `<server>-<tool>`;
/// `arguments` is the raw JSON string exactly as the provider sent it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Replace the textual content, preserving role and tool metadata.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = MessageContent::Text(text.into());
    }
}

impl MessageContent {
    /// Extract and join all text content, returning an owned String.
    /// Non-text parts (images) are skipped.
    pub fn all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed tool call, ready for dispatch.
///
/// `id` is assigned by the provider for structured calls and `None` for
/// inline-tag calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Option<String>,
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// A tool call that could not be parsed out of the assistant output.
/// Carries the parser's error plus the raw fragment for logging.
#[derive(Debug, Clone)]
pub struct BadToolCall {
    pub error: String,
    pub raw: String,
}

/// Uniform result envelope for one tool invocation.
///
/// Empty tool output is never represented here — the tool manager converts
/// it to a distinguishable `Ok` string before this type is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Ok(String),
    Error(String),
}

impl ToolResult {
    /// Render the result as the text fed back to the model.
    pub fn for_model(&self) -> String {
        match self {
            ToolResult::Ok(text) => text.clone(),
            ToolResult::Error(message) => format!("Tool call failed: {message}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }
}

/// One tool call's outcome as produced by the dispatcher, ready to be
/// folded back into the transcript by the provider's dialect-specific
/// `update_history_with_tools`.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Provider-assigned call id; `None` for inline-tag calls.
    pub call_id: Option<String>,
    /// The call could not be parsed; `text` carries the retry instruction
    /// and the logical id is [`FAILED_CALL_ID`].
    pub failed_parse: bool,
    /// The call fell beyond the per-turn fan-out cap and was not executed.
    pub skipped: bool,
    /// Result text as fed back to the model.
    pub text: String,
}

impl DispatchOutcome {
    pub fn executed(call_id: Option<String>, text: String) -> Self {
        Self {
            call_id,
            failed_parse: false,
            skipped: false,
            text,
        }
    }

    pub fn skipped(call_id: Option<String>, text: String) -> Self {
        Self {
            call_id,
            failed_parse: false,
            skipped: true,
            text,
        }
    }

    pub fn failed_parse(text: String) -> Self {
        Self {
            call_id: Some(FAILED_CALL_ID.to_string()),
            failed_parse: true,
            skipped: false,
            text,
        }
    }
}

/// Tool definition as discovered from a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub schema: Value,
}

/// One server's slice of the tool catalog. A server that failed discovery
/// keeps its entry with an empty tool list and the error note, so catalog
/// assembly never aborts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTools {
    pub server_name: String,
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerTools {
    /// Wire name of a tool on this server, `<server>-<tool>`.
    pub fn wire_name(&self, tool: &ToolDefinition) -> String {
        format!("{}-{}", self.server_name, tool.name)
    }
}

/// Split a structured-dialect wire name `<server>-<tool>` back into its
/// parts. Servers may themselves contain dashes, so the split is on the
/// last dash, matching how wire names are assembled.
pub fn split_wire_name(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.all_text(), "hello world");
    }

    #[test]
    fn all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::Image {
                url: "data:...".into(),
                media_type: None,
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.all_text(), "line one\nline two");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("t1", "4");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(msg.content.all_text(), "4");
    }

    #[test]
    fn wire_name_splits_on_last_dash() {
        assert_eq!(
            split_wire_name("tool-serper-search-scrape"),
            Some(("tool-serper-search", "scrape"))
        );
        assert_eq!(split_wire_name("nodash"), None);
    }

    #[test]
    fn error_result_rendered_with_prefix() {
        let r = ToolResult::Error("boom".into());
        assert_eq!(r.for_model(), "Tool call failed: boom");
        assert!(r.is_error());
    }

    #[test]
    fn message_serde_skips_empty_tool_fields() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }
}
