use async_trait::async_trait;
use chrono::NaiveDate;

use mf_domain::error::Result;
use mf_domain::tool::{BadToolCall, DispatchOutcome, ServerTools, ToolCall, ToolCallRecord};
use mf_domain::usage::TokenUsage;
use mf_history::History;

/// A provider-agnostic chat response, already reduced to the fields the
/// agent loop consumes.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Assistant text (joined text blocks).
    pub content: String,
    /// Structured tool calls, raw as the provider sent them
    /// (structured dialect only; empty for inline dialects).
    pub tool_calls: Vec<ToolCallRecord>,
    /// Provider finish reason (`stop`, `tool_calls`, `length`, ...).
    pub finish_reason: Option<String>,
    /// This call's token usage.
    pub usage: TokenUsage,
    /// The model that produced the response.
    pub model: String,
}

/// Capability set every LLM adapter implements.
///
/// Concrete adapters differ in request shape, how tool calls are encoded,
/// whether cache hints are injected, and finish-reason mapping. The agent
/// loop drives them uniformly through this trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request built from `(system_prompt, history, tools)`.
    ///
    /// The canonical history is compacted through the keep-tool-result
    /// policy before encoding; the canonical copy is never modified.
    /// Retries transient failures with exponential backoff (5 attempts);
    /// [`mf_domain::Error::ContextLimit`] and
    /// [`mf_domain::Error::Cancelled`] propagate immediately.
    async fn send_request(
        &self,
        system_prompt: &str,
        history: &History,
        tools: &[ServerTools],
        keep_tool_result: i64,
    ) -> Result<ChatResponse>;

    /// Fold the response into the canonical history and return
    /// `(assistant_text, should_break)`.
    ///
    /// An empty response text with `should_break = true` tells the loop
    /// the call failed; a `finish_reason = length` with empty content is
    /// reported as `Error::ContextLimit`.
    fn parse_response(&self, response: &ChatResponse, history: &mut History)
        -> Result<(String, bool)>;

    /// Extract `(good, bad)` tool calls from the response.
    fn extract_tool_calls(
        &self,
        response: &ChatResponse,
        assistant_text: &str,
    ) -> (Vec<ToolCall>, Vec<BadToolCall>);

    /// Merge one turn's tool outcomes back into the transcript, in the
    /// dialect's feedback shape (one `tool` message per call, or a single
    /// merged `user` message).
    fn update_history_with_tools(
        &self,
        history: &mut History,
        outcomes: &[DispatchOutcome],
        truncated: bool,
    );

    /// Generate the dialect's base system prompt for the given date and
    /// tool catalog.
    fn system_prompt(&self, date: NaiveDate, tools: &[ServerTools]) -> String;

    /// Merge a dangling user message (if any) with the summary prompt,
    /// returning the text the loop should append as the summary request.
    fn merge_summary_prompt(&self, history: &mut History, summary_prompt: &str) -> String;

    /// Whether `history` plus the summary prompt still fits the model's
    /// context window. Pure check — the loop decides whether to roll back.
    fn context_headroom(&self, history: &History, summary_prompt: &str) -> bool;

    /// Cumulative token usage for this client.
    fn usage(&self) -> TokenUsage;

    /// The configured model identifier.
    fn model_name(&self) -> &str;
}

/// Shared headroom estimate used by both dialects.
///
/// Worst-cases the next call as: last prompt + last completion + the
/// not-yet-sent trailing user message + the summary prompt (both scaled
/// by a 1.2 buffer) + the response reservation.
pub(crate) fn headroom_fits(
    last_prompt_tokens: u64,
    last_completion_tokens: u64,
    history: &History,
    summary_prompt: &str,
    max_output_tokens: u64,
    max_context_length: u64,
) -> bool {
    const BUFFER: f64 = 1.2;

    let summary_tokens = mf_history::estimate_tokens(summary_prompt) as f64 * BUFFER;
    let pending_user_tokens = history
        .messages()
        .last()
        .filter(|m| m.role == mf_domain::tool::Role::User)
        .map(|m| mf_history::estimate_tokens(&m.content.all_text()) as f64 * BUFFER)
        .unwrap_or(0.0);

    let estimated_total = last_prompt_tokens as f64
        + last_completion_tokens as f64
        + pending_user_tokens
        + summary_tokens
        + max_output_tokens as f64;

    let fits = estimated_total < max_context_length as f64;
    if !fits {
        tracing::debug!(
            estimated_total,
            max_context_length,
            "context plus summary would exceed the window"
        );
    }
    fits
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::tool::Message;

    #[test]
    fn headroom_passes_with_small_history() {
        let mut h = History::new();
        h.append(Message::user("short task"));
        assert!(headroom_fits(100, 50, &h, "summarize", 1000, 100_000));
    }

    #[test]
    fn headroom_fails_when_window_exhausted() {
        let mut h = History::new();
        h.append(Message::user("task"));
        assert!(!headroom_fits(90_000, 5_000, &h, "summarize", 8_000, 100_000));
    }

    #[test]
    fn pending_user_message_counts_against_headroom() {
        let mut h = History::new();
        h.append(Message::user("task"));
        h.append(Message::assistant("calling"));
        h.append(Message::user("x".repeat(200_000)));
        // Without the pending user message this would fit easily.
        assert!(!headroom_fits(1_000, 500, &h, "summarize", 1_000, 60_000));
    }
}
