//! Inline-XML dialect client for Claude-compatible chat-completions
//! gateways (Anthropic-style models behind an OpenAI-shaped endpoint).
//!
//! No native tool support is assumed: the system prompt teaches the
//! `<use_mcp_tool>` format, tool calls are parsed out of assistant text,
//! and tool results are merged into a single user message per turn.
//! Send-time-only decorations (system insertion, keep-tool-result
//! compaction, cache-control markers) never touch the canonical history.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use mf_domain::config::ProviderConfig;
use mf_domain::error::{classify_provider_error, Error, Result};
use mf_domain::tool::{
    BadToolCall, DispatchOutcome, Message, Role, ServerTools, ToolCall,
};
use mf_domain::usage::TokenUsage;
use mf_history::History;

use crate::parse::parse_inline_tool_calls;
use crate::prompts;
use crate::retry::{retry, Backoff};
use crate::traits::{headroom_fits, ChatResponse, LlmClient};
use crate::wire;

pub struct ClaudeChatClient {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: Option<f32>,
    max_tokens: u32,
    max_context_length: u64,
    use_cache_control: bool,
    client: reqwest::Client,
    usage: Mutex<TokenUsage>,
    last_call: Mutex<(u64, u64)>,
}

impl ClaudeChatClient {
    pub fn from_config(cfg: &ProviderConfig, context_window: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        tracing::info!(
            provider = %cfg.id,
            model = %cfg.model,
            cache_control = cfg.use_cache_control,
            "claude-chat client initialized"
        );

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            max_tokens: cfg.max_tokens,
            max_context_length: context_window,
            use_cache_control: cfg.use_cache_control,
            client,
            usage: Mutex::new(TokenUsage::default()),
            last_call: Mutex::new((0, 0)),
        })
    }

    fn build_body(&self, system_prompt: &str, history: &History, keep_tool_result: i64) -> Value {
        let mut outgoing = history.compacted(keep_tool_result);
        mf_history::prepend_or_replace_system(&mut outgoing, system_prompt);

        // Cache-control targets: the system message and the last user
        // message, one text part each.
        let last_user_idx = outgoing
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(usize::MAX);

        let messages: Vec<Value> = outgoing
            .iter()
            .enumerate()
            .map(|(i, msg)| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    // This dialect has no tool role on the wire; results
                    // are merged into user messages before this point.
                    Role::Tool => "user",
                };
                let text = msg.content.all_text();
                let cached = self.use_cache_control
                    && !text.is_empty()
                    && (msg.role == Role::System || i == last_user_idx);
                if cached {
                    serde_json::json!({
                        "role": role,
                        "content": [{
                            "type": "text",
                            "text": text,
                            "cache_control": { "type": "ephemeral" },
                        }],
                    })
                } else {
                    serde_json::json!({
                        "role": role,
                        "content": [{ "type": "text", "text": text }],
                    })
                }
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(top_p) = self.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        body
    }

    async fn attempt(&self, body: &Value) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(provider = %self.id, url = %url, "chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_provider_error(
                &self.id,
                format!("HTTP {} - {}", status.as_u16(), text),
            ));
        }

        let json: Value = serde_json::from_str(&text)?;
        let parsed = wire::parse_chat_completion(&self.id, &json)?;

        self.usage.lock().add(&parsed.usage);
        *self.last_call.lock() = (parsed.usage.input_tokens, parsed.usage.output_tokens);

        Ok(parsed)
    }
}

/// Strip hallucinated `\n\nUser: ...` continuations from assistant text,
/// up to the next tool block (or end of text).
fn strip_hallucinated_user(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)\n\nUser:.*?(<use_mcp_tool>|$)").unwrap());
    re.replace_all(text, "$1").into_owned()
}

#[async_trait]
impl LlmClient for ClaudeChatClient {
    async fn send_request(
        &self,
        system_prompt: &str,
        history: &History,
        _tools: &[ServerTools],
        keep_tool_result: i64,
    ) -> Result<ChatResponse> {
        let body = self.build_body(system_prompt, history, keep_tool_result);
        retry(Backoff::default(), || self.attempt(&body)).await
    }

    fn parse_response(
        &self,
        response: &ChatResponse,
        history: &mut History,
    ) -> Result<(String, bool)> {
        let finish = response.finish_reason.as_deref().unwrap_or("");
        match finish {
            "stop" | "end_turn" => {
                let text = strip_hallucinated_user(&response.content);
                history.append(Message::assistant(&text));
                Ok((text, false))
            }
            "length" if response.content.is_empty() => Err(Error::ContextLimit(
                "completion truncated with empty content".into(),
            )),
            "length" => {
                let text = strip_hallucinated_user(&response.content);
                history.append(Message::assistant(&text));
                Ok((text, false))
            }
            other => Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("unsupported finish reason: {other}"),
            }),
        }
    }

    fn extract_tool_calls(
        &self,
        _response: &ChatResponse,
        assistant_text: &str,
    ) -> (Vec<ToolCall>, Vec<BadToolCall>) {
        parse_inline_tool_calls(assistant_text)
    }

    fn update_history_with_tools(
        &self,
        history: &mut History,
        outcomes: &[DispatchOutcome],
        truncated: bool,
    ) {
        let valid: Vec<&DispatchOutcome> = outcomes
            .iter()
            .filter(|o| !o.failed_parse && !o.skipped)
            .collect();
        let bad: Vec<&DispatchOutcome> = outcomes.iter().filter(|o| o.failed_parse).collect();

        let total = valid.len() + bad.len();
        let mut parts: Vec<String> = Vec::new();

        if total > 1 {
            if truncated {
                parts.push(format!(
                    "You made too many tool calls. I can only afford to process {} valid \
                     tool calls in this turn.",
                    valid.len()
                ));
            } else {
                parts.push(format!(
                    "I have processed {} valid tool calls in this turn.",
                    valid.len()
                ));
            }
            for (i, outcome) in valid.iter().enumerate() {
                parts.push(format!("Valid tool call {} result:\n{}", i + 1, outcome.text));
            }
            for (i, outcome) in bad.iter().enumerate() {
                parts.push(format!("Failed tool call {} result:\n{}", i + 1, outcome.text));
            }
        } else {
            for outcome in valid.iter().chain(bad.iter()) {
                parts.push(outcome.text.clone());
            }
        }

        // Truncation with a single surviving call still deserves the header.
        if truncated && total <= 1 {
            parts.insert(
                0,
                format!(
                    "You made too many tool calls. I can only afford to process {} valid \
                     tool calls in this turn.",
                    valid.len()
                ),
            );
        }

        history.append(Message::user(parts.join("\n\n")));
    }

    fn system_prompt(&self, date: NaiveDate, tools: &[ServerTools]) -> String {
        prompts::mcp_system_prompt(date, tools)
    }

    fn merge_summary_prompt(&self, history: &mut History, summary_prompt: &str) -> String {
        match history.pop_if_user() {
            Some(dangling) => format!(
                "{}\n\n-----------------\n\n{}",
                dangling.content.all_text(),
                summary_prompt
            ),
            None => summary_prompt.to_string(),
        }
    }

    fn context_headroom(&self, history: &History, summary_prompt: &str) -> bool {
        let (prompt, completion) = *self.last_call.lock();
        headroom_fits(
            prompt,
            completion,
            history,
            summary_prompt,
            self.max_tokens as u64,
            self.max_context_length,
        )
    }

    fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
