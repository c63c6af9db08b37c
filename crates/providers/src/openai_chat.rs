//! Structured-dialect client for OpenAI-compatible chat-completions
//! endpoints.
//!
//! Tool definitions travel in the request's `tools` field as
//! `<server>-<tool>` functions; tool calls come back on the assistant
//! message; tool results are fed back as one `role=tool` message per call.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::Value;

use mf_domain::config::ProviderConfig;
use mf_domain::error::{classify_provider_error, Error, Result};
use mf_domain::tool::{
    split_wire_name, BadToolCall, DispatchOutcome, Message, MessageContent, Role, ServerTools,
    ToolCall,
};
use mf_domain::usage::TokenUsage;
use mf_history::History;

use crate::repair;
use crate::retry::{retry, Backoff};
use crate::traits::{headroom_fits, ChatResponse, LlmClient};
use crate::wire;
use crate::prompts;

pub struct OpenAiChatClient {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: Option<f32>,
    max_tokens: u32,
    max_context_length: u64,
    client: reqwest::Client,
    usage: Mutex<TokenUsage>,
    /// (prompt, completion) tokens of the most recent call, for the
    /// headroom estimate.
    last_call: Mutex<(u64, u64)>,
}

impl OpenAiChatClient {
    pub fn from_config(cfg: &ProviderConfig, context_window: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        tracing::info!(
            provider = %cfg.id,
            model = %cfg.model,
            "openai-chat client initialized"
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
            client,
            usage: Mutex::new(TokenUsage::default()),
            last_call: Mutex::new((0, 0)),
        })
    }

    fn build_body(
        &self,
        system_prompt: &str,
        history: &History,
        tools: &[ServerTools],
        keep_tool_result: i64,
    ) -> Value {
        let mut outgoing = history.compacted(keep_tool_result);
        mf_history::prepend_or_replace_system(&mut outgoing, system_prompt);

        let messages: Vec<Value> = outgoing.iter().map(encode_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(top_p) = self.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        let tool_defs: Vec<Value> = tools
            .iter()
            .flat_map(|server| {
                server.tools.iter().map(move |tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": server.wire_name(tool),
                            "description": tool.description,
                            "parameters": tool.schema,
                        }
                    })
                })
            })
            .collect();
        if !tool_defs.is_empty() {
            body["tools"] = Value::Array(tool_defs);
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

fn encode_message(msg: &Message) -> Value {
    let text = msg.content.all_text();
    match msg.role {
        Role::System => serde_json::json!({ "role": "system", "content": text }),
        Role::User => serde_json::json!({ "role": "user", "content": text }),
        Role::Assistant => {
            let mut v = serde_json::json!({ "role": "assistant", "content": text });
            if !msg.tool_calls.is_empty() {
                v["tool_calls"] = Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect(),
                );
            }
            v
        }
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": text,
        }),
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn send_request(
        &self,
        system_prompt: &str,
        history: &History,
        tools: &[ServerTools],
        keep_tool_result: i64,
    ) -> Result<ChatResponse> {
        let body = self.build_body(system_prompt, history, tools, keep_tool_result);
        retry(Backoff::default(), || self.attempt(&body)).await
    }

    fn parse_response(
        &self,
        response: &ChatResponse,
        history: &mut History,
    ) -> Result<(String, bool)> {
        let finish = response.finish_reason.as_deref().unwrap_or("");
        match finish {
            "stop" => {
                history.append(Message::assistant(&response.content));
                Ok((response.content.clone(), false))
            }
            "tool_calls" => {
                // Give the transcript a textual stand-in when the model
                // produced calls without any prose.
                let text = if response.content.is_empty() {
                    response
                        .tool_calls
                        .iter()
                        .map(|tc| format!("Using tool {} with arguments: {}", tc.name, tc.arguments))
                        .collect::<Vec<_>>()
                        .join("\n")
                } else {
                    response.content.clone()
                };
                history.append(Message {
                    role: Role::Assistant,
                    content: MessageContent::Text(text.clone()),
                    tool_calls: response.tool_calls.clone(),
                    tool_call_id: None,
                });
                Ok((text, false))
            }
            "length" if response.content.is_empty() => Err(Error::ContextLimit(
                "completion truncated with empty content".into(),
            )),
            "length" => {
                history.append(Message::assistant(&response.content));
                Ok((response.content.clone(), false))
            }
            other => Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("unsupported finish reason: {other}"),
            }),
        }
    }

    fn extract_tool_calls(
        &self,
        response: &ChatResponse,
        _assistant_text: &str,
    ) -> (Vec<ToolCall>, Vec<BadToolCall>) {
        if response.finish_reason.as_deref() != Some("tool_calls") {
            return (Vec::new(), Vec::new());
        }

        let good = response
            .tool_calls
            .iter()
            .filter_map(|record| {
                let Some((server_name, tool_name)) = split_wire_name(&record.name) else {
                    tracing::warn!(name = %record.name, "tool call name has no server prefix");
                    return None;
                };
                let arguments = repair::robust_parse(&record.arguments).unwrap_or_else(|_| {
                    serde_json::json!({
                        "error": "Failed to parse arguments",
                        "raw": record.arguments,
                    })
                });
                Some(ToolCall {
                    id: Some(record.id.clone()),
                    server_name: server_name.to_string(),
                    tool_name: tool_name.to_string(),
                    arguments,
                })
            })
            .collect();

        (good, Vec::new())
    }

    fn update_history_with_tools(
        &self,
        history: &mut History,
        outcomes: &[DispatchOutcome],
        _truncated: bool,
    ) {
        // One tool message per call, skipped calls included so the
        // transcript stays aligned with the assistant's tool_calls list.
        for outcome in outcomes {
            if outcome.failed_parse {
                continue;
            }
            history.append(Message::tool_result(
                outcome.call_id.clone().unwrap_or_default(),
                &outcome.text,
            ));
        }
    }

    fn system_prompt(&self, date: NaiveDate, tools: &[ServerTools]) -> String {
        prompts::plain_system_prompt(date, tools)
    }

    fn merge_summary_prompt(&self, _history: &mut History, summary_prompt: &str) -> String {
        summary_prompt.to_string()
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
