//! Chat-completions wire helpers shared by both dialect clients.

use serde_json::Value;

use mf_domain::error::{classify_provider_error, Error, Result};
use mf_domain::tool::ToolCallRecord;
use mf_domain::usage::TokenUsage;

use crate::traits::ChatResponse;

/// Reduce a chat-completions response body to a [`ChatResponse`].
///
/// An HTTP-level error body should be classified by the caller before this
/// point; this only handles structurally valid responses.
pub(crate) fn parse_chat_completion(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(choice) = choice else {
        // Some gateways tunnel errors inside a 200 body.
        if let Some(message) = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return Err(classify_provider_error(provider, message.to_string()));
        }
        return Err(Error::Provider {
            provider: provider.to_string(),
            message: format!("response carried no choices: {body}"),
        });
    };

    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(ToolCallRecord {
                        id: c.get("id")?.as_str()?.to_string(),
                        name: c.get("function")?.get("name")?.as_str()?.to_string(),
                        arguments: c
                            .get("function")?
                            .get("arguments")?
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(str::to_string);

    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = body.get("usage").map(usage_from_json).unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
        model,
    })
}

pub(crate) fn usage_from_json(v: &Value) -> TokenUsage {
    let get = |path: &[&str]| -> u64 {
        let mut cur = v;
        for key in path {
            match cur.get(key) {
                Some(next) => cur = next,
                None => return 0,
            }
        }
        cur.as_u64().unwrap_or(0)
    };

    TokenUsage {
        input_tokens: get(&["prompt_tokens"]),
        output_tokens: get(&["completion_tokens"]),
        cached_input_tokens: get(&["prompt_tokens_details", "cached_tokens"]),
        reasoning_output_tokens: get(&["completion_tokens_details", "reasoning_tokens"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_text_response() {
        let body = serde_json::json!({
            "model": "gpt-4.1",
            "choices": [{
                "finish_reason": "stop",
                "message": { "role": "assistant", "content": "The answer is 4." }
            }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 10 }
        });
        let resp = parse_chat_completion("openai", &body).unwrap();
        assert_eq!(resp.content, "The answer is 4.");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.input_tokens, 100);
    }

    #[test]
    fn parses_tool_calls_and_details() {
        let body = serde_json::json!({
            "model": "gpt-4.1",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "t1",
                        "type": "function",
                        "function": { "name": "tool-calc-add", "arguments": "{\"a\":2,\"b\":2}" }
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": 50,
                "completion_tokens": 5,
                "prompt_tokens_details": { "cached_tokens": 40 },
                "completion_tokens_details": { "reasoning_tokens": 3 }
            }
        });
        let resp = parse_chat_completion("openai", &body).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "tool-calc-add");
        assert_eq!(resp.usage.cached_input_tokens, 40);
        assert_eq!(resp.usage.reasoning_output_tokens, 3);
    }

    #[test]
    fn tunnelled_context_limit_error_is_classified() {
        let body = serde_json::json!({
            "error": { "message": "This model's maximum context length is 200000 tokens" }
        });
        let err = parse_chat_completion("gateway", &body).unwrap_err();
        assert!(matches!(err, Error::ContextLimit(_)));
    }

    #[test]
    fn missing_choices_is_provider_error() {
        let body = serde_json::json!({ "model": "m" });
        let err = parse_chat_completion("p", &body).unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
