//! LLM provider adapters.
//!
//! One trait ([`traits::LlmClient`]) over two wire dialects:
//! [`openai_chat::OpenAiChatClient`] uses the chat-completions structured
//! `tool_calls` field; [`claude_chat::ClaudeChatClient`] embeds inline
//! `<use_mcp_tool>` blocks in assistant text. Both share the retry
//! discipline, token accounting, and context-limit detection.

pub mod claude_chat;
pub mod openai_chat;
pub mod parse;
pub mod prompts;
pub mod repair;
pub mod retry;
pub mod traits;
pub(crate) mod wire;

use std::sync::Arc;

use mf_domain::config::{ProviderConfig, ProviderDialect};
use mf_domain::error::Result;

pub use traits::{ChatResponse, LlmClient};

/// Build a client for the configured dialect. `context_window` is the
/// resolved window (provider override or run-level limit).
pub fn build_client(cfg: &ProviderConfig, context_window: u64) -> Result<Arc<dyn LlmClient>> {
    Ok(match cfg.dialect {
        ProviderDialect::OpenAiChat => {
            Arc::new(openai_chat::OpenAiChatClient::from_config(cfg, context_window)?)
        }
        ProviderDialect::ClaudeChat => {
            Arc::new(claude_chat::ClaudeChatClient::from_config(cfg, context_window)?)
        }
    })
}
