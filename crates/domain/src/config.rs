//! Run configuration.
//!
//! All knobs the orchestrator core consumes are injected here at task
//! boundaries. The environment is consulted only by the CLI, at startup,
//! as a default-population source — the core never reads it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool servers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque address of one tool server. The tool manager speaks the same
/// JSON-RPC protocol over either transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ToolServerParams {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: ToolServerParams,
}

/// One blacklisted `(server, tool)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolBlacklistEntry {
    pub server: String,
    pub tool: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which wire dialect the client speaks.
///
/// `OpenAiChat` uses the structured `tool_calls` field of the
/// chat-completions API; `ClaudeChat` embeds inline `<use_mcp_tool>`
/// blocks in assistant text (useful for endpoints without native tool
/// support, and for prompt-cached Claude-compatible gateways).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderDialect {
    OpenAiChat,
    ClaudeChat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in logs and error messages.
    #[serde(default = "default_provider_id")]
    pub id: String,
    pub dialect: ProviderDialect,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens the model may generate per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Model context window; 0 means "use `RunConfig.limits`".
    #[serde(default)]
    pub max_context_length: u64,
    /// Inject an ephemeral cache-control marker on the system message and
    /// last user message (Claude-compatible gateways only).
    #[serde(default)]
    pub use_cache_control: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_id() -> String {
    "default".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_request_timeout() -> u64 {
    1800
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a sub-agent is presented to its parent: as a single tool taking a
/// `subtask` string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskToolSpec {
    pub tool_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Maximum loop turns; negative means unbounded.
    #[serde(default = "default_max_turns")]
    pub max_turns: i64,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_turn: usize,
    /// Keep-tool-result policy: -1 = no compaction, 0 = keep only the
    /// first tool-producing message, k > 0 = first plus last k.
    #[serde(default = "default_keep_tool_result")]
    pub keep_tool_result: i64,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
    #[serde(default)]
    pub tool_blacklist: Vec<ToolBlacklistEntry>,
    /// Appended to the generated system prompt.
    #[serde(default)]
    pub system_prompt_suffix: String,
    /// Per-agent LLM client; `None` inherits the main agent's client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<ProviderConfig>,
    /// Tool surface exposed to the parent (sub-agents only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_tool: Option<SubtaskToolSpec>,
}

fn default_max_turns() -> i64 {
    20
}
fn default_max_tool_calls() -> usize {
    10
}
fn default_keep_tool_result() -> i64 {
    -1
}

impl AgentProfile {
    /// Effective turn bound; unbounded maps to `u64::MAX`.
    pub fn turn_limit(&self) -> u64 {
        if self.max_turns < 0 {
            u64::MAX
        } else {
            self.max_turns as u64
        }
    }

    /// The subtask tool presented to the parent, with a generic default
    /// for agents that do not configure one.
    pub fn subtask_tool_or_default(&self) -> SubtaskToolSpec {
        self.subtask_tool.clone().unwrap_or_else(|| SubtaskToolSpec {
            tool_name: "execute_subtask".into(),
            description: "This tool is an agent that performs a clearly defined subtask \
                          and returns its result. The subtask should include relevant \
                          background and the desired output format. It does not perform \
                          vague or speculative subtasks. \nArgs: \n\tsubtask: the subtask \
                          to be performed. \nReturns: \n\tthe result of the subtask. "
                .into(),
        })
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_calls_per_turn: default_max_tool_calls(),
            keep_tool_result: default_keep_tool_result(),
            tool_servers: Vec::new(),
            tool_blacklist: Vec::new(),
            system_prompt_suffix: String::new(),
            llm: None,
            subtask_tool: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction & limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Prepend model-generated preliminary notes to the task.
    #[serde(default)]
    pub enable_hints: bool,
    /// Run the answer-type + boxed-answer extraction after the summary.
    #[serde(default)]
    pub enable_boxed_extraction: bool,
    /// Dedicated model for hints/extraction; `None` disables both even if
    /// the flags are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_llm: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_context_length")]
    pub max_context_length: u64,
    #[serde(default = "default_max_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_context_length() -> u64 {
    200_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_context_length: default_max_context_length(),
            max_output_tokens: default_max_tokens(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunConfig
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub main_agent: AgentProfile,
    /// Sub-agents keyed by their server name, which must start with
    /// `agent-` (e.g. `agent-browsing`).
    #[serde(default)]
    pub sub_agents: BTreeMap<String, AgentProfile>,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Hard per-tool-call timeout.
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_secs: u64,
}

fn default_tool_call_timeout() -> u64 {
    600
}

impl RunConfig {
    /// Resolve a provider's context window against the run-level limit.
    pub fn context_window_for(&self, provider: &ProviderConfig) -> u64 {
        if provider.max_context_length > 0 {
            provider.max_context_length
        } else {
            self.limits.max_context_length
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let cfg: RunConfig = toml::from_str(
            r#"
            [main_agent]
            [main_agent.llm]
            dialect = "openai-chat"
            base_url = "https://api.openai.com/v1"
            model = "gpt-4.1"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.main_agent.max_turns, 20);
        assert_eq!(cfg.main_agent.keep_tool_result, -1);
        assert_eq!(cfg.tool_call_timeout_secs, 600);
        assert_eq!(cfg.limits.max_context_length, 200_000);
        let llm = cfg.main_agent.llm.unwrap();
        assert_eq!(llm.dialect, ProviderDialect::OpenAiChat);
        assert_eq!(llm.max_tokens, 8192);
    }

    #[test]
    fn sub_agent_toml_with_stdio_server() {
        let cfg: RunConfig = toml::from_str(
            r#"
            [main_agent]

            [sub_agents.agent-browsing]
            max_turns = 12

            [[sub_agents.agent-browsing.tool_servers]]
            name = "tool-searching"
            transport = "stdio"
            command = "python"
            args = ["-m", "searching_server"]

            [sub_agents.agent-browsing.subtask_tool]
            tool_name = "search_and_browse"
            description = "Searches and browses the web."
            "#,
        )
        .unwrap();
        let agent = &cfg.sub_agents["agent-browsing"];
        assert_eq!(agent.max_turns, 12);
        assert_eq!(agent.tool_servers.len(), 1);
        match &agent.tool_servers[0].params {
            ToolServerParams::Stdio { command, args, .. } => {
                assert_eq!(command, "python");
                assert_eq!(args.len(), 2);
            }
            _ => panic!("expected stdio params"),
        }
        assert_eq!(
            agent.subtask_tool_or_default().tool_name,
            "search_and_browse"
        );
    }

    #[test]
    fn negative_max_turns_is_unbounded() {
        let profile = AgentProfile {
            max_turns: -1,
            ..Default::default()
        };
        assert_eq!(profile.turn_limit(), u64::MAX);
    }

    #[test]
    fn provider_context_window_falls_back_to_limits() {
        let cfg: RunConfig = toml::from_str("[main_agent]").unwrap();
        let provider = ProviderConfig {
            id: "p".into(),
            dialect: ProviderDialect::ClaudeChat,
            base_url: "http://x".into(),
            api_key: String::new(),
            model: "m".into(),
            temperature: 0.3,
            top_p: None,
            max_tokens: 4096,
            max_context_length: 0,
            use_cache_control: false,
            request_timeout_secs: 1800,
        };
        assert_eq!(cfg.context_window_for(&provider), 200_000);
    }
}
