//! End-to-end orchestrator scenarios driven by scripted provider and tool
//! fakes. Each scenario scripts the exact sequence of provider responses
//! and asserts the transcript, trace, and status the loop must produce.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use mf_domain::config::{AgentProfile, ProviderConfig, ProviderDialect, RunConfig};
use mf_domain::error::Result;
use mf_domain::tool::{
    BadToolCall, DispatchOutcome, Role, ServerTools, ToolCall, ToolCallRecord, ToolDefinition,
    ToolResult,
};
use mf_domain::trace::TaskStatus;
use mf_domain::usage::TokenUsage;
use mf_history::History;
use mf_orchestrator::{Orchestrator, ToolExecutor};
use mf_providers::traits::ChatResponse;
use mf_providers::LlmClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider whose responses are a fixed script. Pure transcript logic
/// (parsing, extraction, history updates) is delegated to the real dialect
/// client; only the network call is replaced.
struct ScriptedClient {
    inner: Box<dyn LlmClient>,
    responses: Mutex<Vec<ChatResponse>>,
    usage: Mutex<TokenUsage>,
    last_call: Mutex<(u64, u64)>,
    max_context_length: u64,
    max_output_tokens: u64,
}

impl ScriptedClient {
    fn new(dialect: ProviderDialect, responses: Vec<ChatResponse>) -> Arc<Self> {
        Self::with_window(dialect, responses, 1_000_000)
    }

    fn with_window(
        dialect: ProviderDialect,
        responses: Vec<ChatResponse>,
        max_context_length: u64,
    ) -> Arc<Self> {
        let cfg = ProviderConfig {
            id: "scripted".into(),
            dialect,
            base_url: "http://127.0.0.1:1/v1".into(),
            api_key: String::new(),
            model: "scripted-model".into(),
            temperature: 0.0,
            top_p: None,
            max_tokens: 500,
            max_context_length: 0,
            use_cache_control: false,
            request_timeout_secs: 5,
        };
        let inner: Box<dyn LlmClient> = match dialect {
            ProviderDialect::OpenAiChat => Box::new(
                mf_providers::openai_chat::OpenAiChatClient::from_config(&cfg, max_context_length)
                    .unwrap(),
            ),
            ProviderDialect::ClaudeChat => Box::new(
                mf_providers::claude_chat::ClaudeChatClient::from_config(&cfg, max_context_length)
                    .unwrap(),
            ),
        };
        let mut responses = responses;
        responses.reverse(); // pop() from the back
        Arc::new(Self {
            inner,
            responses: Mutex::new(responses),
            usage: Mutex::new(TokenUsage::default()),
            last_call: Mutex::new((0, 0)),
            max_context_length,
            max_output_tokens: 500,
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn send_request(
        &self,
        _system_prompt: &str,
        _history: &History,
        _tools: &[ServerTools],
        _keep_tool_result: i64,
    ) -> Result<ChatResponse> {
        let response = self
            .responses
            .lock()
            .pop()
            .expect("provider script exhausted");
        self.usage.lock().add(&response.usage);
        *self.last_call.lock() = (response.usage.input_tokens, response.usage.output_tokens);
        Ok(response)
    }

    fn parse_response(
        &self,
        response: &ChatResponse,
        history: &mut History,
    ) -> Result<(String, bool)> {
        self.inner.parse_response(response, history)
    }

    fn extract_tool_calls(
        &self,
        response: &ChatResponse,
        assistant_text: &str,
    ) -> (Vec<ToolCall>, Vec<BadToolCall>) {
        self.inner.extract_tool_calls(response, assistant_text)
    }

    fn update_history_with_tools(
        &self,
        history: &mut History,
        outcomes: &[DispatchOutcome],
        truncated: bool,
    ) {
        self.inner.update_history_with_tools(history, outcomes, truncated)
    }

    fn system_prompt(&self, date: chrono::NaiveDate, tools: &[ServerTools]) -> String {
        self.inner.system_prompt(date, tools)
    }

    fn merge_summary_prompt(&self, history: &mut History, summary_prompt: &str) -> String {
        self.inner.merge_summary_prompt(history, summary_prompt)
    }

    fn context_headroom(&self, _history: &History, summary_prompt: &str) -> bool {
        let (prompt, completion) = *self.last_call.lock();
        let summary = (mf_history::estimate_tokens(summary_prompt) as f64 * 1.2) as u64;
        prompt + completion + summary + self.max_output_tokens < self.max_context_length
    }

    fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// In-process tool executor backed by a closure map; records every
/// invocation.
struct FakeTools {
    catalogs: Vec<ServerTools>,
    results: HashMap<(String, String), String>,
    calls: Mutex<Vec<(String, String, Value)>>,
}

impl FakeTools {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            catalogs: Vec::new(),
            results: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn single(server: &str, tool: &str, result: &str) -> Arc<Self> {
        let mut results = HashMap::new();
        results.insert((server.to_string(), tool.to_string()), result.to_string());
        Arc::new(Self {
            catalogs: vec![ServerTools {
                server_name: server.into(),
                tools: vec![ToolDefinition {
                    name: tool.into(),
                    description: format!("fake {tool}"),
                    schema: serde_json::json!({"type": "object", "properties": {}}),
                }],
                error: None,
            }],
            results,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ToolExecutor for FakeTools {
    async fn list_tools(&self) -> Vec<ServerTools> {
        self.catalogs.clone()
    }

    async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolResult> {
        self.calls
            .lock()
            .push((server.to_string(), tool.to_string(), arguments));
        match self.results.get(&(server.to_string(), tool.to_string())) {
            Some(text) => Ok(ToolResult::Ok(text.clone())),
            None => Ok(ToolResult::Error(format!("Server '{server}' not found."))),
        }
    }
}

// ── Response builders ──────────────────────────────────────────────

fn text_response(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        tool_calls: vec![],
        finish_reason: Some("stop".into()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
            ..Default::default()
        },
        model: "scripted-model".into(),
    }
}

fn tool_call_response(calls: &[(&str, &str, Value)]) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_calls: calls
            .iter()
            .enumerate()
            .map(|(i, (id, name, args))| ToolCallRecord {
                id: (*id).to_string().replace("{i}", &i.to_string()),
                name: (*name).to_string(),
                arguments: args.to_string(),
            })
            .collect(),
        finish_reason: Some("tool_calls".into()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 10,
            ..Default::default()
        },
        model: "scripted-model".into(),
    }
}

fn config_with(max_turns: i64, max_tool_calls: usize) -> RunConfig {
    RunConfig {
        main_agent: AgentProfile {
            max_turns,
            max_tool_calls_per_turn: max_tool_calls,
            ..Default::default()
        },
        sub_agents: BTreeMap::new(),
        extraction: Default::default(),
        limits: Default::default(),
        tool_call_timeout_secs: 600,
    }
}

fn orchestrator(
    config: RunConfig,
    client: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
) -> Orchestrator {
    Orchestrator::with_components(
        config,
        client,
        tools,
        BTreeMap::new(),
        None,
        "test-task",
        None,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — trivial completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_trivial_completion() {
    let client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![text_response("OK"), text_response("The reply was OK.")],
    );
    let mut orch = orchestrator(config_with(20, 10), client, FakeTools::empty());

    let outcome = orch.run_task("Reply with the word OK.", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Completed);
    assert_eq!(outcome.boxed_answer, "");
    assert!(outcome.final_summary.contains("OK"));
    assert_eq!(outcome.trajectory.main_turns, 1);
    assert!(outcome.usage.input_tokens >= 200, "both calls counted");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — single structured tool turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_single_tool_turn() {
    let client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![
            tool_call_response(&[("t1", "tool-calc-add", serde_json::json!({"a": 2, "b": 2}))]),
            text_response("The answer is 4."),
            text_response("The calculator returned 4, so the answer is 4."),
        ],
    );
    let tools = FakeTools::single("tool-calc", "add", "4");
    let mut orch = orchestrator(config_with(20, 10), client, tools.clone());

    let outcome = orch
        .run_task("Compute 2+2 using the calculator tool.", None)
        .await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Completed);
    assert_eq!(tools.call_count(), 1);
    assert_eq!(
        tools.calls.lock()[0].2,
        serde_json::json!({"a": 2, "b": 2})
    );

    let messages = &outcome.trajectory.main_history.messages;
    assert!(!outcome.trajectory.main_history.system_prompt.is_empty());
    // [user, assistant(tool_call t1), tool(t1, "4"), assistant(answer), ...summary]
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[1].tool_calls[0].id, "t1");
    assert_eq!(messages[2].role, Role::Tool);
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("t1"));
    assert_eq!(messages[2].content.all_text(), "4");
    assert_eq!(messages[3].role, Role::Assistant);
    assert_eq!(messages[3].content.all_text(), "The answer is 4.");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — inline parse-error recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_parse_error_recovery() {
    // Turn 1: block truncated before both closing tags — unrepairable.
    let broken =
        "<use_mcp_tool><server_name>tool-calc</server_name><tool_name>add</tool_name><arguments>{\"a\": 2, \"b\": 2}";
    // Turn 2: well-formed call.
    let fixed = "<use_mcp_tool><server_name>tool-calc</server_name><tool_name>add</tool_name><arguments>{\"a\": 2, \"b\": 2}</arguments></use_mcp_tool>";

    let client = ScriptedClient::new(
        ProviderDialect::ClaudeChat,
        vec![
            text_response(broken),
            text_response(fixed),
            text_response("The answer is 4."),
            text_response("Summary: the answer is 4."),
        ],
    );
    let tools = FakeTools::single("tool-calc", "add", "4");
    let mut orch = orchestrator(config_with(20, 10), client, tools.clone());

    let outcome = orch.run_task("Compute 2+2.", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Completed);
    assert_eq!(tools.call_count(), 1, "only the repaired turn executed a tool");

    let messages = &outcome.trajectory.main_history.messages;
    // The malformed turn produced a retry instruction as the tool result.
    let retry_msg = messages
        .iter()
        .find(|m| m.content.all_text().contains("tool call format was incorrect"))
        .expect("retry instruction fed back to the model");
    assert_eq!(retry_msg.role, Role::User);
    // The repaired turn produced a bare tool result.
    assert!(messages.iter().any(|m| m.content.all_text() == "4"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — context overflow forces summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_context_overflow_forces_summary() {
    let call = |input_tokens: u64| ChatResponse {
        usage: TokenUsage {
            input_tokens,
            output_tokens: 10,
            ..Default::default()
        },
        ..tool_call_response(&[("t{i}", "tool-calc-add", serde_json::json!({"a": 1, "b": 1}))])
    };

    // Turn 3's prompt usage blows the window; the loop must roll back the
    // freshest exchange and still produce a summary.
    let client = ScriptedClient::with_window(
        ProviderDialect::OpenAiChat,
        vec![
            call(100),
            call(120),
            call(1800),
            text_response("Partial summary from truncated history."),
        ],
        2_000,
    );
    let tools = FakeTools::single("tool-calc", "add", "2");
    let mut orch = orchestrator(config_with(20, 10), client, tools.clone());

    let outcome = orch.run_task("Loop on the calculator.", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Failed);
    assert!(outcome.final_summary.contains("Partial summary"));

    let messages = &outcome.trajectory.main_history.messages;
    // Turn 3's assistant/tool exchange was rolled back: no tool message
    // may directly precede the summary-request user message.
    let summary_user_idx = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap();
    assert_eq!(messages[summary_user_idx - 1].role, Role::Tool);
    let tool_messages = messages.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(tool_messages, 2, "third exchange rolled back");
    assert_eq!(tools.call_count(), 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — sub-agent recursion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_sub_agent_recursion() {
    let main_client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![
            tool_call_response(&[(
                "t1",
                "agent-browsing-search_and_browse",
                serde_json::json!({"subtask": "find X"}),
            )]),
            text_response("X is 42."),
            text_response("The sub-agent found that X is 42."),
        ],
    );
    let sub_client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![
            tool_call_response(&[("s1", "tool-web-search", serde_json::json!({"query": "X"}))]),
            text_response("Found it: X is 42."),
            text_response("X is 42."),
        ],
    );

    let mut config = config_with(20, 10);
    config
        .sub_agents
        .insert("agent-browsing".into(), AgentProfile::default());

    let sub_tools = FakeTools::single("tool-web", "search", "X equals 42 per the almanac");
    let mut sub_agents: BTreeMap<String, (Arc<dyn LlmClient>, Arc<dyn ToolExecutor>)> =
        BTreeMap::new();
    sub_agents.insert("agent-browsing".into(), (sub_client, sub_tools));

    let mut orch = Orchestrator::with_components(
        config,
        main_client,
        FakeTools::empty(),
        sub_agents,
        None,
        "test-task",
        None,
    );

    let outcome = orch.run_task("What is X?", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Completed);
    assert_eq!(outcome.trajectory.sub_sessions.len(), 1);
    let session = &outcome.trajectory.sub_sessions["agent-browsing_1"];
    assert!(session.messages.len() >= 5);
    assert_eq!(session.messages[0].role, Role::User);
    assert!(session.messages[0]
        .content
        .all_text()
        .starts_with("find X"));

    // The sub-agent's final summary is the parent's tool result.
    let parent_tool_msg = outcome
        .trajectory
        .main_history
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("parent received a tool message");
    assert_eq!(parent_tool_msg.content.all_text(), "X is 42.");
    assert_eq!(outcome.trajectory.sub_agent_counter, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — max turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_max_turns_marks_failed() {
    let call =
        || tool_call_response(&[("t{i}", "tool-calc-add", serde_json::json!({"a": 1, "b": 1}))]);
    let client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![call(), call(), call(), text_response("Gave up after 3 turns.")],
    );
    let tools = FakeTools::single("tool-calc", "add", "2");
    let mut orch = orchestrator(config_with(3, 10), client, tools.clone());

    let outcome = orch.run_task("Never stop calling tools.", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Failed);
    assert_eq!(outcome.trajectory.main_turns, 3);
    let assistants_with_calls = outcome
        .trajectory
        .main_history
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
        .count();
    assert_eq!(assistants_with_calls, 3);
    assert!(outcome.final_summary.contains("Gave up"));
    assert_eq!(tools.call_count(), 3);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fan-out cap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn fan_out_cap_limits_executions_but_keeps_transcript_aligned() {
    let client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![
            tool_call_response(&[
                ("c1", "tool-calc-add", serde_json::json!({"a": 1, "b": 1})),
                ("c2", "tool-calc-add", serde_json::json!({"a": 2, "b": 2})),
                ("c3", "tool-calc-add", serde_json::json!({"a": 3, "b": 3})),
            ]),
            text_response("done"),
            text_response("summary"),
        ],
    );
    let tools = FakeTools::single("tool-calc", "add", "ok");
    let mut config = config_with(20, 2);
    let mut orch = {
        config.main_agent.max_tool_calls_per_turn = 2;
        orchestrator(config, client, tools.clone())
    };

    let outcome = orch.run_task("Fan out.", None).await;

    // Only the first two calls were executed...
    assert_eq!(tools.call_count(), 2);
    // ...but the transcript still carries one tool message per call.
    let messages = &outcome.trajectory.main_history.messages;
    let tool_msgs: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_msgs.len(), 3);
    assert!(tool_msgs[2].content.all_text().contains("skipped"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancellation_before_first_turn_interrupts() {
    let client = ScriptedClient::new(
        ProviderDialect::OpenAiChat,
        vec![text_response("never used")],
    );
    let mut orch = orchestrator(config_with(20, 10), client, FakeTools::empty());
    orch.cancel_token().cancel();

    let outcome = orch.run_task("anything", None).await;

    assert_eq!(outcome.trajectory.status, TaskStatus::Interrupted);
    assert!(outcome.final_summary.contains("interrupted"));
}
