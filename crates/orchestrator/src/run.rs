//! Orchestrator assembly and the public `run_task` operation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mf_domain::config::{AgentProfile, RunConfig};
use mf_domain::error::Result;
use mf_domain::tool::{Message, Role, ServerTools, ToolResult};
use mf_domain::trace::{SessionTranscript, StepStatus, TaskStatus, TaskTrace};
use mf_domain::usage::TokenUsage;
use mf_history::History;
use mf_providers::LlmClient;
use mf_tool_client::ToolManager;

use crate::agent::LoopEnd;
use crate::cancel::{with_cancel, CancelToken};
use crate::extraction;
use crate::prompts;
use crate::summary::INTERRUPTED_TEXT;
use crate::tracer::TaskTracer;

/// Narrow tool-execution interface the loop depends on. The production
/// implementation is [`mf_tool_client::ToolManager`]; tests substitute
/// scripted fakes.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn list_tools(&self) -> Vec<ServerTools>;
    async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolResult>;
}

#[async_trait]
impl ToolExecutor for ToolManager {
    async fn list_tools(&self) -> Vec<ServerTools> {
        ToolManager::list_tools(self).await
    }

    async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolResult> {
        ToolManager::call_tool(self, server, tool, arguments).await
    }
}

/// One agent's runtime bundle: its limits, its LLM client, and its tool
/// surface. Cheap to clone (everything behind `Arc` except the profile).
#[derive(Clone)]
pub(crate) struct SessionSpec {
    pub name: String,
    pub profile: AgentProfile,
    pub client: Arc<dyn LlmClient>,
    pub tools: Arc<dyn ToolExecutor>,
}

impl SessionSpec {
    pub fn is_main(&self) -> bool {
        self.name == "main"
    }
}

/// Result of one task run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_summary: String,
    /// Contents of the extracted `\boxed{…}`; empty when extraction is
    /// disabled or failed.
    pub boxed_answer: String,
    pub trajectory: TaskTrace,
    pub usage: TokenUsage,
}

pub struct Orchestrator {
    pub(crate) main: SessionSpec,
    pub(crate) sub_agents: BTreeMap<String, SessionSpec>,
    pub(crate) extraction_client: Option<Arc<dyn LlmClient>>,
    pub(crate) config: RunConfig,
    pub(crate) tracer: TaskTracer,
    pub(crate) cancel: CancelToken,
}

impl Orchestrator {
    /// Build the production orchestrator from config: one tool manager and
    /// LLM client per agent, plus the optional extraction client.
    pub fn from_config(
        config: RunConfig,
        task_id: impl Into<String>,
        trace_path: Option<PathBuf>,
    ) -> Result<Self> {
        let tool_timeout = Duration::from_secs(config.tool_call_timeout_secs);

        let main_llm = config.main_agent.llm.as_ref().ok_or_else(|| {
            mf_domain::Error::Config("main_agent.llm is required".into())
        })?;
        let main_client =
            mf_providers::build_client(main_llm, config.context_window_for(main_llm))?;
        let main_tools: Arc<dyn ToolExecutor> = Arc::new(ToolManager::with_timeout(
            config.main_agent.tool_servers.clone(),
            &config.main_agent.tool_blacklist,
            tool_timeout,
        ));

        let mut sub_agents = BTreeMap::new();
        for (name, profile) in &config.sub_agents {
            let client = match &profile.llm {
                Some(cfg) => mf_providers::build_client(cfg, config.context_window_for(cfg))?,
                None => main_client.clone(),
            };
            let tools: Arc<dyn ToolExecutor> = Arc::new(ToolManager::with_timeout(
                profile.tool_servers.clone(),
                &profile.tool_blacklist,
                tool_timeout,
            ));
            sub_agents.insert(
                name.clone(),
                SessionSpec {
                    name: name.clone(),
                    profile: profile.clone(),
                    client,
                    tools,
                },
            );
        }

        let extraction_client = match &config.extraction.extraction_llm {
            Some(cfg) => Some(mf_providers::build_client(
                cfg,
                config.context_window_for(cfg),
            )?),
            None => None,
        };

        Ok(Self::with_components(
            config.clone(),
            main_client,
            main_tools,
            sub_agents
                .into_iter()
                .map(|(k, v)| (k, (v.client, v.tools)))
                .collect(),
            extraction_client,
            task_id,
            trace_path,
        ))
    }

    /// Assemble an orchestrator from pre-built clients and executors.
    /// This is the seam scripted fakes plug into.
    pub fn with_components(
        config: RunConfig,
        main_client: Arc<dyn LlmClient>,
        main_tools: Arc<dyn ToolExecutor>,
        sub_agents: BTreeMap<String, (Arc<dyn LlmClient>, Arc<dyn ToolExecutor>)>,
        extraction_client: Option<Arc<dyn LlmClient>>,
        task_id: impl Into<String>,
        trace_path: Option<PathBuf>,
    ) -> Self {
        let main = SessionSpec {
            name: "main".into(),
            profile: config.main_agent.clone(),
            client: main_client,
            tools: main_tools,
        };
        let sub_agents = sub_agents
            .into_iter()
            .map(|(name, (client, tools))| {
                let profile = config
                    .sub_agents
                    .get(&name)
                    .cloned()
                    .unwrap_or_default();
                (
                    name.clone(),
                    SessionSpec {
                        name,
                        profile,
                        client,
                        tools,
                    },
                )
            })
            .collect();

        Self {
            main,
            sub_agents,
            extraction_client,
            config,
            tracer: TaskTracer::new(task_id, None, trace_path),
            cancel: CancelToken::new(),
        }
    }

    /// Token for cancelling this task from the outside.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // run_task
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Drive one task end to end: main loop, summary pipeline, optional
    /// boxed-answer extraction. Never panics on provider or tool failure;
    /// the outcome's `trajectory.status` reports how the run ended.
    pub async fn run_task(&mut self, description: &str, file_path: Option<&str>) -> RunOutcome {
        self.tracer.set_status(TaskStatus::Running);
        self.tracer.log_step(
            "task_start",
            format!("Starting task: {description}"),
            StepStatus::Info,
        );
        self.tracer.save();

        // 1. Assemble the initial user message.
        let mut task_description = description.to_string();
        if let Some(file) = file_path {
            task_description.push_str(&format!(
                "\n\nThe task references an attached file at: {file}"
            ));
        }
        let mut initial_text = format!("{task_description}{}", prompts::main_task_guidance());

        if self.config.extraction.enable_hints {
            if let Some(client) = self.extraction_client.clone() {
                match with_cancel(&self.cancel, extraction::extract_hints(&client, &task_description))
                    .await
                {
                    Some(Ok(hints)) => {
                        self.tracer
                            .log_step("hints_extracted", "Preliminary notes added", StepStatus::Info);
                        initial_text.push_str(prompts::HINTS_PREFIX);
                        initial_text.push_str(&hints);
                    }
                    Some(Err(e)) => {
                        self.tracer.log_step(
                            "hints_extraction_failed",
                            format!("Hint extraction failed after retries: {e}"),
                            StepStatus::Warning,
                        );
                    }
                    None => {}
                }
            }
        }

        let mut history = History::new();
        history.append(Message::user(&initial_text));

        // 2. Tool catalog: main servers plus sub-agents exposed as tools.
        let mut tool_defs = self.main.tools.list_tools().await;
        tool_defs.extend(prompts::sub_agent_catalogs(
            self.sub_agents.iter().map(|(k, v)| (k, &v.profile)),
        ));
        self.tracer.log_step(
            "get_main_tool_definitions",
            format!(
                "{} servers, {} tools",
                tool_defs.len(),
                tool_defs.iter().map(|s| s.tools.len()).sum::<usize>()
            ),
            StepStatus::Info,
        );
        if tool_defs.iter().all(|s| s.tools.is_empty()) {
            self.tracer.log_step(
                "main_no_tools",
                "No tool definitions available; the model cannot use tools",
                StepStatus::Warning,
            );
        }

        // 3. System prompt.
        let spec = self.main.clone();
        let mut system_prompt = spec.client.system_prompt(today(), &tool_defs);
        system_prompt.push_str(&prompts::agent_specific_suffix("main"));
        system_prompt.push_str(&spec.profile.system_prompt_suffix);

        // 4. Main loop, then the summary pipeline.
        let end = self
            .run_loop(&spec, &system_prompt, &tool_defs, &mut history, &task_description)
            .await;
        self.tracer.trace_mut().main_turns = end.turns();

        let (mut final_summary, failed, interrupted) = match end {
            LoopEnd::Finished { failed, turns } => {
                self.tracer.log_step(
                    "main_loop_completed",
                    format!("Main loop completed after {turns} turns"),
                    StepStatus::Info,
                );
                match self
                    .summarize(&spec, &system_prompt, &tool_defs, &mut history, &task_description, failed)
                    .await
                {
                    Ok((text, failed)) => (text, failed, false),
                    Err(_) => (INTERRUPTED_TEXT.to_string(), true, true),
                }
            }
            LoopEnd::Interrupted { .. } => {
                self.tracer.log_step(
                    "main_loop_interrupted",
                    "Task cancelled during the main loop",
                    StepStatus::Warning,
                );
                let has_assistant = history
                    .messages()
                    .iter()
                    .any(|m| m.role == Role::Assistant);
                if has_assistant {
                    match self
                        .summarize(&spec, &system_prompt, &tool_defs, &mut history, &task_description, true)
                        .await
                    {
                        Ok((text, _)) => (text, true, true),
                        Err(_) => (INTERRUPTED_TEXT.to_string(), true, true),
                    }
                } else {
                    (INTERRUPTED_TEXT.to_string(), true, true)
                }
            }
        };

        // 5. Optional boxed-answer extraction.
        let mut boxed_answer = String::new();
        if !interrupted {
            if let Some(answer) = self
                .apply_boxed_extraction(&task_description, &mut final_summary, &mut history)
                .await
            {
                boxed_answer = answer;
            }
        }

        // 6. Finalize the trace.
        let status = if interrupted {
            TaskStatus::Interrupted
        } else if failed {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        self.tracer.set_status(status);
        self.tracer.set_final_boxed_answer(&boxed_answer);
        self.tracer.store_main_history(SessionTranscript {
            system_prompt,
            messages: history.messages().to_vec(),
        });
        let usage = self.total_usage();
        self.tracer.set_usage(usage);
        self.tracer.finish();
        self.tracer.log_step(
            "task_finished",
            format!("Task finished with status {status:?}"),
            match status {
                TaskStatus::Completed => StepStatus::Success,
                _ => StepStatus::Warning,
            },
        );
        self.tracer.save();

        RunOutcome {
            final_summary,
            boxed_answer,
            trajectory: self.tracer.trace().clone(),
            usage,
        }
    }

    /// After the main summary: classify the expected answer type, extract
    /// a `\boxed{…}` final answer, append it to summary and history.
    /// Returns the boxed content, or `None` on any failure.
    async fn apply_boxed_extraction(
        &mut self,
        task_description: &str,
        final_summary: &mut String,
        history: &mut History,
    ) -> Option<String> {
        if !self.config.extraction.enable_boxed_extraction {
            return None;
        }
        let client = self.extraction_client.clone()?;

        let answer_type = match with_cancel(
            &self.cancel,
            extraction::classify_answer_type(&client, task_description),
        )
        .await?
        {
            Ok(t) => t,
            Err(e) => {
                self.tracer.log_step(
                    "answer_type_classification_failed",
                    format!("Answer type classification failed: {e}"),
                    StepStatus::Warning,
                );
                return None;
            }
        };
        self.tracer.log_step(
            "answer_type_classified",
            format!("Expected answer type: {answer_type:?}"),
            StepStatus::Info,
        );

        let extraction_text = match with_cancel(
            &self.cancel,
            extraction::extract_boxed_answer(&client, answer_type, task_description, final_summary),
        )
        .await?
        {
            Ok(t) => t,
            Err(e) => {
                self.tracer.log_step(
                    "boxed_extraction_failed",
                    format!("Boxed answer extraction failed: {e}"),
                    StepStatus::Warning,
                );
                return None;
            }
        };

        let boxed = extraction::boxed_content(&extraction_text)?;
        history.append(Message::assistant(format!(
            "Extracted final answer:\n{extraction_text}"
        )));
        final_summary.push_str("\n\nExtracted Answer:\n");
        final_summary.push_str(&extraction_text);
        self.tracer.log_step(
            "boxed_answer_extracted",
            format!("Boxed answer: {boxed}"),
            StepStatus::Success,
        );
        Some(boxed)
    }

    /// Sum usage across all distinct clients (sub-agents may share the
    /// main client; shared clients count once).
    fn total_usage(&self) -> TokenUsage {
        let mut clients: Vec<Arc<dyn LlmClient>> = vec![self.main.client.clone()];
        for spec in self.sub_agents.values() {
            if !clients.iter().any(|c| Arc::ptr_eq(c, &spec.client)) {
                clients.push(spec.client.clone());
            }
        }
        if let Some(extra) = &self.extraction_client {
            if !clients.iter().any(|c| Arc::ptr_eq(c, extra)) {
                clients.push(extra.clone());
            }
        }

        let mut total = TokenUsage::default();
        for client in clients {
            total.add(&client.usage());
        }
        total
    }
}

pub(crate) fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
