//! The agent loop — the bounded turn loop shared by the main agent and
//! every sub-agent session, plus the sub-agent entry point.

use futures_util::future::BoxFuture;

use mf_domain::error::Error;
use mf_domain::tool::{Message, ServerTools, ToolResult};
use mf_domain::trace::{SessionTranscript, StepStatus};
use mf_history::History;

use crate::cancel::with_cancel;
use crate::prompts;
use crate::run::{today, Orchestrator, SessionSpec};

/// How a loop ended. `turns` counts completed loop iterations (summary
/// calls are not turns).
#[derive(Debug, Clone, Copy)]
pub(crate) enum LoopEnd {
    Finished { failed: bool, turns: u64 },
    Interrupted { turns: u64 },
}

impl LoopEnd {
    pub fn turns(&self) -> u64 {
        match self {
            LoopEnd::Finished { turns, .. } | LoopEnd::Interrupted { turns } => *turns,
        }
    }
}

impl Orchestrator {
    /// One agent session's turn loop.
    ///
    /// Within a session everything is strictly sequential: no new LLM call
    /// is issued until the previous turn's tool results are merged into
    /// the history. The only exits are: terminal answer, turn limit,
    /// unrecoverable LLM failure, context overflow (after rolling back the
    /// last exchange), or cancellation.
    pub(crate) async fn run_loop(
        &mut self,
        spec: &SessionSpec,
        system_prompt: &str,
        tool_defs: &[ServerTools],
        history: &mut History,
        task_description: &str,
    ) -> LoopEnd {
        let max_turns = spec.profile.turn_limit();
        let keep_tool_result = spec.profile.keep_tool_result;
        let mut turn: u64 = 0;
        let mut failed = false;

        loop {
            if self.cancel.is_cancelled() {
                return LoopEnd::Interrupted { turns: turn };
            }

            turn += 1;
            if turn > max_turns {
                failed = true;
                self.tracer.log_step(
                    format!("{}_max_turns_reached", spec.name),
                    format!("Reached maximum turns ({max_turns})"),
                    StepStatus::Warning,
                );
                turn = max_turns;
                break;
            }

            tracing::debug!(agent = %spec.name, turn, "agent turn");
            self.snapshot_history(spec, system_prompt, history);
            self.tracer.save();

            // ── LLM call ───────────────────────────────────────────
            let send = spec
                .client
                .send_request(system_prompt, history, tool_defs, keep_tool_result);
            let response = match with_cancel(&self.cancel, send).await {
                None => return LoopEnd::Interrupted { turns: turn },
                Some(Ok(response)) => response,
                Some(Err(Error::Cancelled)) => return LoopEnd::Interrupted { turns: turn },
                Some(Err(Error::ContextLimit(msg))) => {
                    self.tracer.log_step(
                        format!("{}_context_limit_reached", spec.name),
                        format!("Context limit reached, jumping to summary: {msg}"),
                        StepStatus::Warning,
                    );
                    failed = true;
                    break;
                }
                Some(Err(e)) => {
                    self.tracer.log_step(
                        format!("{}_llm_call_failed", spec.name),
                        format!("LLM call failed: {e}"),
                        StepStatus::Failed,
                    );
                    failed = true;
                    break;
                }
            };

            // ── Response handling ──────────────────────────────────
            let (assistant_text, should_break) = match spec.client.parse_response(&response, history)
            {
                Ok(pair) => pair,
                Err(Error::ContextLimit(msg)) => {
                    self.tracer.log_step(
                        format!("{}_context_limit_reached", spec.name),
                        format!("Context limit reached, jumping to summary: {msg}"),
                        StepStatus::Warning,
                    );
                    failed = true;
                    break;
                }
                Err(e) => {
                    self.tracer.log_step(
                        format!("{}_response_rejected", spec.name),
                        format!("Response could not be processed: {e}"),
                        StepStatus::Failed,
                    );
                    failed = true;
                    break;
                }
            };
            self.snapshot_history(spec, system_prompt, history);

            if assistant_text.is_empty() {
                self.tracer.log_step(
                    format!("{}_llm_call_failed", spec.name),
                    "LLM returned no valid response",
                    StepStatus::Failed,
                );
                failed = true;
                break;
            }
            if should_break {
                self.tracer.log_step(
                    format!("{}_early_termination", spec.name),
                    format!("Agent terminated early on turn {turn}"),
                    StepStatus::Info,
                );
                break;
            }

            // ── Tool calls ─────────────────────────────────────────
            let (good, bad) = spec.client.extract_tool_calls(&response, &assistant_text);
            if good.is_empty() && bad.is_empty() {
                // Terminal answer.
                self.tracer.log_step(
                    format!("{}_no_tool_calls", spec.name),
                    format!("No tool calls found, ending on turn {turn}"),
                    StepStatus::Info,
                );
                break;
            }

            let (outcomes, truncated) = match self.dispatch_tool_calls(spec, good, bad).await {
                Ok(pair) => pair,
                Err(_) => return LoopEnd::Interrupted { turns: turn },
            };
            spec.client
                .update_history_with_tools(history, &outcomes, truncated);
            self.snapshot_history(spec, system_prompt, history);

            // ── Headroom guard ─────────────────────────────────────
            // Worst-case the summary call (task assumed failed, its prompt
            // is the longer one) and bail out early so the summary still
            // fits after dropping the freshest exchange.
            let probe = prompts::summarize_prompt(task_description, true, spec.is_main());
            if !spec.client.context_headroom(history, &probe) {
                history.rollback_last_pair();
                failed = true;
                self.tracer.log_step(
                    format!("{}_context_limit_reached", spec.name),
                    "Context limit reached, triggering summary",
                    StepStatus::Warning,
                );
                break;
            }
        }

        LoopEnd::Finished {
            failed,
            turns: turn,
        }
    }

    /// Run a sub-agent session to completion and return its final summary
    /// (the parent's tool result). Boxed so the parent loop can recurse
    /// through the dispatcher.
    pub(crate) fn run_sub_agent<'a>(
        &'a mut self,
        server_name: &'a str,
        subtask: String,
    ) -> BoxFuture<'a, mf_domain::Result<String>> {
        Box::pin(async move {
            let Some(spec) = self.sub_agents.get(server_name).cloned() else {
                return Ok(
                    ToolResult::Error(format!("Sub-agent '{server_name}' is not configured."))
                        .for_model(),
                );
            };

            let task_description = format!("{subtask}{}", prompts::SUBTASK_SUFFIX);
            let session_id = self
                .tracer
                .start_sub_agent_session(server_name, &task_description);

            let mut history = History::new();
            history.append(Message::user(&task_description));

            let tool_defs = spec.tools.list_tools().await;
            if tool_defs.iter().all(|s| s.tools.is_empty()) {
                self.tracer.log_step(
                    format!("{server_name}_no_tools"),
                    format!("No tool definitions available for {server_name}"),
                    StepStatus::Warning,
                );
            }

            let mut system_prompt = spec.client.system_prompt(today(), &tool_defs);
            system_prompt.push_str(&prompts::agent_specific_suffix(server_name));
            system_prompt.push_str(&spec.profile.system_prompt_suffix);

            let end = self
                .run_loop(&spec, &system_prompt, &tool_defs, &mut history, &task_description)
                .await;

            let failed = match end {
                LoopEnd::Finished { failed, .. } => failed,
                LoopEnd::Interrupted { .. } => {
                    self.store_sub_snapshot(&session_id, &system_prompt, &history);
                    self.tracer.end_sub_agent_session(server_name);
                    return Err(Error::Cancelled);
                }
            };

            self.tracer.log_step(
                format!("{server_name}_final_summary"),
                format!("Generating {server_name} final summary"),
                StepStatus::Info,
            );

            let summary = self
                .summarize(&spec, &system_prompt, &tool_defs, &mut history, &task_description, failed)
                .await;

            self.store_sub_snapshot(&session_id, &system_prompt, &history);
            self.tracer.save();
            self.tracer.end_sub_agent_session(server_name);

            match summary {
                Ok((text, _)) => Ok(text),
                Err(e) => Err(e),
            }
        })
    }

    /// Keep the tracer's copy of the session transcript current.
    pub(crate) fn snapshot_history(
        &mut self,
        spec: &SessionSpec,
        system_prompt: &str,
        history: &History,
    ) {
        let transcript = SessionTranscript {
            system_prompt: system_prompt.to_string(),
            messages: history.messages().to_vec(),
        };
        if spec.is_main() {
            self.tracer.store_main_history(transcript);
        } else if let Some(session_id) = self.tracer.current_sub_session().map(str::to_string) {
            self.tracer.store_sub_history(&session_id, transcript);
        }
    }

    fn store_sub_snapshot(&mut self, session_id: &str, system_prompt: &str, history: &History) {
        self.tracer.store_sub_history(
            session_id,
            SessionTranscript {
                system_prompt: system_prompt.to_string(),
                messages: history.messages().to_vec(),
            },
        );
    }
}
