//! Summary pipeline — the unconditional final LLM call, with
//! rollback-on-overflow retry semantics.

use mf_domain::error::{Error, Result};
use mf_domain::tool::{Message, ServerTools};
use mf_domain::trace::StepStatus;
use mf_history::History;

use crate::cancel::with_cancel;
use crate::prompts;
use crate::run::{Orchestrator, SessionSpec};

/// Returned when the summary cannot be produced even from the bare initial
/// exchange.
pub const SUMMARY_FAILURE_TEXT: &str = "Unable to generate final summary due to persistent \
                                        network issues. You should try again.";

/// Returned when cancellation lands before any summarizable progress.
pub const INTERRUPTED_TEXT: &str = "Task was interrupted before an answer could be produced. \
                                    You should try again.";

impl Orchestrator {
    /// Produce the session's final summary.
    ///
    /// Each attempt appends the (dialect-merged) summary prompt and calls
    /// the provider. On failure or context overflow the prompt is popped,
    /// the most recent assistant/user pair rolled back, the task marked
    /// failed, and the attempt repeated — until only the initial user
    /// message remains, at which point a canned error string is returned.
    ///
    /// Returns `(summary_text, task_failed)`; `Err` is cancellation only.
    pub(crate) async fn summarize(
        &mut self,
        spec: &SessionSpec,
        system_prompt: &str,
        tool_defs: &[ServerTools],
        history: &mut History,
        task_description: &str,
        mut task_failed: bool,
    ) -> Result<(String, bool)> {
        let mut retry_count = 0u32;

        loop {
            let prompt = prompts::summarize_prompt(task_description, task_failed, spec.is_main());
            let merged = spec.client.merge_summary_prompt(history, &prompt);
            history.append(Message::user(merged));

            let send = spec.client.send_request(
                system_prompt,
                history,
                tool_defs,
                spec.profile.keep_tool_result,
            );
            let text = match with_cancel(&self.cancel, send).await {
                None => return Err(Error::Cancelled),
                Some(Err(Error::Cancelled)) => return Err(Error::Cancelled),
                Some(Ok(response)) => match spec.client.parse_response(&response, history) {
                    Ok((text, _)) => text,
                    Err(e) => {
                        tracing::debug!(error = %e, "summary response rejected");
                        String::new()
                    }
                },
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "summary call failed");
                    String::new()
                }
            };

            if !text.is_empty() {
                self.tracer.log_step(
                    format!("{}_final_summary_success", spec.name),
                    "Final summary generated",
                    StepStatus::Success,
                );
                self.snapshot_history(spec, system_prompt, history);
                return Ok((text, task_failed));
            }

            // Failed attempt: drop the summary prompt we just added, then
            // trade the freshest exchange for headroom and try again.
            retry_count += 1;
            history.pop_if_user();
            history.rollback_last_pair();
            task_failed = true;

            if history.len() <= 1 {
                self.tracer.log_step(
                    format!("{}_final_summary_failed", spec.name),
                    "Summary failed after removing all removable messages",
                    StepStatus::Failed,
                );
                return Ok((SUMMARY_FAILURE_TEXT.to_string(), true));
            }

            self.tracer.log_step(
                format!("{}_summary_context_retry", spec.name),
                format!(
                    "Removed assistant-user pair, retry {retry_count}, task marked as failed"
                ),
                StepStatus::Warning,
            );
        }
    }
}
