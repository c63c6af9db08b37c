//! Tool-call dispatch — caps per-turn fan-out, executes calls in document
//! order (strictly sequential), recurses into sub-agents, and converts
//! every failure into a result the model can see and react to.

use std::time::Instant;

use mf_domain::error::{Error, Result};
use mf_domain::tool::{BadToolCall, DispatchOutcome, ToolCall, ToolResult};
use mf_domain::trace::StepStatus;

use crate::cancel::with_cancel;
use crate::run::{Orchestrator, SessionSpec};

/// Result text for calls dropped by the fan-out cap (structured dialect
/// transcripts still need one entry per call).
const SKIPPED_TEXT: &str =
    "Tool call skipped: too many tool calls in this turn, raise fewer per reply.";

fn retry_instruction(error: &str) -> String {
    format!(
        "Your tool call format was incorrect, and the tool invocation failed, \
         error_message: {error}; please review it carefully and try calling again."
    )
}

impl Orchestrator {
    /// Execute one turn's tool calls.
    ///
    /// Returns the per-call outcomes (in document order: executed, then
    /// skipped, then the parse-failure entry) and whether the fan-out cap
    /// truncated the batch. `Err` is cancellation only.
    pub(crate) async fn dispatch_tool_calls(
        &mut self,
        spec: &SessionSpec,
        good: Vec<ToolCall>,
        bad: Vec<BadToolCall>,
    ) -> Result<(Vec<DispatchOutcome>, bool)> {
        let cap = spec.profile.max_tool_calls_per_turn;
        let truncated = good.len() > cap;
        if truncated {
            self.tracer.log_step(
                format!("{}_tool_calls_truncated", spec.name),
                format!(
                    "Turn requested {} tool calls, processing only the first {cap}",
                    good.len()
                ),
                StepStatus::Warning,
            );
        }

        let mut outcomes = Vec::with_capacity(good.len() + 1);

        for (index, call) in good.into_iter().enumerate() {
            if index >= cap {
                outcomes.push(DispatchOutcome::skipped(call.id, SKIPPED_TEXT.to_string()));
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let text = if call.server_name.starts_with("agent-") {
                self.dispatch_sub_agent(&call).await?
            } else {
                self.dispatch_server_tool(spec, &call).await?
            };
            outcomes.push(DispatchOutcome::executed(call.id, text));
        }

        // Each bad parse collapses into a single retry instruction built
        // from the first error (the model fixes them all at once).
        if let Some(first) = bad.first() {
            self.tracer.log_step(
                format!("{}_tool_call_parse_error", spec.name),
                format!("{} malformed tool calls: {}", bad.len(), first.error),
                StepStatus::Warning,
            );
            outcomes.push(DispatchOutcome::failed_parse(retry_instruction(&first.error)));
        }

        Ok((outcomes, truncated))
    }

    async fn dispatch_sub_agent(&mut self, call: &ToolCall) -> Result<String> {
        let Some(subtask) = call.arguments.get("subtask").and_then(|v| v.as_str()) else {
            return Ok(
                ToolResult::Error("missing required argument: subtask".into()).for_model(),
            );
        };
        self.run_sub_agent(&call.server_name, subtask.to_string())
            .await
    }

    async fn dispatch_server_tool(
        &mut self,
        spec: &SessionSpec,
        call: &ToolCall,
    ) -> Result<String> {
        self.tracer.log_step(
            format!("{}_tool_call_start", spec.name),
            format!("Executing {} on {}", call.tool_name, call.server_name),
            StepStatus::Info,
        );

        let started = Instant::now();
        let invocation =
            spec.tools
                .call_tool(&call.server_name, &call.tool_name, call.arguments.clone());

        let result = match with_cancel(&self.cancel, invocation).await {
            None => return Err(Error::Cancelled),
            Some(Ok(result)) => {
                self.tracer.log_step(
                    format!("{}_tool_call_success", spec.name),
                    format!(
                        "Tool {} executed in {}ms",
                        call.tool_name,
                        started.elapsed().as_millis()
                    ),
                    StepStatus::Info,
                );
                result
            }
            Some(Err(Error::Cancelled)) => return Err(Error::Cancelled),
            Some(Err(Error::Timeout(_))) => {
                self.tracer.log_step(
                    format!("{}_tool_call_timeout", spec.name),
                    format!("Tool {} timed out", call.tool_name),
                    StepStatus::Failed,
                );
                ToolResult::Error("Tool execution timeout".into())
            }
            Some(Err(e)) => {
                self.tracer.log_step(
                    format!("{}_tool_call_error", spec.name),
                    format!("Tool {} failed: {e}", call.tool_name),
                    StepStatus::Failed,
                );
                ToolResult::Error(e.to_string())
            }
        };

        Ok(result.for_model())
    }
}
