//! Task tracer — append-only step log plus periodic atomic snapshots of
//! the full task state.
//!
//! The orchestrator owns the tracer; the tracer never calls back. `save()`
//! is invoked from paths that must not fail (including teardown), so any
//! I/O error is logged and swallowed.

use std::path::PathBuf;

use chrono::Utc;

use mf_domain::trace::{SessionTranscript, StepRecord, StepStatus, TaskStatus, TaskTrace};

pub struct TaskTracer {
    trace: TaskTrace,
    /// Snapshot destination; `None` keeps the trace in memory only.
    path: Option<PathBuf>,
}

impl TaskTracer {
    pub fn new(task_id: impl Into<String>, task_file: Option<String>, path: Option<PathBuf>) -> Self {
        Self {
            trace: TaskTrace::new(task_id, task_file),
            path,
        }
    }

    pub fn trace(&self) -> &TaskTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TaskTrace {
        &mut self.trace
    }

    pub fn into_trace(self) -> TaskTrace {
        self.trace
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.trace.status = status;
    }

    pub fn status(&self) -> TaskStatus {
        self.trace.status
    }

    pub fn set_final_boxed_answer(&mut self, answer: impl Into<String>) {
        self.trace.final_boxed_answer = answer.into();
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.trace.error = error.into();
    }

    pub fn set_usage(&mut self, usage: mf_domain::usage::TokenUsage) {
        self.trace.usage = usage;
    }

    pub fn finish(&mut self) {
        self.trace.end_time = Utc::now();
    }

    // ── Step log ───────────────────────────────────────────────────

    pub fn log_step(
        &mut self,
        step_name: impl Into<String>,
        message: impl Into<String>,
        status: StepStatus,
    ) {
        self.log_step_meta(step_name, message, status, serde_json::Map::new());
    }

    pub fn log_step_meta(
        &mut self,
        step_name: impl Into<String>,
        message: impl Into<String>,
        status: StepStatus,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let step_name = step_name.into();
        let message = message.into();
        tracing::debug!(step = %step_name, status = ?status, "{message}");
        self.trace.step_logs.push(StepRecord {
            step_name,
            message,
            timestamp: Utc::now(),
            status,
            metadata,
        });
    }

    // ── Session bookkeeping ────────────────────────────────────────

    /// Open a sub-agent session; ids are `<agent-name>_<n>` with a
    /// strictly increasing counter. Concurrent sub-agent sessions are
    /// disallowed by design — the previous session must have ended.
    pub fn start_sub_agent_session(&mut self, agent_name: &str, subtask: &str) -> String {
        debug_assert!(
            self.trace.current_sub_session.is_none(),
            "sub-agent sessions must not overlap"
        );
        self.trace.sub_agent_counter += 1;
        let session_id = format!("{agent_name}_{}", self.trace.sub_agent_counter);
        self.trace.current_sub_session = Some(session_id.clone());

        let preview: String = subtask.chars().take(100).collect();
        let mut meta = serde_json::Map::new();
        meta.insert("session_id".into(), serde_json::json!(session_id));
        meta.insert("subtask".into(), serde_json::json!(subtask));
        self.log_step_meta(
            format!("sub_{agent_name}_session_start"),
            format!(
                "Starting {session_id} for subtask: {preview}{}",
                if subtask.chars().count() > 100 { "..." } else { "" }
            ),
            StepStatus::Info,
            meta,
        );

        session_id
    }

    pub fn end_sub_agent_session(&mut self, agent_name: &str) {
        let session_id = self.trace.current_sub_session.take();
        let mut meta = serde_json::Map::new();
        meta.insert("session_id".into(), serde_json::json!(session_id));
        self.log_step_meta(
            format!("sub_{agent_name}_session_end"),
            format!("Ending {}", session_id.as_deref().unwrap_or("<none>")),
            StepStatus::Success,
            meta,
        );
    }

    pub fn current_sub_session(&self) -> Option<&str> {
        self.trace.current_sub_session.as_deref()
    }

    pub fn store_main_history(&mut self, transcript: SessionTranscript) {
        self.trace.main_history = transcript;
    }

    /// Store a sub-session transcript under the currently open session id
    /// (or an explicit id when the session already ended).
    pub fn store_sub_history(&mut self, session_id: &str, transcript: SessionTranscript) {
        self.trace
            .sub_sessions
            .insert(session_id.to_string(), transcript);
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Atomically snapshot the trace to disk. Idempotent and infallible by
    /// contract: failures are logged to the runtime logger and swallowed.
    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.try_save(path) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist task trace");
        }
    }

    fn try_save(&self, path: &PathBuf) -> std::io::Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(&self.trace)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        std::fs::write(tmp.path(), json)?;
        tmp.persist(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::tool::Message;

    #[test]
    fn session_ids_increase_monotonically() {
        let mut tracer = TaskTracer::new("t", None, None);
        let a = tracer.start_sub_agent_session("agent-browsing", "find X");
        assert_eq!(a, "agent-browsing_1");
        tracer.end_sub_agent_session("agent-browsing");
        let b = tracer.start_sub_agent_session("agent-coding", "compute Y");
        assert_eq!(b, "agent-coding_2");
        tracer.end_sub_agent_session("agent-coding");
        assert_eq!(tracer.trace().sub_agent_counter, 2);
        assert!(tracer.current_sub_session().is_none());
    }

    #[test]
    fn step_log_is_append_only() {
        let mut tracer = TaskTracer::new("t", None, None);
        tracer.log_step("a", "first", StepStatus::Info);
        tracer.log_step("b", "second", StepStatus::Warning);
        let names: Vec<&str> = tracer
            .trace()
            .step_logs
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        // Step names recorded in order.
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn save_writes_valid_json_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        let mut tracer = TaskTracer::new("task-9", None, Some(path.clone()));
        tracer.set_status(TaskStatus::Running);
        tracer.store_main_history(SessionTranscript {
            system_prompt: "sp".into(),
            messages: vec![Message::user("hello")],
        });
        tracer.save();
        tracer.save(); // idempotent

        let text = std::fs::read_to_string(&path).unwrap();
        let trace: TaskTrace = serde_json::from_str(&text).unwrap();
        assert_eq!(trace.task_id, "task-9");
        assert_eq!(trace.status, TaskStatus::Running);
        assert_eq!(trace.main_history.messages.len(), 1);
    }

    #[test]
    fn save_with_unwritable_path_does_not_panic() {
        let tracer = TaskTracer::new(
            "t",
            None,
            Some(PathBuf::from("/dev/null/not-a-dir/trace.json")),
        );
        tracer.save();
    }

    #[test]
    fn save_without_path_is_noop() {
        let tracer = TaskTracer::new("t", None, None);
        tracer.save();
    }
}
