//! Message history management.
//!
//! An append-only transcript with three policy operations the agent loop
//! relies on: keep-tool-result compaction, rollback of the most recent
//! assistant/user pair, and system-message insertion on outgoing copies.
//! All transforms here are synchronous and allocation-cheap; nothing in
//! this crate performs I/O.

use serde::{Deserialize, Serialize};

use mf_domain::tool::{Message, Role};

/// Placeholder written over compacted tool results. Kept byte-for-byte
/// stable so prompt caches survive compaction.
pub const OMITTED_TOOL_RESULT: &str = "Tool result is omitted to save tokens.";

/// The canonical transcript of one agent session.
///
/// The system prompt is *not* part of the canonical history — providers
/// insert it into their outgoing copy at send time. The first entry is
/// therefore always the task's user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|m| m.role)
    }

    /// Pop the last message iff it is a user message.
    pub fn pop_if_user(&mut self) -> Option<Message> {
        if self.last_role() == Some(Role::User) {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Remove the most recent assistant/user exchange.
    ///
    /// The tool-result half of an exchange is either one merged `user`
    /// message (inline dialect) or a run of `tool` messages (structured
    /// dialect); both count as the "user" side here. After removing it,
    /// a trailing `assistant` message is removed too. Returns `true` iff
    /// at least one entry was removed.
    ///
    /// Applied to a well-formed transcript the result is still well-formed
    /// and ends on a user message, so the next LLM call has a valid prefix.
    pub fn rollback_last_pair(&mut self) -> bool {
        let mut removed = false;
        if self.last_role() == Some(Role::User) {
            self.messages.pop();
            removed = true;
        } else {
            while self.last_role() == Some(Role::Tool) {
                self.messages.pop();
                removed = true;
            }
        }
        if self.last_role() == Some(Role::Assistant) {
            self.messages.pop();
            removed = true;
        }
        removed
    }

    /// Copy of the transcript with stale tool results blanked out.
    ///
    /// `keep` is the keep-tool-result knob: `-1` returns the transcript
    /// unchanged; otherwise the *first* user/tool message (the task) is
    /// always retained verbatim along with the last `keep` user/tool
    /// messages, and every other user/tool message has its content
    /// replaced by [`OMITTED_TOOL_RESULT`]. Message count and ordering
    /// are unchanged.
    pub fn compacted(&self, keep: i64) -> Vec<Message> {
        let mut copy = self.messages.clone();
        if keep < 0 {
            return copy;
        }

        let carrier_indices: Vec<usize> = copy
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m.role, Role::User | Role::Tool))
            .map(|(i, _)| i)
            .collect();

        if carrier_indices.len() <= 1 {
            return copy;
        }

        let num_to_keep = if keep == 0 {
            0
        } else {
            (keep as usize).min(carrier_indices.len() - 1)
        };

        let mut keep_set: Vec<usize> = vec![carrier_indices[0]];
        if num_to_keep > 0 {
            keep_set.extend_from_slice(&carrier_indices[carrier_indices.len() - num_to_keep..]);
        }

        for &i in &carrier_indices {
            if !keep_set.contains(&i) {
                copy[i].set_text(OMITTED_TOOL_RESULT);
            }
        }

        copy
    }
}

/// Insert or replace the system message at the head of an outgoing copy.
/// Applied by providers at send time; never persisted to the canonical
/// history.
pub fn prepend_or_replace_system(messages: &mut Vec<Message>, prompt: &str) {
    if prompt.is_empty() {
        return;
    }
    match messages.first() {
        Some(m) if m.role == Role::System => {
            messages[0].set_text(prompt);
        }
        _ => {
            messages.insert(0, Message::system(prompt));
        }
    }
}

/// Deterministic token estimate for headroom checks.
///
/// Blends a chars/4 baseline with a word count floor so that long runs of
/// short tokens (code, CJK, URLs) are not wildly underestimated. Never
/// used for billing.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as u64;
    let words = text.split_whitespace().count() as u64;
    (chars / 4).max(words.div_ceil(4) * 3).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::tool::Message;

    fn exchange() -> History {
        let mut h = History::new();
        h.append(Message::user("task"));
        h.append(Message::assistant("calling a tool"));
        h.append(Message::user("tool result 1"));
        h.append(Message::assistant("calling again"));
        h.append(Message::user("tool result 2"));
        h.append(Message::assistant("one more"));
        h.append(Message::user("tool result 3"));
        h
    }

    // ── compacted ──────────────────────────────────────────────────

    #[test]
    fn compact_minus_one_is_identity() {
        let h = exchange();
        let c = h.compacted(-1);
        assert_eq!(c.len(), h.len());
        for (a, b) in c.iter().zip(h.messages()) {
            assert_eq!(a.content.all_text(), b.content.all_text());
        }
    }

    #[test]
    fn compact_zero_keeps_only_first_carrier() {
        let h = exchange();
        let c = h.compacted(0);
        assert_eq!(c[0].content.all_text(), "task");
        assert_eq!(c[2].content.all_text(), OMITTED_TOOL_RESULT);
        assert_eq!(c[4].content.all_text(), OMITTED_TOOL_RESULT);
        assert_eq!(c[6].content.all_text(), OMITTED_TOOL_RESULT);
        // Assistant messages untouched.
        assert_eq!(c[1].content.all_text(), "calling a tool");
    }

    #[test]
    fn compact_keeps_first_and_last_k() {
        let h = exchange();
        let c = h.compacted(2);
        assert_eq!(c[0].content.all_text(), "task");
        assert_eq!(c[2].content.all_text(), OMITTED_TOOL_RESULT);
        assert_eq!(c[4].content.all_text(), "tool result 2");
        assert_eq!(c[6].content.all_text(), "tool result 3");
    }

    #[test]
    fn compact_preserves_count_and_order() {
        let h = exchange();
        for k in [-1, 0, 1, 2, 10] {
            let c = h.compacted(k);
            assert_eq!(c.len(), h.len(), "k={k}");
            for (a, b) in c.iter().zip(h.messages()) {
                assert_eq!(a.role, b.role, "k={k}");
            }
        }
    }

    #[test]
    fn compact_large_k_is_identity_on_carriers() {
        let h = exchange();
        let c = h.compacted(100);
        for (a, b) in c.iter().zip(h.messages()) {
            assert_eq!(a.content.all_text(), b.content.all_text());
        }
    }

    #[test]
    fn compact_single_user_message_untouched() {
        let mut h = History::new();
        h.append(Message::user("only the task"));
        let c = h.compacted(0);
        assert_eq!(c[0].content.all_text(), "only the task");
    }

    #[test]
    fn compact_counts_tool_role_as_carrier() {
        let mut h = History::new();
        h.append(Message::user("task"));
        h.append(Message::assistant("call"));
        h.append(Message::tool_result("t1", "res 1"));
        h.append(Message::assistant("call"));
        h.append(Message::tool_result("t2", "res 2"));
        let c = h.compacted(1);
        assert_eq!(c[2].content.all_text(), OMITTED_TOOL_RESULT);
        assert_eq!(c[4].content.all_text(), "res 2");
        // Tool metadata survives compaction.
        assert_eq!(c[2].tool_call_id.as_deref(), Some("t1"));
    }

    // ── rollback_last_pair ─────────────────────────────────────────

    #[test]
    fn rollback_removes_trailing_user_and_assistant() {
        let mut h = exchange();
        let before = h.len();
        assert!(h.rollback_last_pair());
        assert_eq!(h.len(), before - 2);
        assert_eq!(h.last_role(), Some(Role::User));
    }

    #[test]
    fn rollback_on_assistant_tail_removes_one() {
        let mut h = History::new();
        h.append(Message::user("task"));
        h.append(Message::assistant("answer"));
        assert!(h.rollback_last_pair());
        assert_eq!(h.len(), 1);
        assert_eq!(h.last_role(), Some(Role::User));
    }

    #[test]
    fn rollback_on_user_only_history() {
        let mut h = History::new();
        h.append(Message::user("task"));
        assert!(h.rollback_last_pair());
        assert!(h.is_empty());
    }

    #[test]
    fn rollback_on_empty_is_noop() {
        let mut h = History::new();
        assert!(!h.rollback_last_pair());
    }

    #[test]
    fn rollback_removes_whole_tool_run() {
        let mut h = History::new();
        h.append(Message::user("task"));
        h.append(Message::assistant("calls"));
        h.append(Message::tool_result("t1", "r1"));
        h.append(Message::tool_result("t2", "r2"));
        assert!(h.rollback_last_pair());
        assert_eq!(h.len(), 1);
        assert_eq!(h.last_role(), Some(Role::User));
    }

    #[test]
    fn rollback_length_decreases_by_at_most_two() {
        for build in [0usize, 1, 2, 3, 4, 5] {
            let mut h = History::new();
            for i in 0..build {
                if i % 2 == 0 {
                    h.append(Message::user("u"));
                } else {
                    h.append(Message::assistant("a"));
                }
            }
            let before = h.len();
            h.rollback_last_pair();
            let delta = before - h.len();
            assert!(delta <= 2, "delta={delta} for build={build}");
        }
    }

    // ── prepend_or_replace_system ──────────────────────────────────

    #[test]
    fn system_inserted_at_head() {
        let mut msgs = vec![Message::user("task")];
        prepend_or_replace_system(&mut msgs, "be helpful");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content.all_text(), "be helpful");
    }

    #[test]
    fn existing_system_replaced_not_duplicated() {
        let mut msgs = vec![Message::system("old"), Message::user("task")];
        prepend_or_replace_system(&mut msgs, "new");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content.all_text(), "new");
    }

    #[test]
    fn empty_prompt_is_noop() {
        let mut msgs = vec![Message::user("task")];
        prepend_or_replace_system(&mut msgs, "");
        assert_eq!(msgs.len(), 1);
    }

    // ── estimate_tokens ────────────────────────────────────────────

    #[test]
    fn estimate_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_is_deterministic_and_monotone_ish() {
        let short = estimate_tokens("hello world");
        let long = estimate_tokens(&"hello world ".repeat(100));
        assert!(short >= 1);
        assert!(long > short * 50);
        assert_eq!(estimate_tokens("hello world"), short);
    }

    #[test]
    fn estimate_roughly_four_chars_per_token() {
        let text = "a".repeat(4000);
        let est = estimate_tokens(&text);
        assert!((900..=1100).contains(&est), "est={est}");
    }
}
