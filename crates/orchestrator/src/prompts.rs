//! Prompt text assembled by the orchestrator: task guidance, per-agent
//! system-prompt suffixes, summarize prompts, and the catalog entries that
//! present sub-agents as tools.

use mf_domain::config::AgentProfile;
use mf_domain::tool::{ServerTools, ToolDefinition};

/// Suffix appended to every subtask handed to a sub-agent.
pub const SUBTASK_SUFFIX: &str = "\n\nPlease provide the answer and detailed supporting \
                                  information of the subtask given to you.";

/// Guidance appended to the main agent's initial user message. Pushes the
/// agent toward complete evidence gathering instead of premature answers.
pub fn main_task_guidance() -> &'static str {
    "\n\nYour task is to comprehensively address the question by actively collecting \
     detailed information, and generating a thorough, transparent report. Your goal is \
     NOT to rush a single definitive answer, but rather to gather complete information \
     and present ALL plausible candidate answers you find, accompanied by clearly \
     documented supporting evidence, reasoning steps, uncertainties, and explicit \
     intermediate findings.\n\n\
     The user does not intend to set traps or create confusion on purpose. Handle the \
     task using the most common, reasonable, and straightforward interpretation, and do \
     not overthink or focus on rare or far-fetched interpretations.\n\n\
     Important considerations:\n\
     - Collect comprehensive information from reliable sources to understand all aspects \
     of the question.\n\
     - Present every possible candidate answer identified during your information \
     gathering, regardless of uncertainty, ambiguity, or incomplete verification.\n\
     - Explicitly document detailed facts, evidence, and reasoning steps supporting each \
     candidate answer, carefully preserving intermediate analysis results.\n\
     - Clearly flag and retain any uncertainties, conflicting interpretations, or \
     alternative understandings identified during information gathering. Do not \
     arbitrarily discard or resolve these issues on your own.\n\
     - If the question's explicit instructions (numeric precision, formatting, specific \
     requirements) appear inconsistent, unclear, or erroneous, explicitly record and \
     present all plausible interpretations and corresponding candidate answers.\n\n\
     Recognize that the original task description might itself contain mistakes or \
     imprecision introduced unintentionally. Do NOT try to second-guess or \"correct\" \
     these instructions internally; instead, transparently present findings according \
     to every plausible interpretation."
}

/// Preface inserted before model-generated hints on the initial message.
pub const HINTS_PREFIX: &str = "\n\nBefore you begin, please review the following \
    preliminary notes highlighting subtle or easily misunderstood points in the \
    question, which might help you avoid common pitfalls during your analysis (for \
    reference only; these may not be exhaustive):\n\n";

/// Agent-specific system prompt suffix, appended after the dialect's base
/// prompt and before any configured per-profile suffix.
pub fn agent_specific_suffix(agent_name: &str) -> String {
    if agent_name == "main" {
        "\n\nYou are the main agent. Break the task into subtasks, delegate focused \
         subtasks to the available sub-agent tools when they fit, verify intermediate \
         results, and keep an explicit record of evidence for every candidate answer."
            .to_string()
    } else {
        format!(
            "\n\nYou are the {agent_name} specialist agent. Solve exactly the subtask \
             you were given, document the evidence behind your answer, and reply with \
             the answer plus the key supporting details. Do not expand the scope of \
             the subtask."
        )
    }
}

/// The summary request appended as the final user message of a session.
pub fn summarize_prompt(task_description: &str, task_failed: bool, is_main: bool) -> String {
    let role_frame = if is_main {
        "The task given to you was:\n\n"
    } else {
        "The subtask given to you was:\n\n"
    };

    let outcome_frame = if task_failed {
        "\n\nThe conversation above was interrupted before the task could be fully \
         completed, so parts of the evidence may be missing. Summarize everything that \
         was established so far, state clearly which parts remain uncertain or \
         unverified, and provide the best answer (or best educated guess) the collected \
         evidence supports."
    } else {
        "\n\nThe conversation above has gathered the information needed to answer. \
         Summarize the investigation: the key evidence found, the reasoning steps, any \
         remaining uncertainties, and every plausible candidate answer that surfaced."
    };

    let answer_frame = if is_main {
        "\n\nEnd your reply with a line of the form:\n\n**Final Answer:** <your answer>\n\n\
         Keep the final answer as direct and specific as the question allows."
    } else {
        "\n\nReply with the subtask's answer followed by the supporting details the \
         requesting agent will need to use it."
    };

    format!("{role_frame}{task_description}{outcome_frame}{answer_frame}")
}

/// Present each configured sub-agent as a single-tool server so the parent
/// can call it like any other tool.
pub fn sub_agent_catalogs<'a>(
    sub_agents: impl IntoIterator<Item = (&'a String, &'a AgentProfile)>,
) -> Vec<ServerTools> {
    sub_agents
        .into_iter()
        .map(|(name, profile)| {
            let tool = profile.subtask_tool_or_default();
            ServerTools {
                server_name: name.clone(),
                tools: vec![ToolDefinition {
                    name: tool.tool_name,
                    description: tool.description,
                    schema: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "subtask": { "title": "Subtask", "type": "string" }
                        },
                        "required": ["subtask"],
                    }),
                }],
                error: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn summarize_prompt_marks_failures() {
        let ok = summarize_prompt("find X", false, true);
        let failed = summarize_prompt("find X", true, true);
        assert!(ok.contains("gathered the information"));
        assert!(failed.contains("interrupted before the task"));
        assert!(ok.contains("**Final Answer:**"));
    }

    #[test]
    fn sub_agent_summary_has_no_boxed_frame() {
        let p = summarize_prompt("subtask", false, false);
        assert!(!p.contains("**Final Answer:**"));
        assert!(p.starts_with("The subtask given to you was:"));
    }

    #[test]
    fn sub_agent_catalog_exposes_subtask_tool() {
        let mut agents = BTreeMap::new();
        agents.insert("agent-browsing".to_string(), AgentProfile::default());
        let catalogs = sub_agent_catalogs(&agents);
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs[0].server_name, "agent-browsing");
        assert_eq!(catalogs[0].tools.len(), 1);
        assert_eq!(
            catalogs[0].tools[0].schema["required"][0],
            serde_json::json!("subtask")
        );
    }

    #[test]
    fn agent_suffix_differs_between_main_and_sub() {
        assert!(agent_specific_suffix("main").contains("main agent"));
        assert!(agent_specific_suffix("agent-browsing").contains("agent-browsing"));
    }
}
