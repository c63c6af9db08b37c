//! Base system prompts for the two dialects.
//!
//! The inline dialect must teach the model the `<use_mcp_tool>` wire
//! format and list every connected server's tools; the structured dialect
//! passes tool definitions in-band and only needs the behavioural frame.

use chrono::NaiveDate;

use mf_domain::tool::ServerTools;

/// System prompt for inline-dialect models: behavioural frame plus the
/// full MCP tool-use protocol and per-server tool listings.
pub fn mcp_system_prompt(date: NaiveDate, catalogs: &[ServerTools]) -> String {
    let mut prompt = format!(
        "In this environment you have access to a set of tools you can use to answer \
         the user's question. You can invoke tools by writing a \"<use_mcp_tool>\" block \
         like the following as part of your reply to the user:\n\n\
         <use_mcp_tool>\n\
         <server_name>server name here</server_name>\n\
         <tool_name>tool name here</tool_name>\n\
         <arguments>\n\
         {{\n\
         \"param1\": \"value1\",\n\
         \"param2\": \"value2\"\n\
         }}\n\
         </arguments>\n\
         </use_mcp_tool>\n\n\
         String and scalar parameters should be specified as is, while lists and objects \
         should use JSON format. The arguments must be valid JSON: double-quoted keys and \
         strings, no trailing commas, no comments.\n\n\
         Invoke at most a few tools per reply, wait for their results before deciding the \
         next step, and stop emitting tool blocks once you can answer directly.\n\n\
         Today is {}.\n\n\
         # Connected tool servers\n",
        date.format("%Y-%m-%d"),
    );

    for server in catalogs {
        prompt.push_str(&format!("\n## {}\n", server.server_name));
        if let Some(err) = &server.error {
            prompt.push_str(&format!("(unavailable: {err})\n"));
            continue;
        }
        if server.tools.is_empty() {
            prompt.push_str("(no tools)\n");
            continue;
        }
        for tool in &server.tools {
            let schema = serde_json::to_string(&tool.schema).unwrap_or_else(|_| "{}".into());
            prompt.push_str(&format!(
                "- {}: {}\n  Input schema: {}\n",
                tool.name,
                tool.description.trim(),
                schema
            ));
        }
    }

    prompt
}

/// System prompt for structured-dialect models. Tool definitions travel in
/// the request's `tools` field, so the prompt only sets the frame.
pub fn plain_system_prompt(date: NaiveDate, catalogs: &[ServerTools]) -> String {
    let unavailable: Vec<&str> = catalogs
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| s.server_name.as_str())
        .collect();

    let mut prompt = format!(
        "You are a capable task-solving agent. Use the provided tools to gather \
         information and perform actions; call tools only when needed, and produce a \
         direct final answer once you have enough information.\n\n\
         Today is {}.",
        date.format("%Y-%m-%d"),
    );
    if !unavailable.is_empty() {
        prompt.push_str(&format!(
            "\n\nNote: the following tool servers are currently unavailable: {}.",
            unavailable.join(", ")
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::tool::ToolDefinition;

    fn catalog() -> Vec<ServerTools> {
        vec![
            ServerTools {
                server_name: "tool-calc".into(),
                tools: vec![ToolDefinition {
                    name: "add".into(),
                    description: "Add two numbers".into(),
                    schema: serde_json::json!({"type": "object", "properties": {"a": {}, "b": {}}}),
                }],
                error: None,
            },
            ServerTools {
                server_name: "tool-down".into(),
                tools: vec![],
                error: Some("connection refused".into()),
            },
        ]
    }

    #[test]
    fn mcp_prompt_lists_tools_and_errors() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let p = mcp_system_prompt(date, &catalog());
        assert!(p.contains("<use_mcp_tool>"));
        assert!(p.contains("2025-08-01"));
        assert!(p.contains("## tool-calc"));
        assert!(p.contains("- add: Add two numbers"));
        assert!(p.contains("unavailable: connection refused"));
    }

    #[test]
    fn plain_prompt_mentions_unavailable_servers_only() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let p = plain_system_prompt(date, &catalog());
        assert!(!p.contains("<use_mcp_tool>"));
        assert!(p.contains("tool-down"));
        assert!(!p.contains("## tool-calc"));
    }
}
