//! Tool manager — catalog discovery and timed tool dispatch across all
//! configured tool servers.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use mf_domain::config::{ToolBlacklistEntry, ToolServerConfig, ToolServerParams};
use mf_domain::error::{Error, Result};
use mf_domain::tool::{ServerTools, ToolDefinition, ToolResult};

use crate::fetch;
use crate::protocol::{self, CallToolResult, ToolsListResult};
use crate::transport::{self, ToolTransport, TransportError};

/// Server whose session is kept alive for the whole task instead of being
/// re-spawned per call. Browser state (tabs, cookies) must survive between
/// calls.
const BROWSER_SERVER: &str = "playwright";

const HF_REFUSAL: &str = "You are trying to scrape a Hugging Face dataset for answers, \
                          please do not use the scrape tool for this purpose.";

pub struct ToolManager {
    servers: Vec<ToolServerConfig>,
    blacklist: HashSet<(String, String)>,
    call_timeout: Duration,
    /// Lazily-initialised long-lived browser session. The mutex also
    /// serializes browser calls.
    browser: Mutex<Option<BrowserSession>>,
}

impl ToolManager {
    pub fn new(servers: Vec<ToolServerConfig>, blacklist: &[ToolBlacklistEntry]) -> Self {
        Self::with_timeout(servers, blacklist, Duration::from_secs(600))
    }

    pub fn with_timeout(
        servers: Vec<ToolServerConfig>,
        blacklist: &[ToolBlacklistEntry],
        call_timeout: Duration,
    ) -> Self {
        let blacklist = blacklist
            .iter()
            .map(|e| (e.server.clone(), e.tool.clone()))
            .collect();
        tracing::info!(
            servers = ?servers.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "tool manager initialized"
        );
        Self {
            servers,
            blacklist,
            call_timeout,
            browser: Mutex::new(None),
        }
    }

    fn server_params(&self, server_name: &str) -> Option<&ToolServerParams> {
        self.servers
            .iter()
            .find(|s| s.name == server_name)
            .map(|s| &s.params)
    }

    // ── Catalog discovery ──────────────────────────────────────────

    /// Connect to every configured server and collect its tool catalog.
    ///
    /// A server that fails to respond keeps its entry with an empty tool
    /// list and an error note — catalog assembly never aborts.
    pub async fn list_tools(&self) -> Vec<ServerTools> {
        let mut catalogs = Vec::with_capacity(self.servers.len());

        for server in &self.servers {
            tracing::info!(server = %server.name, "fetching tool definitions");
            match self.list_server_tools(server).await {
                Ok(tools) => {
                    tracing::info!(server = %server.name, count = tools.len(), "tools discovered");
                    catalogs.push(ServerTools {
                        server_name: server.name.clone(),
                        tools,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(server = %server.name, error = %e, "tool discovery failed");
                    catalogs.push(ServerTools {
                        server_name: server.name.clone(),
                        tools: Vec::new(),
                        error: Some(format!("Failed to fetch tools: {e}")),
                    });
                }
            }
        }

        catalogs
    }

    async fn list_server_tools(&self, server: &ToolServerConfig) -> Result<Vec<ToolDefinition>> {
        let transport = transport::connect(&server.params).map_err(transport_error)?;
        let result = initialize_and(&*transport, "tools/list", None).await;
        transport.shutdown().await;
        let value = result?;

        let listed: ToolsListResult = serde_json::from_value(value)?;
        Ok(listed
            .tools
            .into_iter()
            .filter(|t| {
                let blacklisted = self
                    .blacklist
                    .contains(&(server.name.clone(), t.name.clone()));
                if blacklisted {
                    tracing::info!(server = %server.name, tool = %t.name, "tool is blacklisted, skipping");
                }
                !blacklisted
            })
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                schema: t.input_schema,
            })
            .collect())
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Execute one tool call under the manager's hard timeout.
    ///
    /// `Ok(ToolResult)` covers normal completion including server-reported
    /// errors; `Err` is reserved for the timeout and transport failures
    /// the dispatcher converts to error envelopes.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolResult> {
        let Some(params) = self.server_params(server_name) else {
            tracing::warn!(server = %server_name, "call to unknown server");
            return Ok(ToolResult::Error(format!(
                "Server '{server_name}' not found."
            )));
        };

        // Policy filter: refuse scraping of protected dataset URLs. An ok
        // result, not an error, so the model can adapt its approach.
        if blocks_protected_scrape(tool_name, &arguments) {
            return Ok(ToolResult::Ok(HF_REFUSAL.into()));
        }

        tracing::info!(server = %server_name, tool = %tool_name, "executing tool call");

        let fut = self.call_tool_inner(server_name, params, tool_name, &arguments);
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "tool call {server_name}.{tool_name} exceeded {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }

    async fn call_tool_inner(
        &self,
        server_name: &str,
        params: &ToolServerParams,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<ToolResult> {
        if server_name == BROWSER_SERVER {
            return self.call_browser_tool(params, tool_name, arguments).await;
        }

        let outcome = call_once(params, tool_name, arguments).await;

        match outcome {
            Ok(result) => Ok(render_result(tool_name, &result)),
            Err(e) => {
                // One fallback for scrape: fetch the page ourselves and
                // convert it to markdown-ish text. The original error wins
                // if the fallback also fails.
                if tool_name == "scrape" {
                    if let Some(url) = arguments.get("url").and_then(|v| v.as_str()) {
                        tracing::info!(url, "scrape failed, attempting direct fetch fallback");
                        if let Ok(text) = fetch::fetch_as_text(url).await {
                            return Ok(ToolResult::Ok(text));
                        }
                        tracing::warn!(url, "direct fetch fallback also failed");
                    }
                }
                Ok(ToolResult::Error(e.to_string()))
            }
        }
    }

    /// Browser calls go through one task-lifetime session, created on
    /// first use. The mutex guarantees serialized access.
    async fn call_browser_tool(
        &self,
        params: &ToolServerParams,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<ToolResult> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(BrowserSession::connect(params).await?);
        }
        let Some(session) = guard.as_ref() else {
            return Err(Error::Other("browser session unavailable".into()));
        };

        match session.call(tool_name, arguments).await {
            Ok(result) => {
                if result.last_text().is_none() && !result.is_error {
                    // Empty output may be normal (e.g. close-tab) but the
                    // model needs something to react to.
                    return Ok(ToolResult::Ok(format!(
                        "Tool '{tool_name}' returned empty result - this may be expected \
                         (e.g., delete operations) or indicate an issue with tool execution"
                    )));
                }
                Ok(render_result(tool_name, &result))
            }
            Err(e) => Ok(ToolResult::Error(e.to_string())),
        }
    }

    /// Tear down the long-lived browser session, if one was created.
    pub async fn shutdown(&self) {
        if let Some(session) = self.browser.lock().await.take() {
            session.shutdown().await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn transport_error(e: TransportError) -> Error {
    Error::Other(e.to_string())
}

/// Fresh connection, handshake, one request, teardown.
async fn initialize_and(
    transport: &dyn ToolTransport,
    method: &str,
    params: Option<Value>,
) -> Result<Value> {
    let init_params = serde_json::to_value(protocol::initialize_params())?;
    transport
        .send_request("initialize", Some(init_params))
        .await
        .map_err(transport_error)?
        .into_result()
        .map_err(|e| Error::Other(format!("initialize failed: {e}")))?;
    transport
        .send_notification("notifications/initialized")
        .await
        .map_err(transport_error)?;

    transport
        .send_request(method, params)
        .await
        .map_err(transport_error)?
        .into_result()
        .map_err(|e| Error::Other(format!("{method} failed: {e}")))
}

async fn call_once(
    params: &ToolServerParams,
    tool_name: &str,
    arguments: &Value,
) -> Result<CallToolResult> {
    let transport = transport::connect(params).map_err(transport_error)?;
    let call_params = serde_json::json!({
        "name": tool_name,
        "arguments": arguments,
    });
    let result = initialize_and(&*transport, "tools/call", Some(call_params)).await;
    transport.shutdown().await;
    Ok(serde_json::from_value(result?)?)
}

/// Convert a wire result into the uniform envelope. Empty content is
/// turned into a distinguishable ok string — never silently dropped.
fn render_result(tool_name: &str, result: &CallToolResult) -> ToolResult {
    match result.last_text() {
        Some(text) if result.is_error => ToolResult::Error(text.to_string()),
        Some(text) => ToolResult::Ok(text.to_string()),
        None if result.content.is_empty() => ToolResult::Ok(format!(
            "Tool '{tool_name}' completed but returned no content - this may be \
             expected or indicate an issue"
        )),
        None => ToolResult::Ok(format!(
            "Tool '{tool_name}' completed but returned empty text - this may be \
             expected or indicate an issue"
        )),
    }
}

fn blocks_protected_scrape(tool_name: &str, arguments: &Value) -> bool {
    if tool_name != "scrape" {
        return false;
    }
    arguments
        .get("url")
        .and_then(|v| v.as_str())
        .map(|url| {
            url.contains("huggingface.co/datasets") || url.contains("huggingface.co/spaces")
        })
        .unwrap_or(false)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BrowserSession {
    transport: Box<dyn ToolTransport>,
}

impl BrowserSession {
    async fn connect(params: &ToolServerParams) -> Result<Self> {
        let transport = transport::connect(params).map_err(transport_error)?;
        let init_params = serde_json::to_value(protocol::initialize_params())?;
        transport
            .send_request("initialize", Some(init_params))
            .await
            .map_err(transport_error)?
            .into_result()
            .map_err(|e| Error::Other(format!("initialize failed: {e}")))?;
        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(transport_error)?;
        tracing::info!("browser session established");
        Ok(Self { transport })
    }

    async fn call(&self, tool_name: &str, arguments: &Value) -> Result<CallToolResult> {
        let call_params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let value = self
            .transport
            .send_request("tools/call", Some(call_params))
            .await
            .map_err(transport_error)?
            .into_result()
            .map_err(|e| Error::Other(format!("tools/call failed: {e}")))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
