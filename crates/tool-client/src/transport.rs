//! Tool server transports.
//!
//! Both transports carry the same JSON-RPC envelope:
//! - **Stdio**: spawn a child process, one JSON message per line over
//!   stdin/stdout.
//! - **Http**: POST the envelope to a base URL.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use mf_domain::config::ToolServerParams;

use crate::protocol::{RpcNotification, RpcRequest, RpcResponse};

/// Non-JSON-RPC stdout lines tolerated per exchange. A server that logs
/// this much to stdout between replies is treated as broken.
const NOISE_BUDGET: usize = 256;

/// Per-request transport timeout. The manager applies the outer tool-call
/// timeout on top of this.
const REQUEST_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("tool server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,
}

#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcResponse, TransportError>;

    async fn send_notification(&self, method: &str) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;

    async fn shutdown(&self);
}

/// Build a transport from the configured server params.
pub fn connect(params: &ToolServerParams) -> Result<Box<dyn ToolTransport>, TransportError> {
    match params {
        ToolServerParams::Stdio { command, args, env } => {
            Ok(Box::new(StdioTransport::spawn(command, args, env)?))
        }
        ToolServerParams::Http { url } => Ok(Box::new(HttpTransport::new(url.clone()))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Child-process transport.
///
/// All process state lives behind a single mutex, and the lock is held
/// for a complete write/read exchange, so concurrent callers can never
/// interleave their replies. A dead pipe empties the slot; every later
/// call sees `ProcessExited` without touching the process again.
pub struct StdioTransport {
    session: Mutex<Option<StdioSession>>,
    next_id: AtomicU64,
}

struct StdioSession {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn()?;
        let broken_pipe = |what: &str| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("failed to capture child {what}"),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;

        Ok(Self {
            session: Mutex::new(Some(StdioSession {
                child,
                stdin,
                lines: BufReader::new(stdout).lines(),
            })),
            next_id: AtomicU64::new(1),
        })
    }
}

impl StdioSession {
    async fn write_line(&mut self, payload: &str) -> Result<(), TransportError> {
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Write one request and read until its response arrives.
    ///
    /// Anything else on stdout — notifications, replies to ids we gave up
    /// on after a timeout, stray logging — is skipped, with a budget on
    /// the logging noise so a misconfigured server cannot spin us.
    async fn exchange(&mut self, payload: &str, id: u64) -> Result<RpcResponse, TransportError> {
        self.write_line(payload).await?;

        let mut noise = 0usize;
        loop {
            let line = match self.lines.next_line().await? {
                Some(line) => line,
                None => return Err(TransportError::ProcessExited),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<RpcResponse>(line) {
                Ok(response) if response.id == id => return Ok(response),
                Ok(response) => {
                    tracing::debug!(
                        expected = id,
                        got = response.id,
                        "skipping response for a different request"
                    );
                }
                Err(_) => {
                    noise += 1;
                    tracing::debug!(line, "skipping non-JSON-RPC line from tool server stdout");
                    if noise > NOISE_BUDGET {
                        return Err(TransportError::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "tool server flooded stdout with non-protocol output",
                        )));
                    }
                }
            }
        }
    }
}

/// Whether an exchange failure means the process side of the pipe is gone
/// for good (as opposed to a recoverable protocol hiccup).
fn is_fatal(err: &TransportError) -> bool {
    matches!(err, TransportError::Io(_) | TransportError::ProcessExited)
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&RpcRequest::new(id, method, params))?;

        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(TransportError::ProcessExited)?;

        tracing::debug!(id, method, "sending tool server request");
        let outcome = tokio::time::timeout(REQUEST_TIMEOUT, session.exchange(&payload, id)).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                if is_fatal(&e) {
                    *slot = None;
                }
                Err(e)
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let payload = serde_json::to_string(&RpcNotification::new(method))?;

        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(TransportError::ProcessExited)?;

        tracing::debug!(method, "sending tool server notification");
        if let Err(e) = session.write_line(&payload).await {
            if is_fatal(&e) {
                *slot = None;
            }
            return Err(e);
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        match self.session.try_lock() {
            Ok(slot) => slot.is_some(),
            // Someone is mid-exchange, so the session must still exist.
            Err(_) => true,
        }
    }

    async fn shutdown(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        // Closing stdin is the polite exit signal; most servers quit on
        // EOF. Escalate to SIGKILL if that does not happen promptly.
        drop(session.stdin);
        let patience = tokio::time::Duration::from_secs(5);
        match tokio::time::timeout(patience, session.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "tool server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for tool server process");
            }
            Err(_) => {
                tracing::warn!("tool server ignored EOF, killing");
                if let Err(e) = session.child.kill().await {
                    tracing::warn!(error = %e, "failed to kill tool server process");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POSTs each JSON-RPC envelope to a base URL. Stateless on our side;
/// session affinity, if any, is the server's problem.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);

        let resp = self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn send_notification(&self, method: &str) -> Result<(), TransportError> {
        let notif = RpcNotification::new(method);
        self.client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&notif)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn shutdown(&self) {}
}
