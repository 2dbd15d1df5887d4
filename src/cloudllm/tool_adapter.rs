//! Tool adapter (MCP over stdio) — §4.3.
//!
//! Owns exactly one MCP stdio subprocess: spawn, handshake, paginated capability discovery,
//! invocation with streamed stderr, and a safe shutdown sequence that never lets one failing
//! step skip the rest.
//!
//! Built on `rmcp` (the official `modelcontextprotocol/rust-sdk`) for stdio transport: spawning
//! stdio children via `rmcp::transport::TokioChildProcess` around a `tokio::process::Command`,
//! completing the handshake with `<handler>.serve(transport).await?`, and driving
//! pagination/invocation through the resulting `RunningService` peer handle.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation as RmcpImplementation,
    PaginatedRequestParam,
};
use rmcp::service::RunningService;
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

// NB: `TokioChildProcess::new`/`::builder` takes an *un-spawned* `tokio::process::Command` and
// spawns it internally (see the stdio branch of `examples/other_examples`'s aggregate MCP
// server: `TokioChildProcess::new(cmd)?` is handed a bare `Command`, never a `Child`). The
// builder variant additionally exposes piping `stderr` separately from the transport's own
// stdin/stdout pipes, and reports the spawned child's pid.

use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::monitor::{Context, MonitorEvent, MonitorState};
use crate::cloudllm::types::{
    DispatchOptions, Implementation, PromptDescriptor, ResourceDescriptor, ServiceKind,
    ServiceResponse, ToolCall, ToolCallResult, ToolContentItem, ToolDescriptor, ToolInfo,
    ToolRequest, ToolResponse, ToolService,
};

/// Where a stdio tool server should be spawned from: the program plus its argument vector
/// (§4.3 creation step 1 expands `$HOME`/`%USERPROFILE%`-style references in these before spawn)
/// and any extra environment variables to set on the child.
#[derive(Debug, Clone)]
pub struct StdioServerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl StdioServerSpec {
    pub fn new(command: impl Into<String>) -> Self {
        StdioServerSpec {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Expands `$NAME`/`${NAME}` (Unix-style) and `%NAME%` (Windows-style) variable references
/// against the host process's environment, leaving unknown references untouched. This is the
/// "shell-style variable expansion" of §4.3 creation step 1, deliberately scoped to the
/// documented subset (no command substitution, no globbing) rather than invoking a real shell.
pub fn expand_shell_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == '$' {
            let rest = &input[i + 1..];
            if let Some(stripped) = rest.strip_prefix('{') {
                if let Some(end) = stripped.find('}') {
                    let name = &stripped[..end];
                    out.push_str(&std::env::var(name).unwrap_or_default());
                    for _ in 0..(name.len() + 2) {
                        chars.next();
                    }
                    continue;
                }
            }
            let name_len = rest
                .char_indices()
                .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
                .count();
            if name_len > 0 {
                let name = &rest[..name_len];
                out.push_str(&std::env::var(name).unwrap_or_default());
                for _ in 0..name_len {
                    chars.next();
                }
                continue;
            }
            out.push(c);
        } else if c == '%' {
            if let Some(end) = input[i + 1..].find('%') {
                let name = &input[i + 1..i + 1 + end];
                if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    out.push_str(&std::env::var(name).unwrap_or_default());
                    for _ in 0..(end + 1) {
                        chars.next();
                    }
                    continue;
                }
            }
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

type McpPeer = RunningService<RoleClient, ClientInfo>;

/// Owns one MCP stdio subprocess: the live peer handle, the child's pid (for the safe-close
/// SIGKILL step), and lazily-discovered capabilities.
pub struct ToolAdapter {
    uri: String,
    peer: Mutex<Option<McpPeer>>,
    child_pid: Option<u32>,
    info: OnceCell<ToolInfo>,
    closed: AtomicBool,
    monitor_context: Option<Arc<Context>>,
    /// Broadcasts every stderr line the subprocess writes, for the lifetime of the adapter.
    /// [`ToolAdapter::execute`] subscribes one receiver per call so it can forward lines arriving
    /// during *that* call to the caller's [`DispatchOptions::callback`] (§4.3 invocation step 2)
    /// without re-attaching a fresh listener to the underlying pipe per call.
    stderr_tx: tokio::sync::broadcast::Sender<String>,
}

impl ToolAdapter {
    /// Spawns the subprocess, pipes stderr explicitly, and completes the MCP handshake
    /// (§4.3 creation steps 1-5). Capability discovery itself is lazy (first `get_info` call).
    pub async fn spawn(
        uri: impl Into<String>,
        spec: StdioServerSpec,
        client_name: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        let uri = uri.into();
        let program = expand_shell_vars(&spec.command);
        let args: Vec<String> = spec.args.iter().map(|a| expand_shell_vars(a)).collect();

        let mut command = Command::new(&program);
        command.args(&args);
        for (k, v) in &spec.env {
            command.env(k, expand_shell_vars(v));
        }

        // §4.3 creation step 2: stderr explicitly piped (not inherited) so it is observable
        // rather than handed over to the transport, which only owns stdin/stdout.
        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::AdapterFailure {
                uri: uri.clone(),
                message: format!("failed to spawn '{}': {}", program, e),
            })?;
        let child_pid = transport.id();

        // Transient error-logging listener on stderr for the initialization window (§4.3
        // creation steps 3 and 5): spawned now, it naturally keeps draining for the adapter's
        // whole lifetime, which also satisfies "stderr is observable" for post-init output. Every
        // line is also broadcast on `stderr_tx` so a live `execute()` call can forward it to the
        // caller's callback as a partial response.
        let (stderr_tx, _) = tokio::sync::broadcast::channel(256);
        if let Some(stderr) = stderr {
            let uri_for_log = uri.clone();
            let stderr_tx = stderr_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::warn!("[{}] stderr: {}", uri_for_log, line);
                    let _ = stderr_tx.send(line);
                }
            });
        }

        let client_info = ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: RmcpImplementation {
                name: client_name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let peer = client_info
            .serve(transport)
            .await
            .map_err(|e| OrchestratorError::AdapterFailure {
                uri: uri.clone(),
                message: format!("MCP handshake failed: {}", e),
            })?;

        log::info!("tool adapter '{}' handshake complete", uri);

        Ok(ToolAdapter {
            uri,
            peer: Mutex::new(Some(peer)),
            child_pid,
            info: OnceCell::new(),
            closed: AtomicBool::new(false),
            monitor_context: None,
            stderr_tx,
        })
    }

    pub fn with_monitor_context(mut self, context: Arc<Context>) -> Self {
        self.monitor_context = Some(context);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn kind(&self) -> ServiceKind {
        ServiceKind::Tool
    }

    /// One-shot, lazily invoked on first call: reads server capabilities/implementation, then
    /// pages through `tools`/`resources`/`prompts` until each returns no next cursor (§4.3
    /// "Capability discovery"). `tools` is required non-empty; per the flagged Open Question
    /// (§9, resolved in DESIGN.md), a server declaring `tools` support but returning an empty
    /// list is treated as a discovery failure, matching the source behaviour being preserved.
    pub async fn get_info(&self) -> Result<&ToolInfo, OrchestratorError> {
        self.info
            .get_or_try_init(|| async { self.discover().await })
            .await
    }

    async fn discover(&self) -> Result<ToolInfo, OrchestratorError> {
        let guard = self.peer.lock().await;
        let peer = guard.as_ref().ok_or_else(|| OrchestratorError::AdapterFailure {
            uri: self.uri.clone(),
            message: "tool adapter already closed".into(),
        })?;

        let server_info = peer.peer_info().ok_or_else(|| OrchestratorError::AdapterFailure {
            uri: self.uri.clone(),
            message: "server did not report capabilities during initialize".into(),
        })?;

        let capabilities = &server_info.capabilities;
        if capabilities.tools.is_none() {
            return Err(OrchestratorError::AdapterFailure {
                uri: self.uri.clone(),
                message: "server capabilities do not include tools".into(),
            });
        }

        let implementation = Implementation {
            name: server_info.server_info.name.clone(),
            version: server_info.server_info.version.clone(),
        };
        let instructions = server_info.instructions.clone();

        let tools = paginate_tools(peer).await?;
        if tools.is_empty() {
            // Resolves the Open Question flagged in §9: a server that declares `tools` support
            // but returns an empty list fails discovery rather than succeeding with an empty
            // tool set.
            return Err(OrchestratorError::AdapterFailure {
                uri: self.uri.clone(),
                message: "server declared tools capability but returned zero tools".into(),
            });
        }

        let supports_resources = capabilities.resources.is_some();
        let resources = if supports_resources {
            paginate_resources(peer).await?
        } else {
            Vec::new()
        };

        let supports_prompts = capabilities.prompts.is_some();
        let prompts = if supports_prompts {
            paginate_prompts(peer).await?
        } else {
            Vec::new()
        };

        Ok(ToolInfo {
            implementation,
            supports_resources,
            supports_prompts,
            tools,
            resources,
            prompts,
            instructions,
        })
    }

    pub async fn get_target(&self) -> Result<ToolService, OrchestratorError> {
        let info = self.get_info().await?;
        Ok(ToolService {
            kind: ServiceKind::Tool,
            uri: self.uri.clone(),
            id: self.uri.clone(),
            info: info.clone(),
        })
    }

    /// Invokes the MCP tool named in `request.call` (§4.3 "Invocation"). For the duration of the
    /// call, stderr lines broadcast from the continuous drain task started in
    /// [`ToolAdapter::spawn`] are forwarded to `options.callback` as synthetic partial
    /// [`ToolResponse`]s (step 2), tolerating arrival either before or after the final response
    /// per §5's ordering guarantee; the forwarding task is detached once the call settles.
    pub async fn execute(
        &self,
        request: &ToolRequest,
        options: &DispatchOptions,
    ) -> Result<ToolResponse, OrchestratorError> {
        if request.uri != self.uri {
            return Err(OrchestratorError::UriMismatch {
                expected: self.uri.clone(),
                actual: request.uri.clone(),
            });
        }

        let stderr_forwarder = options.callback.clone().map(|callback| {
            let mut rx = self.stderr_tx.subscribe();
            let uri = self.uri.clone();
            let request_id = request.id.clone();
            let call = request.call.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(line) => callback(ServiceResponse::ToolResponse(ToolResponse {
                            id: request_id.clone(),
                            uri: uri.clone(),
                            call: call.clone(),
                            result: ToolCallResult::text(line),
                            error: None,
                        })),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        });

        let cancel = options.cancel.clone();
        let arguments = match &request.call.arguments {
            serde_json::Value::Object(map) => Some(map.clone()),
            serde_json::Value::Null => None,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                Some(map)
            }
        };

        let param = CallToolRequestParam {
            name: request.call.name.clone().into(),
            arguments,
        };

        let guard = self.peer.lock().await;
        let peer = match guard.as_ref() {
            Some(peer) => peer,
            None => {
                if let Some(forwarder) = stderr_forwarder {
                    forwarder.abort();
                }
                return Err(OrchestratorError::AdapterFailure {
                    uri: self.uri.clone(),
                    message: "tool adapter already closed".into(),
                });
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err("call cancelled".to_string()),
            result = peer.call_tool(param) => result.map_err(|e| e.to_string()),
        };
        drop(guard);

        // Detach the per-call stderr forwarder regardless of success or failure (§4.3 invocation
        // step 4).
        if let Some(forwarder) = stderr_forwarder {
            forwarder.abort();
        }

        let response = match outcome {
            Ok(result) => ToolResponse {
                id: request.id.clone(),
                uri: self.uri.clone(),
                call: request.call.clone(),
                result: ToolCallResult {
                    content: result
                        .content
                        .iter()
                        .filter_map(|c| c.as_text().map(|t| ToolContentItem::Text { text: t.text.clone() }))
                        .collect(),
                    is_error: result.is_error.unwrap_or(false),
                },
                error: None,
            },
            Err(message) => {
                log::warn!("tool call '{}' on '{}' failed: {}", request.call.name, self.uri, message);
                ToolResponse {
                    id: request.id.clone(),
                    uri: self.uri.clone(),
                    call: request.call.clone(),
                    result: ToolCallResult::error_text(format!(
                        "call to '{}' on '{}' failed: {}",
                        request.call.name, self.uri, message
                    )),
                    error: Some(message),
                }
            }
        };

        if let Some(context) = &self.monitor_context {
            context.publish(MonitorEvent::Update {
                state: MonitorState::Response(ServiceResponse::ToolResponse(response.clone())),
                update: None,
            });
        }

        Ok(response)
    }

    /// Safe-close sequence (§4.3): close the transport/client, then SIGKILL the subprocess by
    /// pid if known, wrapping each step so a failure in one never skips the rest. Idempotent —
    /// calling it twice is a no-op the second time.
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(peer) = self.peer.lock().await.take() {
            if let Err(e) = peer.cancel().await {
                log::warn!("error closing MCP peer for '{}': {}", self.uri, e);
            }
        }

        if let Some(pid) = self.child_pid {
            force_kill(pid);
        }

        log::info!("tool adapter '{}' closed", self.uri);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("kill").args(["-9", &pid.to_string()]).status();
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

async fn paginate_tools(peer: &McpPeer) -> Result<Vec<ToolDescriptor>, OrchestratorError> {
    let mut cursor = None;
    let mut out = Vec::new();
    loop {
        let page = peer
            .list_tools(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(|e| OrchestratorError::AdapterFailure {
                uri: String::new(),
                message: format!("list_tools failed: {}", e),
            })?;
        out.extend(page.tools.into_iter().map(|t| ToolDescriptor {
            name: t.name.to_string(),
            description: t.description.map(|d| d.to_string()),
            input_schema: serde_json::to_value(&t.input_schema).unwrap_or(serde_json::Value::Null),
        }));
        if page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }
    Ok(out)
}

async fn paginate_resources(peer: &McpPeer) -> Result<Vec<ResourceDescriptor>, OrchestratorError> {
    let mut cursor = None;
    let mut out = Vec::new();
    loop {
        let page = peer
            .list_resources(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(|e| OrchestratorError::AdapterFailure {
                uri: String::new(),
                message: format!("list_resources failed: {}", e),
            })?;
        out.extend(page.resources.into_iter().map(|r| ResourceDescriptor {
            uri: r.uri.to_string(),
            name: r.name.to_string(),
            description: r.description.map(|d| d.to_string()),
        }));
        if page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }
    Ok(out)
}

async fn paginate_prompts(peer: &McpPeer) -> Result<Vec<PromptDescriptor>, OrchestratorError> {
    let mut cursor = None;
    let mut out = Vec::new();
    loop {
        let page = peer
            .list_prompts(Some(PaginatedRequestParam { cursor }))
            .await
            .map_err(|e| OrchestratorError::AdapterFailure {
                uri: String::new(),
                message: format!("list_prompts failed: {}", e),
            })?;
        out.extend(page.prompts.into_iter().map(|p| PromptDescriptor {
            name: p.name.to_string(),
            description: p.description.map(|d| d.to_string()),
        }));
        if page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }
    Ok(out)
}
