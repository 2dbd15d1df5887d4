//! Core data model shared by every component of the orchestrator.
//!
//! These types mirror the wire shapes exchanged between the reactive loop, the
//! [`Provider`](crate::cloudllm::provider::Provider) contract, and the per-URI
//! [`AgentAdapter`](crate::cloudllm::agent_adapter::AgentAdapter) /
//! [`ToolAdapter`](crate::cloudllm::tool_adapter::ToolAdapter) callables. Nothing here talks to
//! a network or a subprocess; it is pure data plus the small amount of normalization logic the
//! spec assigns to the data model itself (dropping empty message content, synonymizing `agent`
//! with `assistant` on ingest).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Parses the wire-level role string, treating `"agent"` as a synonym for `"assistant"`.
    ///
    /// This is the one place §3's "`agent` is a synonym for `assistant` on input" rule lives.
    pub fn from_wire(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" | "agent" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// A single turn in a conversation.
///
/// `content` must be non-empty; [`Message::new`] enforces this by returning `None` for an empty
/// string so callers cannot accidentally construct one that violates the data-model invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Constructs a message, dropping it (returning `None`) if `content` is empty per §3.
    pub fn new(role: Role, content: impl Into<String>) -> Option<Self> {
        let content = content.into();
        if content.is_empty() {
            None
        } else {
            Some(Message { role, content })
        }
    }

    pub fn user(content: impl Into<String>) -> Option<Self> {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Option<Self> {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Option<Self> {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered, finite sequence of [`Message`]s.
pub type Session = Vec<Message>;

/// Implementation identity, as surfaced by an MCP `initialize` handshake or an A2A agent card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Tool metadata as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Resource metadata as returned by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
}

/// Prompt metadata as returned by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
}

/// Discovered capabilities of an MCP tool server. Required non-empty for a service to be
/// usable: `tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub implementation: Implementation,
    pub supports_resources: bool,
    pub supports_prompts: bool,
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub instructions: Option<String>,
}

/// One skill advertised by an A2A agent card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
}

/// Discovered capabilities of an A2A agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub url: String,
    pub skills: Vec<AgentSkill>,
}

/// Discriminates the two kinds of callable a [`Manager`](crate::cloudllm::manager::Manager) can
/// dispatch to, and the two kinds of request/response/service that travel with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Tool,
    Agent,
}

/// A discovered tool-service descriptor. Only constructed once the underlying [`ToolAdapter`]
/// has loaded its [`ToolInfo`] at least once (see
/// [`ToolAdapter::get_target`](crate::cloudllm::tool_adapter::ToolAdapter::get_target)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolService {
    pub kind: ServiceKind,
    pub uri: String,
    pub id: String,
    pub info: ToolInfo,
}

/// A discovered agent-service descriptor, analogous to [`ToolService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentService {
    pub kind: ServiceKind,
    pub uri: String,
    pub id: String,
    pub info: AgentInfo,
}

/// The payload of a tool call: an MCP tool name plus its JSON arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The payload of an agent call: either raw user text or a fully structured [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentCall {
    Text(String),
    Message(Message),
}

/// A service call emitted by the LLM provider, to be dispatched by the
/// [`Manager`](crate::cloudllm::manager::Manager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub uri: String,
    pub caller_id: String,
    pub call: ToolCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub id: String,
    pub uri: String,
    pub caller_id: String,
    pub call: AgentCall,
}

/// A tagged union over the two request kinds, matching §9's "Callable polymorphism" note: the
/// [`Manager`](crate::cloudllm::manager::Manager) type-switches on `(callable.kind(), request)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRequest {
    ToolRequest(ToolRequest),
    AgentRequest(AgentRequest),
}

impl ServiceRequest {
    pub fn id(&self) -> &str {
        match self {
            ServiceRequest::ToolRequest(r) => &r.id,
            ServiceRequest::AgentRequest(r) => &r.id,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ServiceRequest::ToolRequest(r) => &r.uri,
            ServiceRequest::AgentRequest(r) => &r.uri,
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceRequest::ToolRequest(_) => ServiceKind::Tool,
            ServiceRequest::AgentRequest(_) => ServiceKind::Agent,
        }
    }
}

/// Normalized MCP `callTool` outcome: either the validated result, or a synthetic single-text
/// "error" content item (§4.3, invocation step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContentItem>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContentItem {
    Text { text: String },
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolCallResult {
            content: vec![ToolContentItem::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        ToolCallResult {
            content: vec![ToolContentItem::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Outcome of sending a message to an A2A agent: the raw success payload, or a failure string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentCallResult {
    Success(serde_json::Value),
    Failure(String),
}

/// Mirror of a [`ToolRequest`]/[`AgentRequest`]; `response.id` always equals the originating
/// request's `id` (§8's round-trip identity invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub uri: String,
    pub call: ToolCall,
    pub result: ToolCallResult,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: String,
    pub uri: String,
    pub call: AgentCall,
    pub result: AgentCallResult,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceResponse {
    ToolResponse(ToolResponse),
    AgentResponse(AgentResponse),
}

impl ServiceResponse {
    pub fn id(&self) -> &str {
        match self {
            ServiceResponse::ToolResponse(r) => &r.id,
            ServiceResponse::AgentResponse(r) => &r.id,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            ServiceResponse::ToolResponse(r) => &r.uri,
            ServiceResponse::AgentResponse(r) => &r.uri,
        }
    }
}

/// The `tools`/`agents` half of a [`ConnectRequest`]'s options, carrying previously-discovered
/// services plus the accumulated responses so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOptions {
    #[serde(default)]
    pub services: Vec<ToolService>,
    #[serde(default)]
    pub responses: Vec<ToolResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOptions {
    #[serde(default)]
    pub services: Vec<AgentService>,
    #[serde(default)]
    pub responses: Vec<AgentResponse>,
}

/// Opaque pass-through fields carried on every request but never interpreted by the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassThrough {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub auth: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequestOptions {
    #[serde(default)]
    pub tools: ToolOptions,
    #[serde(default)]
    pub agents: AgentOptions,
    #[serde(default)]
    pub pass_through: PassThrough,
}

/// What the [`Provider`](crate::cloudllm::provider::Provider) receives on each round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub options: ConnectRequestOptions,
}

/// The `tools`/`agents` half of a [`ConnectResponse`]'s options: new requests the LLM wants
/// dispatched. Empty lists mean "final turn".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResponseOptions {
    #[serde(default)]
    pub requests: Vec<ToolRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponseOptions {
    #[serde(default)]
    pub requests: Vec<AgentRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectResponseOptions {
    #[serde(default)]
    pub tools: ToolResponseOptions,
    #[serde(default)]
    pub agents: AgentResponseOptions,
}

/// What the [`Provider`](crate::cloudllm::provider::Provider) returns on each round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub timestamp: DateTime<Utc>,
    /// The final assistant message. May be `None` on LLM refusal/empty content (§4.1).
    pub message: Option<Message>,
    #[serde(default)]
    pub options: ConnectResponseOptions,
}

impl ConnectResponse {
    /// All tool + agent requests the LLM emitted on this turn, flattened into one list for the
    /// [`Manager`](crate::cloudllm::manager::Manager) to dispatch.
    pub fn all_requests(&self) -> Vec<ServiceRequest> {
        let mut out = Vec::with_capacity(
            self.options.tools.requests.len() + self.options.agents.requests.len(),
        );
        out.extend(
            self.options
                .tools
                .requests
                .iter()
                .cloned()
                .map(ServiceRequest::ToolRequest),
        );
        out.extend(
            self.options
                .agents
                .requests
                .iter()
                .cloned()
                .map(ServiceRequest::AgentRequest),
        );
        out
    }
}

/// Flexible input accepted by [`Orchestrator::connect`](crate::cloudllm::orchestrator::Orchestrator::connect),
/// normalized per §4.7: a bare string, a single message, a whole session, or a pre-built
/// request. Modeled as an enum with `From` impls rather than a dynamically-typed parameter so
/// callers get ergonomic overloads without runtime shape-sniffing.
#[derive(Debug, Clone)]
pub enum ConnectInput {
    Text(String),
    Single(Message),
    Session(Session),
    Request(ConnectRequest),
}

impl From<&str> for ConnectInput {
    fn from(s: &str) -> Self {
        ConnectInput::Text(s.to_string())
    }
}

impl From<String> for ConnectInput {
    fn from(s: String) -> Self {
        ConnectInput::Text(s)
    }
}

impl From<Message> for ConnectInput {
    fn from(m: Message) -> Self {
        ConnectInput::Single(m)
    }
}

impl From<Session> for ConnectInput {
    fn from(s: Session) -> Self {
        ConnectInput::Session(s)
    }
}

impl From<ConnectRequest> for ConnectInput {
    fn from(r: ConnectRequest) -> Self {
        ConnectInput::Request(r)
    }
}

/// Per-parent task-id correlation table: `parentTaskId -> (uri -> childTaskId)`. Shared across
/// one [`Manager::call`](crate::cloudllm::manager::Manager::call) dispatch so that repeated
/// calls to the same agent uri within one parent re-use the same child task (§3, "session
/// stickiness").
pub type TaskTable = Arc<Mutex<HashMap<String, HashMap<String, String>>>>;

/// Execution context threaded through every internal dispatch: the parent/child task
/// correlation table, the loop's iteration budget, cancellation, and an optional per-response
/// callback sink (used for tool stderr streaming, §4.3 invocation step 2).
#[derive(Clone)]
pub struct DispatchOptions {
    pub parent_task_id: String,
    pub tasks: TaskTable,
    pub iterations: u32,
    pub cancel: CancellationToken,
    pub callback: Option<Arc<dyn Fn(ServiceResponse) + Send + Sync>>,
}

impl DispatchOptions {
    pub fn new(parent_task_id: impl Into<String>, iterations: u32, cancel: CancellationToken) -> Self {
        DispatchOptions {
            parent_task_id: parent_task_id.into(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            iterations,
            cancel,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn Fn(ServiceResponse) + Send + Sync>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Generates a fresh opaque identifier, used for request ids and generated child task ids.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
