//! Orchestrator facade (§4.8): composes the Provider contract, Manager, Monitor, and reactive
//! loop into the crate's single public entry point.
//!
//! `Orchestrator` is a builder-and-facade struct: constructed via [`Orchestrator::new`],
//! configured with `with_*` builder methods, populated via [`Orchestrator::add`]/
//! [`Orchestrator::add_tool`] (fluent, serialized on a dedicated add-queue distinct from the
//! Manager's own internal registry lock, keeping the two invariants separate), and driven via
//! [`Orchestrator::connect`].

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::cloudllm::agent_adapter::{A2aClient, AgentAdapter};
use crate::cloudllm::config::OrchestratorConfig;
use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::manager::{Callable, Manager};
use crate::cloudllm::monitor::{ListenerId, Monitor, MonitorEvent};
use crate::cloudllm::normalize::{build_request, extract_final_text};
use crate::cloudllm::provider::Provider;
use crate::cloudllm::reactive_loop;
use crate::cloudllm::tool_adapter::{StdioServerSpec, ToolAdapter};
use crate::cloudllm::types::{
    new_id, AgentInfo, AgentOptions, AgentService, AgentSkill, ConnectInput, ConnectRequestOptions,
    ConnectResponse, DispatchOptions, Message, PassThrough, ToolInfo, ToolOptions, ToolService,
};

/// Orchestrates an LLM [`Provider`] against dynamically registered A2A agents and stdio MCP
/// tool servers (§1). One entry point: [`Orchestrator::connect`].
pub struct Orchestrator {
    model_id: String,
    provider: Box<dyn Provider>,
    manager: Arc<Manager>,
    monitor: Arc<Monitor>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    /// Serializes concurrent `add()`s: a subsequent `connect()` awaits the chain by acquiring
    /// this lock once, so it can never observe a partially-registered service (§4.8).
    add_queue: AsyncMutex<()>,
    /// Per-response sink threaded into every [`DispatchOptions`] this orchestrator builds (§3
    /// "Options"). Tool adapters use it to stream stderr-derived partial responses while a call
    /// is in flight (§4.3 invocation step 2); `None` unless set via
    /// [`Orchestrator::with_response_callback`].
    response_callback: Option<Arc<dyn Fn(crate::cloudllm::types::ServiceResponse) + Send + Sync>>,
}

impl Orchestrator {
    /// Builds an orchestrator around `provider`, reading `DEFAULT_CONCURRENCY`/
    /// `DEFAULT_ITERATIONS` from the environment via [`OrchestratorConfig::from_env`].
    pub fn new(model_id: impl Into<String>, provider: impl Provider + 'static) -> Self {
        Self::with_config(model_id, provider, OrchestratorConfig::from_env())
    }

    /// Builds an orchestrator with an explicit configuration instead of reading the environment
    /// — primarily for tests that want a deterministic concurrency/iteration budget.
    pub fn with_config(
        model_id: impl Into<String>,
        provider: impl Provider + 'static,
        config: OrchestratorConfig,
    ) -> Self {
        Orchestrator {
            model_id: model_id.into(),
            provider: Box::new(provider),
            manager: Arc::new(Manager::new(config.default_concurrency)),
            monitor: Arc::new(Monitor::new()),
            config,
            cancel: CancellationToken::new(),
            add_queue: AsyncMutex::new(()),
            response_callback: None,
        }
    }

    /// Overrides the cancellation token used by every `connect()` call on this orchestrator
    /// (builder pattern, consistent with the other `with_*` constructors).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a per-response sink that every `connect()` call threads into its
    /// [`DispatchOptions`] (§3): tool adapters invoke it with a synthetic partial `ToolResponse`
    /// for each stderr line observed while one of their calls is in flight.
    pub fn with_response_callback(
        mut self,
        callback: Arc<dyn Fn(crate::cloudllm::types::ServiceResponse) + Send + Sync>,
    ) -> Self {
        self.response_callback = Some(callback);
        self
    }

    fn dispatch_options(&self, parent_task_id: impl Into<String>) -> DispatchOptions {
        let mut options = DispatchOptions::new(parent_task_id, self.config.default_iterations, self.cancel.clone());
        options.callback = self.response_callback.clone();
        options
    }

    /// Registers an existing A2A client under `uri`, wrapping it (the caller retains ownership
    /// of its lifetime per §3 Ownership). Serialized against concurrent adds via the add-queue.
    pub async fn add(&self, uri: impl Into<String>, client: Arc<dyn A2aClient>) -> &Self {
        let _guard = self.add_queue.lock().await;
        let uri = uri.into();
        let adapter = AgentAdapter::wrap(uri.clone(), client).with_monitor_context(self.monitor.create(&uri));
        self.manager.set(uri, Callable::Agent(Arc::new(adapter))).await;
        self
    }

    /// Spawns a stdio MCP tool server under `uri` and registers it once its handshake
    /// completes. Serialized against concurrent adds via the add-queue.
    pub async fn add_tool(
        &self,
        uri: impl Into<String>,
        spec: StdioServerSpec,
    ) -> Result<&Self, OrchestratorError> {
        let _guard = self.add_queue.lock().await;
        let uri = uri.into();
        let adapter = ToolAdapter::spawn(uri.clone(), spec, format!("{}-agentic-orchestrator", self.model_id))
            .await?
            .with_monitor_context(self.monitor.create(&uri));
        self.manager.set(uri, Callable::Tool(Arc::new(adapter))).await;
        Ok(self)
    }

    /// Normalizes `input`, attaches currently-registered services' discovered capabilities to
    /// the outgoing request, drives the reactive loop to completion, and extracts the final
    /// assistant text (§4.8 `connect`).
    pub async fn connect(&self, input: impl Into<ConnectInput>) -> Result<String, OrchestratorError> {
        self.connect_with_options(input, ConnectRequestOptions::default()).await
    }

    /// As [`Orchestrator::connect`], but lets the caller seed additional pass-through/response
    /// options (e.g. resuming a session with previously-accumulated tool/agent responses).
    pub async fn connect_with_options(
        &self,
        input: impl Into<ConnectInput>,
        mut options: ConnectRequestOptions,
    ) -> Result<String, OrchestratorError> {
        // Ensure no add() is mid-flight before building the service list (§4.8: "a subsequent
        // `connect` awaits all pending adds").
        {
            let _guard = self.add_queue.lock().await;
        }

        let (tool_services, agent_services) = self.discover_services().await;
        options.tools = ToolOptions {
            services: tool_services,
            responses: options.tools.responses,
        };
        options.agents = AgentOptions {
            services: agent_services,
            responses: options.agents.responses,
        };
        if options.pass_through.endpoint.is_none() && self.config.api_url.is_some() {
            options.pass_through = PassThrough {
                endpoint: self.config.api_url.clone(),
                auth: options.pass_through.auth,
            };
        }

        let request = build_request(self.model_id.clone(), input.into(), options)?;
        let dispatch_options = self.dispatch_options(new_id());

        let response = reactive_loop::run(self.provider.as_ref(), &self.manager, request, dispatch_options).await?;
        extract_final_text(&response)
    }

    /// Runs one turn through the reactive loop, returning the raw [`ConnectResponse`] rather
    /// than the extracted text — used by the A2A-agent façade (§4.8's `agent` property), which
    /// needs the structured response to derive its `STATUS_UPDATE` payload.
    pub async fn connect_raw(
        &self,
        input: impl Into<ConnectInput>,
        mut options: ConnectRequestOptions,
        parent_task_id: impl Into<String>,
    ) -> Result<ConnectResponse, OrchestratorError> {
        // Ensure no add() is mid-flight before building the service list (§4.8: "a subsequent
        // `connect` awaits all pending adds") — `run_as_agent` drives every turn through this
        // path, so it needs the same guarantee `connect_with_options` already has.
        {
            let _guard = self.add_queue.lock().await;
        }

        let (tool_services, agent_services) = self.discover_services().await;
        options.tools.services = tool_services;
        options.agents.services = agent_services;

        let request = build_request(self.model_id.clone(), input.into(), options)?;
        let dispatch_options = self.dispatch_options(parent_task_id);
        reactive_loop::run(self.provider.as_ref(), &self.manager, request, dispatch_options).await
    }

    async fn discover_services(&self) -> (Vec<ToolService>, Vec<AgentService>) {
        let mut tool_services = Vec::new();
        let mut agent_services = Vec::new();
        for callable in self.manager.list().await {
            match callable {
                Callable::Tool(adapter) => {
                    if let Ok(service) = adapter.get_target().await {
                        tool_services.push(service);
                    } else {
                        log::warn!("skipping tool '{}': capability discovery failed", adapter.uri());
                    }
                }
                Callable::Agent(adapter) => {
                    if let Ok(service) = adapter.get_target().await {
                        agent_services.push(service);
                    } else {
                        log::warn!("skipping agent '{}': capability discovery failed", adapter.uri());
                    }
                }
            }
        }
        (tool_services, agent_services)
    }

    /// Parallel stop of every registered callable (§6 `close()`).
    pub async fn close(&self) {
        self.manager.stop().await;
    }

    /// Derives this orchestrator's agent card (§4.8 "Agent-card derivation"): name is
    /// `{modelId}-agent`, description identifies the LLM, and each registered service
    /// contributes one skill.
    pub async fn agent_card(&self) -> AgentInfo {
        let mut skills = Vec::new();
        for callable in self.manager.list().await {
            match callable {
                Callable::Tool(adapter) => {
                    if let Ok(info) = adapter.get_info().await {
                        skills.push(skill_from_tool(adapter.uri(), info));
                    }
                }
                Callable::Agent(adapter) => {
                    if let Ok(info) = adapter.get_info().await {
                        skills.push(skill_from_agent(adapter.uri(), info));
                    }
                }
            }
        }

        AgentInfo {
            name: format!("{}-agent", self.model_id),
            description: format!("An agentic orchestrator backed by the '{}' model", self.model_id),
            url: String::new(),
            skills,
        }
    }

    /// Subscribes to every `update`/`error` emitted across all registered services' contexts
    /// (§4.8 "Subscription surface", forwarded from the Monitor).
    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        self.monitor.on(handler)
    }

    pub fn off(&self, id: ListenerId) {
        self.monitor.off(id)
    }

    pub fn remove_all_listeners(&self) {
        self.monitor.remove_all_listeners()
    }

    pub fn listener_count(&self) -> usize {
        self.monitor.listener_count()
    }
}

fn skill_from_tool(uri: &str, info: &ToolInfo) -> AgentSkill {
    AgentSkill {
        id: uri.to_string(),
        name: info.implementation.name.clone(),
        description: info
            .instructions
            .clone()
            .unwrap_or_else(|| format!("Tool service '{}'", uri)),
        tags: vec!["tool".to_string()],
        examples: vec![],
    }
}

fn skill_from_agent(uri: &str, info: &AgentInfo) -> AgentSkill {
    AgentSkill {
        id: uri.to_string(),
        name: info.name.clone(),
        description: if info.description.is_empty() {
            format!("Agent service '{}'", uri)
        } else {
            info.description.clone()
        },
        tags: vec!["agent".to_string()],
        examples: vec![],
    }
}

/// Status values an [`AgentEngineEvent`] can carry, mirroring the A2A task status vocabulary
/// consumed by §4.8's `agent` property / §6's "Agent-as-a-service" contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEngineStatus {
    Submitted,
    Completed,
}

/// One event yielded by the orchestrator's A2A-agent façade engine: `{SUBMITTED_UPDATE}` then
/// `{STATUS_UPDATE(completed, finalText)}` (§6). Modeled as a push sink the caller drains rather
/// than an async generator — §9's "Async generator engines" re-architecture note.
#[derive(Debug, Clone)]
pub struct AgentEngineEvent {
    pub status: AgentEngineStatus,
    pub text: Option<String>,
}

impl Orchestrator {
    /// Runs the orchestrator as an A2A-compatible execution engine (§4.8's `agent` property):
    /// emits `SUBMITTED`, runs the reactive loop against `task_history` (harvested by the
    /// caller from the current task and its referenced tasks, filtering empties, per §4.8) plus
    /// the new user message, then emits `COMPLETED` with the final text.
    ///
    /// Modeled as a plain async function returning the two-event sequence rather than a
    /// generator/stream, since the engine always yields exactly these two events in order — no
    /// intermediate events are specified.
    pub async fn run_as_agent(
        &self,
        parent_task_id: impl Into<String>,
        new_user_message: Message,
        mut task_history: Vec<Message>,
    ) -> Result<(AgentEngineEvent, AgentEngineEvent), OrchestratorError> {
        let submitted = AgentEngineEvent {
            status: AgentEngineStatus::Submitted,
            text: None,
        };

        task_history.retain(|m| !m.content.is_empty());
        task_history.push(new_user_message);

        let response = self
            .connect_raw(task_history, ConnectRequestOptions::default(), parent_task_id)
            .await?;
        let text = extract_final_text(&response)?;

        let completed = AgentEngineEvent {
            status: AgentEngineStatus::Completed,
            text: Some(text),
        };

        Ok((submitted, completed))
    }
}
