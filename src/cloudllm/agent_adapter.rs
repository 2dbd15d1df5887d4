//! Agent adapter (A2A protocol) — §4.2.
//!
//! Encapsulates one A2A endpoint: message construction, per-parent task correlation, and error
//! normalization. The wire encoding of the A2A `sendMessage` RPC itself is out of scope per §1
//! (no vetted ecosystem crate for A2A exists), so the adapter is
//! transport-generic over a small [`A2aClient`] trait. This lets the session-correlation and
//! error-normalization logic be fully implemented and unit-tested against an in-memory stub,
//! while [`HttpA2aClient`] (built on `reqwest`) ships as the crate's one concrete implementation.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::monitor::{Context, MonitorEvent, MonitorState};
use crate::cloudllm::types::{
    new_id, AgentCall, AgentCallResult, AgentInfo, AgentRequest, AgentResponse, AgentService,
    DispatchOptions, Message, Role, ServiceKind,
};

/// One part of an outgoing A2A message. Only text parts are modeled — the part of the protocol
/// this crate's adapter constructs (§4.2 step 2).
#[derive(Debug, Clone)]
pub enum A2aPart {
    Text(String),
}

/// The message shape carried by the A2A `sendMessage` RPC (§6): role, parts, the sticky
/// `taskId`, and the `referenceTaskIds` accumulated for the parent task.
#[derive(Debug, Clone)]
pub struct A2aMessage {
    pub role: Role,
    pub parts: Vec<A2aPart>,
    pub task_id: String,
    pub reference_task_ids: Vec<String>,
}

/// Transport seam for one A2A endpoint. A concrete client wraps a remote agent handle or HTTP
/// connection; the [`AgentAdapter`] built on top of it never touches the wire format directly.
#[async_trait]
pub trait A2aClient: Send + Sync {
    /// Fetches the agent's card/capabilities. Called at most once per adapter lifetime by the
    /// single-flight [`AgentAdapter::get_info`].
    async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>>;

    /// Sends one message and returns the raw success payload, or an error describing the
    /// failure. The adapter never propagates this error upward — it is captured and normalized
    /// into an [`AgentResponse`] (§4.2 execute step 6).
    async fn send_message(
        &self,
        message: A2aMessage,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>>;

    /// Releases resources owned by this client. Only called by [`AgentAdapter::stop`] when the
    /// adapter instantiated the client itself rather than wrapping an existing handle — see
    /// [`AgentSource`].
    async fn stop(&self) {}
}

/// Distinguishes an adapter that owns its client's lifetime (instantiated from a definition)
/// from one that merely wraps a caller-owned handle (§3 Ownership, §4.2 "stop — release owned
/// resources only").
pub enum AgentSource {
    Wrapped(Arc<dyn A2aClient>),
    Owned(Arc<dyn A2aClient>),
}

impl AgentSource {
    fn client(&self) -> &Arc<dyn A2aClient> {
        match self {
            AgentSource::Wrapped(c) | AgentSource::Owned(c) => c,
        }
    }
}

/// Encapsulates one A2A endpoint: lazy/cached/single-flight capability discovery, sticky
/// per-parent task correlation, and error-normalized execution.
pub struct AgentAdapter {
    uri: String,
    source: AgentSource,
    info: OnceCell<AgentInfo>,
    monitor_context: Option<Arc<Context>>,
}

impl AgentAdapter {
    /// Wraps an existing A2A client; the caller retains ownership of its lifetime, so
    /// [`AgentAdapter::stop`] will not call [`A2aClient::stop`] on it.
    pub fn wrap(uri: impl Into<String>, client: Arc<dyn A2aClient>) -> Self {
        AgentAdapter {
            uri: uri.into(),
            source: AgentSource::Wrapped(client),
            info: OnceCell::new(),
            monitor_context: None,
        }
    }

    /// Adopts a freshly instantiated A2A client; the adapter exclusively owns it and will stop
    /// it on [`AgentAdapter::stop`].
    pub fn owned(uri: impl Into<String>, client: Arc<dyn A2aClient>) -> Self {
        AgentAdapter {
            uri: uri.into(),
            source: AgentSource::Owned(client),
            info: OnceCell::new(),
            monitor_context: None,
        }
    }

    pub fn with_monitor_context(mut self, context: Arc<Context>) -> Self {
        self.monitor_context = Some(context);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn kind(&self) -> ServiceKind {
        ServiceKind::Agent
    }

    /// Lazily loads and caches the agent's capabilities. Concurrent callers during loading
    /// observe the same pending result rather than triggering a second fetch — `OnceCell`'s
    /// `get_or_try_init` gives this single-flight behaviour directly (§9, "Lazy single-flight
    /// info loading").
    pub async fn get_info(&self) -> Result<&AgentInfo, OrchestratorError> {
        self.info
            .get_or_try_init(|| async {
                self.source
                    .client()
                    .get_info()
                    .await
                    .map_err(|e| OrchestratorError::AdapterFailure {
                        uri: self.uri.clone(),
                        message: e.to_string(),
                    })
            })
            .await
    }

    /// Returns the discovered service descriptor, loading info first if necessary. Only
    /// constructible once info has loaded at least once (§3 invariant).
    pub async fn get_target(&self) -> Result<AgentService, OrchestratorError> {
        let info = self.get_info().await?;
        Ok(AgentService {
            kind: ServiceKind::Agent,
            uri: self.uri.clone(),
            id: self.uri.clone(),
            info: info.clone(),
        })
    }

    /// Runs the full execute algorithm of §4.2: uri check, call normalization, sticky
    /// task-id/reference-id correlation, dispatch, and error-normalized response construction.
    /// Never returns an `Err` for adapter-level (transport) failures — those are embedded in the
    /// returned [`AgentResponse`] per the §7 propagation policy.
    pub async fn execute(
        &self,
        request: &AgentRequest,
        options: &DispatchOptions,
    ) -> Result<AgentResponse, OrchestratorError> {
        if request.uri != self.uri {
            return Err(OrchestratorError::UriMismatch {
                expected: self.uri.clone(),
                actual: request.uri.clone(),
            });
        }

        let message = self.normalize_call(&request.call, options).await;

        let result = self
            .source
            .client()
            .send_message(message, options.cancel.clone())
            .await;

        let response = match result {
            Ok(value) if value.is_null() => {
                let message = "unknown error".to_string();
                AgentResponse {
                    id: request.id.clone(),
                    uri: self.uri.clone(),
                    call: request.call.clone(),
                    result: AgentCallResult::Failure(message.clone()),
                    error: Some(message),
                }
            }
            Ok(value) => AgentResponse {
                id: request.id.clone(),
                uri: self.uri.clone(),
                call: request.call.clone(),
                result: AgentCallResult::Success(value),
                error: None,
            },
            Err(e) => {
                let message = e.to_string();
                AgentResponse {
                    id: request.id.clone(),
                    uri: self.uri.clone(),
                    call: request.call.clone(),
                    result: AgentCallResult::Failure(message.clone()),
                    error: Some(message),
                }
            }
        };

        if let Some(context) = &self.monitor_context {
            context.publish(MonitorEvent::Update {
                state: MonitorState::Response(crate::cloudllm::types::ServiceResponse::AgentResponse(
                    response.clone(),
                )),
                update: None,
            });
        }

        Ok(response)
    }

    /// Normalizes the request's `call` payload into an outgoing `A2aMessage`, performing the
    /// sticky per-parent task correlation of §4.2 step 3.
    async fn normalize_call(&self, call: &AgentCall, options: &DispatchOptions) -> A2aMessage {
        let (role, parts) = match call {
            AgentCall::Text(text) => (Role::User, vec![A2aPart::Text(text.clone())]),
            AgentCall::Message(msg) => (msg.role, vec![A2aPart::Text(msg.content.clone())]),
        };

        let mut tasks = options.tasks.lock().await;
        let parent_map = tasks.entry(options.parent_task_id.clone()).or_default();
        let task_id = parent_map
            .entry(self.uri.clone())
            .or_insert_with(new_id)
            .clone();
        let reference_task_ids: Vec<String> = parent_map.values().cloned().collect();

        A2aMessage {
            role,
            parts,
            task_id,
            reference_task_ids,
        }
    }

    /// Releases owned resources only: wrapped remote clients are left untouched (§4.2).
    pub async fn stop(&self) {
        if let AgentSource::Owned(client) = &self.source {
            client.stop().await;
        }
    }
}

/// The crate's one shipped [`A2aClient`]: an HTTP-backed implementation of the `sendMessage`
/// contract described in §6, built on `reqwest::Client`.
pub struct HttpA2aClient {
    http: reqwest::Client,
    base_url: String,
    agent_info: AgentInfo,
}

impl HttpA2aClient {
    pub fn new(base_url: impl Into<String>, agent_info: AgentInfo) -> Self {
        HttpA2aClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            agent_info,
        }
    }
}

#[async_trait]
impl A2aClient for HttpA2aClient {
    async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
        Ok(self.agent_info.clone())
    }

    async fn send_message(
        &self,
        message: A2aMessage,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
        let text = message
            .parts
            .iter()
            .map(|A2aPart::Text(t)| t.as_str())
            .collect::<Vec<_>>()
            .join("");

        let body = serde_json::json!({
            "message": {
                "role": role_wire(message.role),
                "parts": [{"type": "text", "text": text}],
                "taskId": message.task_id,
                "referenceTaskIds": message.reference_task_ids,
            }
        });

        let request = self.http.post(&self.base_url).json(&body).send();
        tokio::select! {
            _ = cancel.cancelled() => Err(Box::new(OrchestratorError::Cancellation) as Box<dyn Error + Send + Sync>),
            resp = request => {
                let resp = resp?;
                if !resp.status().is_success() {
                    return Err(format!("A2A endpoint returned status {}", resp.status()).into());
                }
                Ok(resp.json::<serde_json::Value>().await?)
            }
        }
    }
}

fn role_wire(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubClient {
        info_calls: AtomicUsize,
        info: AgentInfo,
        reply_prefix: String,
        seen_messages: Mutex<Vec<A2aMessage>>,
    }

    impl StubClient {
        fn new(name: &str) -> Self {
            StubClient {
                info_calls: AtomicUsize::new(0),
                info: AgentInfo {
                    name: name.to_string(),
                    description: "stub".into(),
                    url: "stub://".into(),
                    skills: vec![],
                },
                reply_prefix: "Echo: ".to_string(),
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl A2aClient for StubClient {
        async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.info.clone())
        }

        async fn send_message(
            &self,
            message: A2aMessage,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
            let A2aPart::Text(text) = &message.parts[0];
            let reply = format!("{}{}", self.reply_prefix, text);
            self.seen_messages.lock().unwrap().push(message);
            Ok(serde_json::json!({ "text": reply }))
        }
    }

    fn options() -> DispatchOptions {
        DispatchOptions::new("parent-1", 10, CancellationToken::new())
    }

    #[tokio::test]
    async fn execute_rejects_uri_mismatch() {
        let client = Arc::new(StubClient::new("echo"));
        let adapter = AgentAdapter::wrap("echo", client);
        let request = AgentRequest {
            id: "r1".into(),
            uri: "other".into(),
            caller_id: "c1".into(),
            call: AgentCall::Text("hi".into()),
        };
        let err = adapter.execute(&request, &options()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UriMismatch { .. }));
    }

    #[tokio::test]
    async fn execute_round_trips_the_request_id_and_embeds_the_result() {
        let client = Arc::new(StubClient::new("echo"));
        let adapter = AgentAdapter::wrap("echo", client);
        let request = AgentRequest {
            id: "r1".into(),
            uri: "echo".into(),
            caller_id: "c1".into(),
            call: AgentCall::Text("hello".into()),
        };
        let response = adapter.execute(&request, &options()).await.unwrap();
        assert_eq!(response.id, "r1");
        match response.result {
            AgentCallResult::Success(value) => {
                assert_eq!(value["text"], "Echo: hello");
            }
            AgentCallResult::Failure(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn execute_treats_a_null_result_as_unknown_error() {
        struct NullClient;
        #[async_trait]
        impl A2aClient for NullClient {
            async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
                Ok(AgentInfo {
                    name: "null".into(),
                    description: "stub".into(),
                    url: "stub://".into(),
                    skills: vec![],
                })
            }

            async fn send_message(
                &self,
                _message: A2aMessage,
                _cancel: CancellationToken,
            ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
                Ok(serde_json::Value::Null)
            }
        }

        let adapter = AgentAdapter::wrap("echo", Arc::new(NullClient));
        let request = AgentRequest {
            id: "r1".into(),
            uri: "echo".into(),
            caller_id: "c1".into(),
            call: AgentCall::Text("hello".into()),
        };
        let response = adapter.execute(&request, &options()).await.unwrap();
        assert!(matches!(response.result, AgentCallResult::Failure(_)));
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn get_info_is_single_flight_and_cached() {
        let client = Arc::new(StubClient::new("echo"));
        let adapter = Arc::new(AgentAdapter::wrap("echo", client.clone()));

        let a = adapter.clone();
        let b = adapter.clone();
        let (r1, r2) = tokio::join!(a.get_info(), b.get_info());
        r1.unwrap();
        r2.unwrap();
        adapter.get_info().await.unwrap();

        // `client` here is a clone of the Arc passed to the adapter, not a fresh stub — its
        // `info_calls` counter is the one the adapter actually drove.
        let calls = client.info_calls.load(Ordering::SeqCst);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn repeated_calls_for_the_same_parent_reuse_the_same_task_id() {
        let client = Arc::new(StubClient::new("echo"));
        let adapter = AgentAdapter::wrap("echo", client.clone());
        let opts = options();

        for _ in 0..3 {
            let request = AgentRequest {
                id: new_id(),
                uri: "echo".into(),
                caller_id: "c1".into(),
                call: AgentCall::Text("hi".into()),
            };
            adapter.execute(&request, &opts).await.unwrap();
        }

        let seen = client.seen_messages.lock().unwrap();
        let ids: std::collections::HashSet<_> = seen.iter().map(|m| m.task_id.clone()).collect();
        assert_eq!(ids.len(), 1, "expected a single sticky task id, saw {:?}", ids);
        for message in seen.iter() {
            assert!(message.reference_task_ids.contains(&message.task_id));
        }
    }

    #[tokio::test]
    async fn stop_releases_owned_clients_but_not_wrapped_ones() {
        struct StopCounter(AtomicUsize);
        #[async_trait]
        impl A2aClient for StopCounter {
            async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
                Ok(AgentInfo {
                    name: "x".into(),
                    description: "x".into(),
                    url: "x".into(),
                    skills: vec![],
                })
            }
            async fn send_message(
                &self,
                _m: A2aMessage,
                _c: CancellationToken,
            ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
                Ok(serde_json::Value::Null)
            }
            async fn stop(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let wrapped_client = Arc::new(StopCounter(AtomicUsize::new(0)));
        let wrapped = AgentAdapter::wrap("w", wrapped_client.clone());
        wrapped.stop().await;
        assert_eq!(wrapped_client.0.load(Ordering::SeqCst), 0);

        let owned_client = Arc::new(StopCounter(AtomicUsize::new(0)));
        let owned = AgentAdapter::owned("o", owned_client.clone());
        owned.stop().await;
        assert_eq!(owned_client.0.load(Ordering::SeqCst), 1);
    }
}
