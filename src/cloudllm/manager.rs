//! Manager: callable registry and bounded-concurrency fan-out dispatcher (§4.4).
//!
//! The registry half is `HashMap`-backed, read/write guarded by `tokio::sync::RwLock`,
//! generalized from a name-keyed single-kind map into a uri-keyed map of a [`Callable`] enum
//! (§9, "Callable polymorphism"). The fan-out half spawns one `tokio::spawn` per unit of work,
//! settled with `futures_util::future::join_all` into a result `Vec`, with failures logged
//! rather than propagated. A bounded semaphore is added per §9's "Settle-style fan-out" note.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{RwLock, Semaphore};

use crate::cloudllm::agent_adapter::AgentAdapter;
use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::tool_adapter::ToolAdapter;
use crate::cloudllm::types::{DispatchOptions, ServiceKind, ServiceRequest, ServiceResponse};

/// Either kind of callable the Manager can dispatch to, tagged by a cheap discriminator so
/// `Manager::call` can type-check a request against its target without downcasting (§9).
#[derive(Clone)]
pub enum Callable {
    Agent(Arc<AgentAdapter>),
    Tool(Arc<ToolAdapter>),
}

impl Callable {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Callable::Agent(_) => ServiceKind::Agent,
            Callable::Tool(_) => ServiceKind::Tool,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Callable::Agent(a) => a.uri(),
            Callable::Tool(t) => t.uri(),
        }
    }

    /// Stops the underlying adapter. Used by [`Manager::stop`]'s parallel shutdown.
    pub async fn stop(&self) {
        match self {
            Callable::Agent(a) => a.stop().await,
            Callable::Tool(t) => t.stop().await,
        }
    }
}

/// Registry of callables keyed by uri, plus the bounded-concurrency dispatcher of §4.4.
///
/// The registry map is exclusively owned by the Manager (§3 Ownership); external serialization
/// of concurrent `add`s is the facade's responsibility (§4.8), not this type's — lookups here
/// are plain non-blocking reads once a write completes.
pub struct Manager {
    callables: RwLock<HashMap<String, Callable>>,
    default_concurrency: u32,
}

impl Manager {
    pub fn new(default_concurrency: u32) -> Self {
        Manager {
            callables: RwLock::new(HashMap::new()),
            default_concurrency,
        }
    }

    pub async fn set(&self, uri: impl Into<String>, callable: Callable) {
        self.callables.write().await.insert(uri.into(), callable);
    }

    pub async fn get(&self, uri: &str) -> Option<Callable> {
        self.callables.read().await.get(uri).cloned()
    }

    pub async fn delete(&self, uri: &str) -> Option<Callable> {
        self.callables.write().await.remove(uri)
    }

    pub async fn list(&self) -> Vec<Callable> {
        self.callables.read().await.values().cloned().collect()
    }

    pub async fn uris(&self) -> Vec<String> {
        self.callables.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.callables.read().await.len()
    }

    /// Stops every registered callable in parallel (§4.4 `stop()`), one `tokio::spawn` per
    /// callable. Individual stop failures are swallowed — `A2aClient::stop`/`ToolAdapter::stop`
    /// are themselves infallible per their own signatures.
    pub async fn stop(&self) {
        let callables = self.list().await;
        let tasks: Vec<_> = callables
            .into_iter()
            .map(|c| tokio::spawn(async move { c.stop().await }))
            .collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                log::warn!("manager stop: task join error: {}", e);
            }
        }
    }

    /// The bounded-concurrency fan-out dispatcher (§4.4 "Dispatch"). Settle-style: one request's
    /// failure, missing registration, or kind mismatch is logged and skipped — it never aborts
    /// peers or propagates an `Err` from this function. Response order is unspecified; callers
    /// correlate by `response.id()` (§8, "set semantics").
    pub async fn call(
        &self,
        requests: Vec<ServiceRequest>,
        options: DispatchOptions,
    ) -> Vec<ServiceResponse> {
        if requests.is_empty() {
            return Vec::new();
        }

        let weight = std::cmp::min(self.default_concurrency as usize, requests.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(weight));

        let mut tasks = Vec::with_capacity(requests.len());
        for request in requests {
            let semaphore = semaphore.clone();
            let options = options.clone();
            let callable = self.get(request.uri()).await;

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                dispatch_one(callable, request, options).await
            }));
        }

        let mut responses = Vec::with_capacity(tasks.len());
        for result in join_all(tasks).await {
            match result {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(e) => log::warn!("manager dispatch: task join error: {}", e),
            }
        }
        responses
    }
}

/// Looks up, type-checks, and executes a single request (§4.4 dispatch steps a-c). Returns
/// `None` (log-and-skip) for `CallableNotFound`, `RequestTypeMismatch`, `UriMismatch`, or any
/// `AdapterFailure` bubbling out of `execute` itself — per §7, those three dispatch-level kinds
/// are logged and ignored, never surfaced as an error from `Manager::call`.
async fn dispatch_one(
    callable: Option<Callable>,
    request: ServiceRequest,
    options: DispatchOptions,
) -> Option<ServiceResponse> {
    let callable = match callable {
        Some(c) => c,
        None => {
            log::warn!("no callable registered for uri '{}'; skipping request {}", request.uri(), request.id());
            return None;
        }
    };

    match (callable, request) {
        (Callable::Agent(adapter), ServiceRequest::AgentRequest(request)) => {
            match adapter.execute(&request, &options).await {
                Ok(response) => Some(ServiceResponse::AgentResponse(response)),
                Err(e) => {
                    log::warn!("agent execute failed for '{}': {}", request.uri, e);
                    None
                }
            }
        }
        (Callable::Tool(adapter), ServiceRequest::ToolRequest(request)) => {
            match adapter.execute(&request, &options).await {
                Ok(response) => Some(ServiceResponse::ToolResponse(response)),
                Err(e) => {
                    log::warn!("tool execute failed for '{}': {}", request.uri, e);
                    None
                }
            }
        }
        (callable, request) => {
            log::warn!(
                "request kind for '{}' does not match callable kind ({:?} vs {:?}); skipping",
                request.uri(),
                request.kind(),
                callable.kind(),
            );
            None
        }
    }
}
