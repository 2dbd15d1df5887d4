//! End-to-end reactive-loop scenarios, grounded directly in §8's six numbered scenarios.
//! Built from stub `Provider`s and stub `A2aClient`s exactly as §1.1's test-tooling section
//! describes, driving the orchestrator end-to-end against mock clients rather than real LLM
//! backends.

use agentic_orchestrator::cloudllm::agent_adapter::{A2aClient, A2aMessage, A2aPart, AgentAdapter};
use agentic_orchestrator::cloudllm::config::OrchestratorConfig;
use agentic_orchestrator::cloudllm::provider::{Provider, ProviderFuture};
use agentic_orchestrator::cloudllm::types::{
    AgentCall, AgentInfo, AgentRequest, AgentResponseOptions, ConnectRequest, ConnectResponse,
    ConnectResponseOptions, Message,
};
use agentic_orchestrator::{Orchestrator, OrchestratorError};
use async_trait::async_trait;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct EchoAgentClient;

#[async_trait]
impl A2aClient for EchoAgentClient {
    async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
        Ok(AgentInfo {
            name: "echo".into(),
            description: "replies Echo: <input>".into(),
            url: "stub://echo".into(),
            skills: vec![],
        })
    }

    async fn send_message(
        &self,
        message: A2aMessage,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
        let A2aPart::Text(text) = &message.parts[0];
        Ok(serde_json::json!({ "text": format!("Echo: {}", text) }))
    }
}

/// Scenario (1): echo-string pass-through.
#[tokio::test]
async fn echo_string_pass_through() {
    struct StubProvider {
        calls: AtomicUsize,
    }
    impl Provider for StubProvider {
        fn call<'a>(&'a self, request: ConnectRequest, _cancel: CancellationToken) -> ProviderFuture<'a> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Ok(ConnectResponse {
                        timestamp: chrono::Utc::now(),
                        message: Message::assistant("calling echo"),
                        options: ConnectResponseOptions {
                            tools: Default::default(),
                            agents: AgentResponseOptions {
                                requests: vec![AgentRequest {
                                    id: "r1".into(),
                                    uri: "echo".into(),
                                    caller_id: "c1".into(),
                                    call: AgentCall::Text("hello".into()),
                                }],
                            },
                        },
                    })
                } else {
                    assert_eq!(request.options.agents.responses.len(), 1);
                    assert_eq!(request.options.agents.responses[0].id, "r1");
                    Ok(ConnectResponse {
                        timestamp: chrono::Utc::now(),
                        message: Message::assistant("done"),
                        options: ConnectResponseOptions::default(),
                    })
                }
            })
        }
    }

    let provider = StubProvider { calls: AtomicUsize::new(0) };
    let orchestrator = Orchestrator::with_config("m", provider, OrchestratorConfig::default());
    orchestrator.add("echo", Arc::new(EchoAgentClient)).await;

    let updates = Arc::new(AtomicUsize::new(0));
    let updates_clone = updates.clone();
    orchestrator.on(move |_event| {
        updates_clone.fetch_add(1, Ordering::SeqCst);
    });

    let text = orchestrator.connect("hello").await.unwrap();
    assert_eq!(text, "done");
    assert_eq!(updates.load(Ordering::SeqCst), 1, "exactly one update event from the echo agent");
}

/// Scenario (3): cancellation mid-loop.
#[tokio::test]
async fn cancellation_mid_loop() {
    struct SlowAgentClient;
    #[async_trait]
    impl A2aClient for SlowAgentClient {
        async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
            Ok(AgentInfo {
                name: "slow".into(),
                description: "slow".into(),
                url: "stub://slow".into(),
                skills: vec![],
            })
        }
        async fn send_message(
            &self,
            _message: A2aMessage,
            cancel: CancellationToken,
        ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
            tokio::select! {
                _ = cancel.cancelled() => Err("cancelled".into()),
                _ = tokio::time::sleep(Duration::from_millis(500)) => Ok(serde_json::json!({"text": "too slow"})),
            }
        }
    }

    struct AlwaysCallProvider;
    impl Provider for AlwaysCallProvider {
        fn call<'a>(&'a self, _request: ConnectRequest, _cancel: CancellationToken) -> ProviderFuture<'a> {
            Box::pin(async move {
                Ok(ConnectResponse {
                    timestamp: chrono::Utc::now(),
                    message: Message::assistant("calling slow agent"),
                    options: ConnectResponseOptions {
                        tools: Default::default(),
                        agents: AgentResponseOptions {
                            requests: vec![AgentRequest {
                                id: "r1".into(),
                                uri: "slow".into(),
                                caller_id: "c1".into(),
                                call: AgentCall::Text("hi".into()),
                            }],
                        },
                    },
                })
            })
        }
    }

    let cancel = CancellationToken::new();
    let orchestrator =
        Orchestrator::with_config("m", AlwaysCallProvider, OrchestratorConfig::default()).with_cancellation(cancel.clone());
    orchestrator.add("slow", Arc::new(SlowAgentClient)).await;

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel_clone.cancel();
    });

    // The agent's send_message observes cancellation and returns an error, which the adapter
    // embeds in the response rather than propagating — so the reactive loop itself only fails
    // once its own cancellation check fires at the next loop-iteration boundary.
    let result = tokio::time::timeout(Duration::from_secs(2), orchestrator.connect("go"))
        .await
        .expect("connect must not hang past the cancellation");
    assert!(
        matches!(result, Err(OrchestratorError::Cancellation)),
        "connect must reject with a cancellation error, got {:?}",
        result
    );
}

/// Scenario (5): unknown-uri tolerance.
#[tokio::test]
async fn unknown_uri_tolerance() {
    struct StubProvider {
        calls: AtomicUsize,
    }
    impl Provider for StubProvider {
        fn call<'a>(&'a self, _request: ConnectRequest, _cancel: CancellationToken) -> ProviderFuture<'a> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Ok(ConnectResponse {
                        timestamp: chrono::Utc::now(),
                        message: Message::assistant("calling ghost"),
                        options: ConnectResponseOptions {
                            tools: agentic_orchestrator::cloudllm::types::ToolResponseOptions {
                                requests: vec![agentic_orchestrator::cloudllm::types::ToolRequest {
                                    id: "r1".into(),
                                    uri: "ghost".into(),
                                    caller_id: "c1".into(),
                                    call: agentic_orchestrator::cloudllm::types::ToolCall {
                                        name: "whatever".into(),
                                        arguments: serde_json::Value::Null,
                                    },
                                }],
                            },
                            agents: Default::default(),
                        },
                    })
                } else {
                    Ok(ConnectResponse {
                        timestamp: chrono::Utc::now(),
                        message: Message::assistant("done"),
                        options: ConnectResponseOptions::default(),
                    })
                }
            })
        }
    }

    let orchestrator = Orchestrator::with_config("m", StubProvider { calls: AtomicUsize::new(0) }, OrchestratorConfig::default());
    let text = orchestrator.connect("hi").await.unwrap();
    assert_eq!(text, "done");
}

/// Scenario (6): task-id stickiness across iterations.
#[tokio::test]
async fn task_id_stickiness_across_iterations() {
    struct RecordingAgentClient {
        seen_task_ids: std::sync::Mutex<Vec<String>>,
    }
    #[async_trait]
    impl A2aClient for RecordingAgentClient {
        async fn get_info(&self) -> Result<AgentInfo, Box<dyn Error + Send + Sync>> {
            Ok(AgentInfo {
                name: "a".into(),
                description: "a".into(),
                url: "stub://a".into(),
                skills: vec![],
            })
        }
        async fn send_message(
            &self,
            message: A2aMessage,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
            self.seen_task_ids.lock().unwrap().push(message.task_id.clone());
            assert!(message.reference_task_ids.contains(&message.task_id));
            Ok(serde_json::json!({"text": "ok"}))
        }
    }

    struct StubProvider {
        calls: AtomicUsize,
    }
    impl Provider for StubProvider {
        fn call<'a>(&'a self, _request: ConnectRequest, _cancel: CancellationToken) -> ProviderFuture<'a> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let requests = match n {
                    0 => vec![
                        AgentRequest { id: "r1".into(), uri: "a".into(), caller_id: "c".into(), call: AgentCall::Text("one".into()) },
                        AgentRequest { id: "r2".into(), uri: "a".into(), caller_id: "c".into(), call: AgentCall::Text("two".into()) },
                    ],
                    1 => vec![AgentRequest { id: "r3".into(), uri: "a".into(), caller_id: "c".into(), call: AgentCall::Text("three".into()) }],
                    _ => vec![],
                };
                Ok(ConnectResponse {
                    timestamp: chrono::Utc::now(),
                    message: Message::assistant(format!("turn {}", n)),
                    options: ConnectResponseOptions {
                        tools: Default::default(),
                        agents: AgentResponseOptions { requests },
                    },
                })
            })
        }
    }

    let client = Arc::new(RecordingAgentClient { seen_task_ids: std::sync::Mutex::new(vec![]) });
    let orchestrator = Orchestrator::with_config("m", StubProvider { calls: AtomicUsize::new(0) }, OrchestratorConfig::default());
    orchestrator.add("a", client.clone()).await;

    orchestrator.connect("go").await.unwrap();

    let seen = client.seen_task_ids.lock().unwrap();
    assert_eq!(seen.len(), 3, "three agent calls across two iterations");
    let unique: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 1, "all three calls share the same sticky task id, saw {:?}", seen);
}

/// Shows the `AgentAdapter`/`A2aClient` seam used above is exercised end-to-end, not just
/// mocked away — a minimal double-wrap sanity check (§8 "Double-wrap idempotence").
#[tokio::test]
async fn wrapping_an_agent_adapter_twice_preserves_its_uri_and_info() {
    let client: Arc<dyn A2aClient> = Arc::new(EchoAgentClient);
    let adapter = AgentAdapter::wrap("echo", client.clone());
    let info_a = adapter.get_info().await.unwrap().clone();

    let rewrapped = AgentAdapter::wrap("echo", client);
    let info_b = rewrapped.get_info().await.unwrap().clone();

    assert_eq!(adapter.uri(), rewrapped.uri());
    assert_eq!(info_a.name, info_b.name);
}
