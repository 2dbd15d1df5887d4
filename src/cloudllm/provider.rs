//! The Provider contract (§4.1).
//!
//! A `Provider` is a strategy: a function from `(ConnectRequest, CancellationToken)` to a
//! `ConnectResponse` that may carry new tool/agent service calls. The core never inspects the
//! transport behind it — concrete providers (a direct HTTP provider, an OpenAI-shaped
//! chat-completion adapter) are out of scope for this crate and are expected to be supplied by
//! the embedding application.
//!
//! Modeled as a boxed async trait rather than a conversation-level chat-completion client: that
//! shape is a different seam — a candidate *implementation detail* inside an out-of-scope
//! concrete provider — never the whole-request/whole-response contract this crate drives its
//! reactive loop against.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::types::{ConnectRequest, ConnectResponse};

/// The future type returned by [`Provider::call`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ConnectResponse, OrchestratorError>> + Send + 'a>>;

/// Strategy trait a caller implements to bridge the reactive loop to an actual LLM backend.
///
/// Implementations MUST honour `cancel` by aborting any in-flight I/O and failing with
/// [`OrchestratorError::Cancellation`], and MUST return a well-formed [`ConnectResponse`] even on
/// LLM refusal or empty content — an empty `message` is allowed, and `options.*.requests` may be
/// omitted (callers should default it to empty rather than erroring).
pub trait Provider: Send + Sync {
    fn call<'a>(&'a self, request: ConnectRequest, cancel: CancellationToken) -> ProviderFuture<'a>;
}

/// Blanket impl so a plain async closure — the common case in tests and small embeddings — can
/// be passed anywhere a `Provider` is expected, without a wrapper struct. Keeps the trait-object
/// strategy seam satisfied directly by closures where the Rust type system allows it.
impl<F> Provider for F
where
    F: for<'a> Fn(ConnectRequest, CancellationToken) -> ProviderFuture<'a> + Send + Sync,
{
    fn call<'a>(&'a self, request: ConnectRequest, cancel: CancellationToken) -> ProviderFuture<'a> {
        (self)(request, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::types::{ConnectResponseOptions, Message};
    use chrono::Utc;

    fn stub_response(text: &str) -> ConnectResponse {
        ConnectResponse {
            timestamp: Utc::now(),
            message: Message::assistant(text),
            options: ConnectResponseOptions::default(),
        }
    }

    #[tokio::test]
    async fn closures_satisfy_the_provider_trait() {
        let provider: Box<dyn Provider> = Box::new(|_req: ConnectRequest, _cancel: CancellationToken| {
            Box::pin(async { Ok(stub_response("hi")) }) as ProviderFuture<'static>
        });

        let req = ConnectRequest {
            model_id: "stub".into(),
            messages: vec![],
            options: Default::default(),
        };
        let resp = provider.call(req, CancellationToken::new()).await.unwrap();
        assert_eq!(resp.message.unwrap().content, "hi");
    }
}
