//! Reactive loop: the provider ↔ services turn-based drive loop (§4.6).
//!
//! `tokio_util::sync::CancellationToken` realizes the abortSignal — the idiomatic cancellation
//! primitive for this style of code — threaded exactly as design note §9 prescribes rather than
//! invented per call. The loop itself is a plain `async fn`, no actor, no channel: §5 only calls
//! out "naturally expressed as parallel tasks with a bounded semaphore" for `Manager::call`, and
//! the loop's own iterations are strictly sequential per its ordering guarantee, so a
//! straight-line `loop { ... }` is the natural shape rather than introducing an abstraction this
//! loop doesn't need.

use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::manager::Manager;
use crate::cloudllm::provider::Provider;
use crate::cloudllm::types::{ConnectRequest, ConnectResponse, DispatchOptions, Message};

/// Fixed wording of the last-iteration hint (§4.6): injected as the final `messages` entry of
/// the request driving the final allowed provider call, instructing the assistant to stop
/// attempting further calls, summarise progress, and suggest next steps.
pub const MAX_ITERATIONS_SYSTEM_MESSAGE: &str = "You have reached the maximum number of tool/agent call iterations allowed for this turn. Do not attempt any further tool or agent calls. Summarize the progress made so far and suggest next steps to the user.";

/// Drives one `connect()` invocation's provider ↔ services dialogue to completion.
///
/// Runs at most `options.iterations` provider round-trips; on each, dispatches the provider's
/// emitted tool/agent requests through `manager`, feeds the resulting responses back into the
/// next request, and stops early once a round produces no calls at all. See §4.6's state
/// machine for the exact algorithm this mirrors line for line.
pub async fn run(
    provider: &dyn Provider,
    manager: &Manager,
    mut request: ConnectRequest,
    options: DispatchOptions,
) -> Result<ConnectResponse, OrchestratorError> {
    let mut iterations_left = options.iterations;
    let mut results = Vec::new();
    let mut response: Option<ConnectResponse> = None;

    loop {
        if iterations_left == 0 || options.cancel.is_cancelled() {
            break;
        }

        let is_last_iteration = iterations_left == 1;
        merge_results(&mut request, &results, is_last_iteration);

        log::debug!(
            "reactive loop: calling provider (iterations_left={}, last={})",
            iterations_left,
            is_last_iteration
        );

        if options.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancellation);
        }

        let provider_response = provider.call(request.clone(), options.cancel.clone()).await?;
        let calls = provider_response.all_requests();
        response = Some(provider_response);

        // §8 scenario (4): once the iteration budget's final allowed provider call has been
        // made, any calls it still emits are never dispatched — the loop returns that response
        // as-is rather than invoking Manager.call for it.
        if is_last_iteration {
            break;
        }

        if options.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancellation);
        }

        results = manager.call(calls, options.clone()).await;
        log::debug!("reactive loop: manager.call produced {} response(s)", results.len());

        // Adapter-level cancellation failures are caught and embedded into responses rather
        // than thrown (§7), so `results` can still come back non-empty even when cancellation
        // fired mid-dispatch — check explicitly instead of relying on the empty-results break.
        if options.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancellation);
        }

        if results.is_empty() {
            break;
        }

        iterations_left -= 1;
    }

    response.ok_or(OrchestratorError::NoResponse)
}

/// `merge(req, results, extra_msgs)` (§4.6): appends the previous iteration's tool/agent
/// responses into `req.options.*.responses`, and — only on the final allowed iteration —
/// appends the max-iterations hint to `req.messages`.
fn merge_results(
    request: &mut ConnectRequest,
    results: &[crate::cloudllm::types::ServiceResponse],
    inject_max_iterations_hint: bool,
) {
    use crate::cloudllm::types::ServiceResponse;

    for result in results {
        match result {
            ServiceResponse::ToolResponse(r) => request.options.tools.responses.push(r.clone()),
            ServiceResponse::AgentResponse(r) => request.options.agents.responses.push(r.clone()),
        }
    }

    if inject_max_iterations_hint {
        if let Some(hint) = Message::system(MAX_ITERATIONS_SYSTEM_MESSAGE) {
            request.messages.push(hint);
        }
    }
}
