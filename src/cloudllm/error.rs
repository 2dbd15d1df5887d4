//! Closed error taxonomy for the orchestrator (§7).
//!
//! A plain enum with manual [`std::fmt::Display`] and [`std::error::Error`] impls, no
//! `thiserror`/`anyhow` in the public surface. Most variants never reach a caller directly — per
//! the §7 propagation policy,
//! adapter-level failures (`AdapterFailure`) are captured and embedded into
//! [`AgentResponse`](crate::cloudllm::types::AgentResponse) /
//! [`ToolResponse`](crate::cloudllm::types::ToolResponse) instead of being thrown, and
//! dispatch-level failures (`CallableNotFound`, `RequestTypeMismatch`, `UriMismatch`) are logged
//! and the offending request is simply skipped. Only `ProviderFailure` and `Cancellation`
//! (plus the two named string errors in §7's "User-visible behavior") are ever returned from
//! [`Orchestrator::connect`](crate::cloudllm::orchestrator::Orchestrator::connect).

use std::error::Error;
use std::fmt;

/// The seven error kinds named in §7.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// An Agent/Tool adapter received a request addressed to a different uri.
    UriMismatch { expected: String, actual: String },

    /// [`Manager::call`](crate::cloudllm::manager::Manager::call) could not resolve a request's
    /// uri in the registry.
    CallableNotFound { uri: String },

    /// A callable's kind (agent/tool) disagreed with the request's kind.
    RequestTypeMismatch { uri: String },

    /// A provider-, network-, or subprocess-level failure inside an adapter's `execute`. This
    /// variant is the adapter's *internal* representation prior to being embedded into a
    /// response; it is never surfaced to the reactive loop as an `Err`.
    AdapterFailure { uri: String, message: String },

    /// The provider function failed or returned malformed data. Fatal to the reactive loop.
    ProviderFailure(String),

    /// The caller-supplied cancellation token fired.
    Cancellation,

    /// Not actually an error condition — retained only so exhaustive matches over the taxonomy
    /// stay honest. The reactive loop never constructs this variant; reaching the iteration
    /// budget is handled by injecting the max-iterations system message (§4.6) and returning
    /// normally.
    MaxIterations,

    /// `connect()` ran out of iterations without ever obtaining a response from the provider.
    NoResponse,

    /// The final assistant message carried no recognizable text content (§4.7).
    NoContent,

    /// The shape passed to `connect(input, ..)` did not match any recognized [`ConnectInput`]
    /// variant, or an `add()` service definition matched none of the recognized shapes (§4.8).
    InvalidInput(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::UriMismatch { expected, actual } => write!(
                f,
                "uri mismatch: adapter owns '{}' but received a request for '{}'",
                expected, actual
            ),
            OrchestratorError::CallableNotFound { uri } => {
                write!(f, "no callable registered for uri '{}'", uri)
            }
            OrchestratorError::RequestTypeMismatch { uri } => write!(
                f,
                "request kind does not match the callable kind registered for uri '{}'",
                uri
            ),
            OrchestratorError::AdapterFailure { uri, message } => {
                write!(f, "adapter failure for '{}': {}", uri, message)
            }
            OrchestratorError::ProviderFailure(msg) => write!(f, "provider failure: {}", msg),
            OrchestratorError::Cancellation => write!(f, "operation cancelled"),
            OrchestratorError::MaxIterations => write!(f, "max iterations reached"),
            OrchestratorError::NoResponse => write!(f, "No response from model"),
            OrchestratorError::NoContent => write!(f, "No content found in response"),
            OrchestratorError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl Error for OrchestratorError {}
