//! Request/response normalization (§4.7).
//!
//! Accepts the flexible shapes callers may pass to `connect()` and folds them into a single
//! [`ConnectRequest`], and extracts the final assistant text out of a [`ConnectResponse`].
//! Favors `impl Into<String>`-style ergonomic constructors over runtime shape-sniffing:
//! [`ConnectInput`] is a plain enum with `From` impls rather than a dynamically-typed parameter.

use crate::cloudllm::error::OrchestratorError;
use crate::cloudllm::types::{
    ConnectInput, ConnectRequest, ConnectRequestOptions, ConnectResponse, Message,
};

/// Folds a [`ConnectInput`] plus caller-supplied options into the [`ConnectRequest`] the
/// reactive loop drives its first provider call with (§4.7).
pub fn build_request(
    model_id: impl Into<String>,
    input: ConnectInput,
    options: ConnectRequestOptions,
) -> Result<ConnectRequest, OrchestratorError> {
    let model_id = model_id.into();
    match input {
        ConnectInput::Text(text) => {
            let messages = match Message::user(text) {
                Some(m) => vec![m],
                None => vec![],
            };
            Ok(ConnectRequest { model_id, messages, options })
        }
        ConnectInput::Single(message) => Ok(ConnectRequest {
            model_id,
            messages: vec![message],
            options,
        }),
        ConnectInput::Session(session) => Ok(ConnectRequest {
            model_id,
            messages: session,
            options,
        }),
        ConnectInput::Request(request) => Ok(ConnectRequest {
            model_id: request.model_id,
            messages: request.messages,
            options,
        }),
    }
}

/// Extracts the final assistant text from a [`ConnectResponse`] per §4.7: the message's content
/// is always a plain string in this crate's [`Message`] shape, so the "object with a `text`
/// field" branch from the distilled spec (written against a dynamically-typed wire message)
/// collapses to the string case — retained here as a single code path rather than two, since
/// there is no second representation to distinguish in a typed `Message`.
pub fn extract_final_text(response: &ConnectResponse) -> Result<String, OrchestratorError> {
    match &response.message {
        Some(message) if !message.content.is_empty() => Ok(message.content.clone()),
        _ => Err(OrchestratorError::NoContent),
    }
}
