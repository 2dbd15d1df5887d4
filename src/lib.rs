// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-exporting key items for easier external access at the crate root.
pub use cloudllm::config::OrchestratorConfig;
pub use cloudllm::error::OrchestratorError;
pub use cloudllm::orchestrator::Orchestrator;
pub use cloudllm::provider::Provider;
pub use cloudllm::types::{ConnectInput, ConnectRequest, ConnectResponse, Message, Role, Session};
