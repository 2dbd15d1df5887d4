//! Orchestrator configuration.
//!
//! Provides [`OrchestratorConfig`], the systems-language realization of design-note "Global
//! mutable knobs `DEFAULT_CONCURRENCY` / `DEFAULT_ITERATIONS` — read once at initialization from
//! environment; inject as explicit fields on the orchestrator configuration thereafter" (§9).
//! This struct is intentionally minimal: no TOML/YAML parsing dependency is introduced, and
//! users may always construct one by hand instead of calling [`OrchestratorConfig::from_env`].
//!
//! # Example
//!
//! ```rust
//! use agentic_orchestrator::cloudllm::config::OrchestratorConfig;
//!
//! // Read DEFAULT_CONCURRENCY / DEFAULT_ITERATIONS / ARTINET_API_URL / ARTINET_LOG_FILE
//! // from the environment, falling back to the documented defaults.
//! let config = OrchestratorConfig::from_env();
//! assert!(config.default_concurrency >= 1);
//!
//! // Or construct one directly for tests.
//! let config = OrchestratorConfig {
//!     default_concurrency: 4,
//!     default_iterations: 2,
//!     api_url: None,
//!     log_file: None,
//! };
//! assert_eq!(config.default_iterations, 2);
//! ```

/// Default value of `DEFAULT_CONCURRENCY` (§6) when unset or unparsable.
pub const DEFAULT_CONCURRENCY: u32 = 10;

/// Default value of `DEFAULT_ITERATIONS` (§6) when unset or unparsable.
pub const DEFAULT_ITERATIONS: u32 = 10;

/// Global configuration for the orchestrator's reactive loop and dispatch layer.
///
/// Built once, typically via [`OrchestratorConfig::from_env`], and then threaded as an explicit
/// field rather than re-read from environment on every call.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Semaphore weight for [`Manager::call`](crate::cloudllm::manager::Manager::call)'s
    /// bounded fan-out. Env: `DEFAULT_CONCURRENCY`.
    pub default_concurrency: u32,

    /// Reactive-loop iteration budget used when a caller does not override it. Env:
    /// `DEFAULT_ITERATIONS`.
    pub default_iterations: u32,

    /// Default provider endpoint, consumed by a concrete HTTP
    /// [`Provider`](crate::cloudllm::provider::Provider) implementation (out of scope for the
    /// core itself). Env: `ARTINET_API_URL`.
    pub api_url: Option<String>,

    /// File path an embedding application may opt into for the `log` backend. The library's own
    /// code paths never depend on this being set — see [`init_logging_from_env`].
    /// Env: `ARTINET_LOG_FILE`.
    pub log_file: Option<String>,
}

impl OrchestratorConfig {
    /// Reads `DEFAULT_CONCURRENCY`, `DEFAULT_ITERATIONS`, `ARTINET_API_URL`, and
    /// `ARTINET_LOG_FILE` from the process environment, falling back to the documented defaults
    /// for the first two when unset or unparsable as a positive integer.
    pub fn from_env() -> Self {
        OrchestratorConfig {
            default_concurrency: parse_env_u32("DEFAULT_CONCURRENCY").unwrap_or(DEFAULT_CONCURRENCY),
            default_iterations: parse_env_u32("DEFAULT_ITERATIONS").unwrap_or(DEFAULT_ITERATIONS),
            api_url: std::env::var("ARTINET_API_URL").ok(),
            log_file: std::env::var("ARTINET_LOG_FILE").ok(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            default_concurrency: DEFAULT_CONCURRENCY,
            default_iterations: DEFAULT_ITERATIONS,
            api_url: None,
            log_file: None,
        }
    }
}

fn parse_env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok()).filter(|v| *v > 0)
}

/// Initializes the `env_logger` backend from [`OrchestratorConfig::log_file`], if set.
///
/// This is the thin opt-in init helper referenced by §1.1: the library's own modules call only
/// the `log` macros and never call `env_logger::init()` themselves, since a library must not
/// force a global logger on its embedder. Applications that want `ARTINET_LOG_FILE` honored can
/// call this once at startup instead.
pub fn init_logging_from_env(config: &OrchestratorConfig) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = &config.log_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.default_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.default_iterations, DEFAULT_ITERATIONS);
        assert!(config.api_url.is_none());
        assert!(config.log_file.is_none());
    }

    #[test]
    fn parse_env_u32_rejects_zero_and_garbage() {
        std::env::set_var("TEST_ORCH_KNOB", "0");
        assert_eq!(parse_env_u32("TEST_ORCH_KNOB"), None);
        std::env::set_var("TEST_ORCH_KNOB", "not-a-number");
        assert_eq!(parse_env_u32("TEST_ORCH_KNOB"), None);
        std::env::set_var("TEST_ORCH_KNOB", "42");
        assert_eq!(parse_env_u32("TEST_ORCH_KNOB"), Some(42));
        std::env::remove_var("TEST_ORCH_KNOB");
    }
}
