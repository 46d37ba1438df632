//! YAML configuration for a draftloom run.
//!
//! ```yaml
//! generation:
//!   max_concurrent_tasks: 5
//!   max_depth: 4
//!   call_timeout_secs: 120
//!   task_timeout_secs: 1800
//!
//! retry:            # per external call
//!   max_attempts: 3
//!   initial_delay_ms: 1000
//!
//! task_retry:       # whole task, driven by the dispatcher
//!   max_retries: 3
//!   base_delay_secs: 60
//!   max_delay_secs: 300
//!
//! validation:
//!   leaf: { min: 1000, max: 2000 }
//!   parent: { min: 400, max: 900 }
//!
//! workflow:
//!   enable_analysis: true
//!   enable_differentiation: true
//!   enable_validation: true
//!
//! provider:
//!   adapter: openai
//!   base_url: "${DRAFTLOOM_BASE_URL:-https://api.deepseek.com}"
//!   api_key: "${DRAFTLOOM_API_KEY}"
//!   model: "deepseek-chat"
//! ```
//!
//! Every field is optional; missing values fall back to the defaults above.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DraftError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub generation: GenerationSettings,
    pub retry: CallRetrySettings,
    pub task_retry: TaskRetrySettings,
    pub validation: ValidationSettings,
    pub workflow: WorkflowSettings,
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Cap on in-flight calls to the generation service, shared by every pass.
    pub max_concurrent_tasks: usize,
    /// Deepest outline level kept; deeper headings are clamped.
    pub max_depth: usize,
    pub call_timeout_secs: u64,
    /// Time budget of one run or resume. Each resume starts a fresh budget,
    /// so a task that timed out can be retried.
    pub task_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            max_depth: 4,
            call_timeout_secs: 120,
            task_timeout_secs: 1800,
        }
    }
}

impl GenerationSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Retry budget for a single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallRetrySettings {
    /// Total attempts per request, the first one included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for CallRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry budget for a whole task. Kept apart from [`CallRetrySettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for TaskRetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 60,
            max_delay_secs: 300,
        }
    }
}

impl TaskRetrySettings {
    /// Delay before task retry number `retry` (0-based): `min(max, base * 2^retry)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

/// Inclusive length bounds, counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub leaf: LengthBounds,
    pub parent: LengthBounds,
    pub outline_min_chars: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            leaf: LengthBounds::new(1000, 2000),
            parent: LengthBounds::new(400, 900),
            outline_min_chars: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Analyse requirements and scoring criteria before generating an outline.
    pub enable_analysis: bool,
    pub enable_differentiation: bool,
    pub enable_validation: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            enable_analysis: true,
            enable_differentiation: true,
            enable_validation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// "anthropic" or "openai" (any OpenAI-compatible endpoint).
    pub adapter: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            adapter: "openai".to_string(),
            base_url: "${DRAFTLOOM_BASE_URL:-https://api.deepseek.com}".to_string(),
            api_key: "${DRAFTLOOM_API_KEY:-}".to_string(),
            model: "${DRAFTLOOM_MODEL:-deepseek-chat}".to_string(),
            temperature: Some(0.2),
            max_tokens: 4000,
        }
    }
}

impl DraftConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, DraftError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| DraftError::Config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self, DraftError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DraftError::Config(format!("Failed to read config file '{}': {}", path, e)))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String, DraftError> {
        serde_yaml::to_string(self)
            .map_err(|e| DraftError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.generation.max_concurrent_tasks == 0 {
            return Err(DraftError::Config(
                "generation.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.generation.max_depth == 0 {
            return Err(DraftError::Config(
                "generation.max_depth must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DraftError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, bounds) in [("leaf", self.validation.leaf), ("parent", self.validation.parent)] {
            if bounds.min > bounds.max {
                return Err(DraftError::Config(format!(
                    "validation.{}: min ({}) exceeds max ({})",
                    name, bounds.min, bounds.max
                )));
            }
        }
        Ok(())
    }

    /// Provider settings with `${VAR}` references expanded.
    pub fn resolved_provider(&self) -> ProviderSettings {
        let p = &self.provider;
        ProviderSettings {
            adapter: resolve_env_vars(&p.adapter),
            base_url: resolve_env_vars(&p.base_url),
            api_key: resolve_env_vars(&p.api_key),
            model: resolve_env_vars(&p.model),
            temperature: p.temperature,
            max_tokens: p.max_tokens,
        }
    }
}

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env reference pattern is valid"));

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let var_expr = &caps[1];
            if let Some(idx) = var_expr.find(":-") {
                let var_name = &var_expr[..idx];
                let default_val = &var_expr[idx + 2..];
                std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
            } else {
                std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = DraftConfig::from_yaml("{}").unwrap();
        assert_eq!(config.generation.max_concurrent_tasks, 5);
        assert_eq!(config.generation.max_depth, 4);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.validation.leaf, LengthBounds::new(1000, 2000));
        assert_eq!(config.validation.parent, LengthBounds::new(400, 900));
        assert!(config.workflow.enable_differentiation);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
generation:
  max_concurrent_tasks: 2
validation:
  leaf: { min: 10, max: 50 }
workflow:
  enable_differentiation: false
"#;
        let config = DraftConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.generation.max_concurrent_tasks, 2);
        assert_eq!(config.generation.max_depth, 4);
        assert_eq!(config.validation.leaf, LengthBounds::new(10, 50));
        assert!(!config.workflow.enable_differentiation);
        assert!(config.workflow.enable_validation);
        assert!(config.workflow.enable_analysis);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = DraftConfig::from_yaml("generation:\n  max_concurrent_tasks: 0\n").unwrap_err();
        assert!(matches!(err, DraftError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let err = DraftConfig::from_yaml("validation:\n  parent: { min: 900, max: 400 }\n")
            .unwrap_err();
        assert!(err.to_string().contains("validation.parent"));
    }

    #[test]
    fn test_task_retry_delay_is_capped() {
        let settings = TaskRetrySettings::default();
        assert_eq!(settings.delay_for_retry(0), Duration::from_secs(60));
        assert_eq!(settings.delay_for_retry(1), Duration::from_secs(120));
        assert_eq!(settings.delay_for_retry(2), Duration::from_secs(240));
        assert_eq!(settings.delay_for_retry(3), Duration::from_secs(300));
        assert_eq!(settings.delay_for_retry(40), Duration::from_secs(300));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("DRAFTLOOM_TEST_CONFIG_VAR", "hello");
        assert_eq!(resolve_env_vars("${DRAFTLOOM_TEST_CONFIG_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix-${DRAFTLOOM_TEST_CONFIG_VAR}-suffix"),
            "prefix-hello-suffix"
        );
        assert_eq!(resolve_env_vars("${DRAFTLOOM_NONEXISTENT_VAR:-fallback}"), "fallback");
        assert_eq!(resolve_env_vars("${DRAFTLOOM_NONEXISTENT_VAR}"), "${DRAFTLOOM_NONEXISTENT_VAR}");
        std::env::remove_var("DRAFTLOOM_TEST_CONFIG_VAR");
    }
}
