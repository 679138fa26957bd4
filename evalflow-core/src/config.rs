//! Configuration types for the evaluation harness

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::agents::AgentRole;
use crate::error::{EvalFlowError, Result};

/// Default Gemini model used by the gateway
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash";

/// Default Generative Language API endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Main configuration for evalflow
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EvalFlowConfig {
    /// Model gateway configuration
    pub gateway: GatewayConfig,

    /// Prompt template configuration
    pub prompts: PromptConfig,

    /// Reference dataset configuration
    pub reference: ReferenceConfig,

    /// Conversation memory configuration
    pub memory: MemoryConfig,

    /// Scoring policy configuration
    pub scoring: ScoringConfig,

    /// Quality gate thresholds
    pub thresholds: ThresholdConfig,
}

/// Model gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Model identifier passed to the provider
    pub model: String,

    /// API key (prefer the GEMINI_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the generateContent endpoint
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Total attempts per generation (1 = no retry)
    pub max_attempts: usize,

    /// Per-agent model overrides keyed by lowercase role name (`kpi = "..."`)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 1,
            models: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Resolve the API key from config, then from `GEMINI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    /// Model override for `role`, if configured; keys match case-insensitively
    pub fn model_for(&self, role: AgentRole) -> Option<&str> {
        self.models
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(role.name()))
            .map(|(_, model)| model.as_str())
    }
}

/// Prompt template configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// Directory of `<name>.txt` templates overriding the built-ins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Reference dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Path to a `{"sales": {..}, "growth": {..}}` JSON file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<PathBuf>,
}

/// Lifetime of the key-value memory used by the memory agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Fresh store for every conversation
    Conversation,
    /// One store per orchestrator, kept across its conversations
    #[default]
    Orchestrator,
    /// A store handed in by the caller and shared between orchestrators.
    /// Concurrent conversations then observe each other's writes.
    Shared,
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemoryConfig {
    pub scope: MemoryScope,
}

/// How the orchestrator treats degraded (placeholder) model responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DegradedPolicy {
    /// Score the placeholder text like any other output
    #[default]
    Score,
    /// Score it, then scale the scores by the penalty factor
    Penalize,
    /// Record the step as failed
    Fail,
}

/// Which evaluator scores step outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    /// Deterministic token overlap
    #[default]
    Heuristic,
    /// LLM judge through the configured gateway model; heuristic without credentials
    Judge,
}

/// Scoring policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub evaluator: EvaluatorKind,

    pub degraded: DegradedPolicy,

    /// Multiplier applied under [`DegradedPolicy::Penalize`] (0.0-1.0)
    pub penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorKind::Heuristic,
            degraded: DegradedPolicy::Score,
            penalty: 0.5,
        }
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Minimum factual score for the KPI step
    pub kpi_factual: f64,

    /// Maximum hallucination score for the KPI step
    pub kpi_hallucination: f64,

    /// Minimum factual score for every other scored step
    pub generic_factual: f64,

    /// Maximum hallucination score for every other scored step
    pub generic_hallucination: f64,

    /// Maximum spread of a metric between agents in one report
    pub max_spread: f64,

    /// Maximum spread of a metric for one agent across repeated runs
    pub max_run_variance: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            kpi_factual: 0.7,
            kpi_hallucination: 0.25,
            generic_factual: 0.6,
            generic_hallucination: 0.35,
            max_spread: 0.20,
            max_run_variance: 0.10,
        }
    }
}

impl EvalFlowConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (evalflow.toml)
    /// 3. File named by EVALFLOW_CONFIG_PATH
    /// 4. Environment variable overrides (`EVALFLOW_GATEWAY__MODEL=...`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or a value is out of range.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(EvalFlowConfig::default()))
            .merge(Toml::file("evalflow.toml"));

        if let Ok(path) = std::env::var("EVALFLOW_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: EvalFlowConfig = figment
            .merge(Env::prefixed("EVALFLOW_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                EvalFlowError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(EvalFlowError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: EvalFlowConfig = Figment::from(Serialized::defaults(EvalFlowConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                EvalFlowError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.model.trim().is_empty() {
            return Err(EvalFlowError::Configuration(
                "gateway.model must not be empty".to_string(),
            ));
        }

        for (key, model) in &self.gateway.models {
            let role: AgentRole = key.parse()?;
            if role == AgentRole::Memory {
                return Err(EvalFlowError::Configuration(
                    "gateway.models.memory is not allowed: the memory agent never calls the model"
                        .to_string(),
                ));
            }
            if model.trim().is_empty() {
                return Err(EvalFlowError::Configuration(format!(
                    "gateway.models.{} must not be empty",
                    key
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.scoring.penalty) {
            return Err(EvalFlowError::Configuration(format!(
                "scoring.penalty must be within [0, 1], got {}",
                self.scoring.penalty
            )));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("kpi_factual", t.kpi_factual),
            ("kpi_hallucination", t.kpi_hallucination),
            ("generic_factual", t.generic_factual),
            ("generic_hallucination", t.generic_hallucination),
            ("max_spread", t.max_spread),
            ("max_run_variance", t.max_run_variance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EvalFlowError::Configuration(format!(
                    "thresholds.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvalFlowConfig::default();
        assert_eq!(config.gateway.model, DEFAULT_MODEL);
        assert_eq!(config.gateway.max_attempts, 1);
        assert_eq!(config.memory.scope, MemoryScope::Orchestrator);
        assert_eq!(config.scoring.degraded, DegradedPolicy::Score);
        assert_eq!(config.scoring.evaluator, EvaluatorKind::Heuristic);
        assert!(config.gateway.models.is_empty());
        assert_eq!(config.thresholds.kpi_factual, 0.7);
        assert_eq!(config.thresholds.generic_hallucination, 0.35);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = EvalFlowConfig::default();
        config.thresholds.kpi_factual = 1.5;
        assert!(config.validate().is_err());

        let mut config = EvalFlowConfig::default();
        config.scoring.penalty = -0.1;
        assert!(config.validate().is_err());

        let mut config = EvalFlowConfig::default();
        config.gateway.model = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = EvalFlowConfig::default();
        config.gateway.models.insert("planner".to_string(), "m".to_string());
        assert!(config.validate().is_err());

        let mut config = EvalFlowConfig::default();
        config.gateway.models.insert("memory".to_string(), "m".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_evaluator_and_models_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evalflow.toml");
        std::fs::write(
            &path,
            r#"
[gateway.models]
kpi = "models/gemini-2.5-pro"

[scoring]
evaluator = "judge"
"#,
        )
        .unwrap();

        let config = EvalFlowConfig::from_file(&path).unwrap();
        assert_eq!(config.scoring.evaluator, EvaluatorKind::Judge);
        assert_eq!(config.gateway.model_for(AgentRole::Kpi), Some("models/gemini-2.5-pro"));
        assert_eq!(config.gateway.model_for(AgentRole::Insight), None);
        assert_eq!(config.gateway.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evalflow.toml");
        std::fs::write(
            &path,
            r#"
[gateway]
model = "models/gemini-2.0-flash"
timeout = "5s"

[memory]
scope = "conversation"

[scoring]
degraded = "penalize"
penalty = 0.25
"#,
        )
        .unwrap();

        let config = EvalFlowConfig::from_file(&path).unwrap();
        assert_eq!(config.gateway.model, "models/gemini-2.0-flash");
        assert_eq!(config.gateway.timeout, Duration::from_secs(5));
        assert_eq!(config.gateway.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.memory.scope, MemoryScope::Conversation);
        assert_eq!(config.scoring.degraded, DegradedPolicy::Penalize);
        assert_eq!(config.scoring.penalty, 0.25);
        assert_eq!(config.thresholds.kpi_hallucination, 0.25);
    }

    #[test]
    fn test_from_file_missing() {
        let result = EvalFlowConfig::from_file("/nonexistent/evalflow.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_with_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "evalflow.toml",
                r#"
[thresholds]
kpi_factual = 0.8
"#,
            )?;
            jail.set_env("EVALFLOW_GATEWAY__MODEL", "models/custom");
            jail.set_env("EVALFLOW_SCORING__DEGRADED", "fail");
            jail.set_env("EVALFLOW_SCORING__EVALUATOR", "judge");

            let config = EvalFlowConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.thresholds.kpi_factual, 0.8);
            assert_eq!(config.gateway.model, "models/custom");
            assert_eq!(config.scoring.degraded, DegradedPolicy::Fail);
            assert_eq!(config.scoring.evaluator, EvaluatorKind::Judge);
            Ok(())
        });
    }
}
