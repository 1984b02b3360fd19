//! Configuration management for grounded
//!
//! Configuration is a static TOML file loaded once at startup, overridden by
//! `GROUNDED_SECTION__KEY` environment variables, validated, and then shared
//! read-only by every component.

use crate::error::{GroundedError, Result};
use crate::generation::CircuitPolicy;
use crate::index::HnswParams;
use crate::orchestrator::OrchestratorSettings;
use crate::retrieval::{BoostRuleConfig, FusionConfig, RetrievalSettings, SignalWeights};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub citation: CitationConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Hybrid retrieval and index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub rrf_k: f32,
    pub candidate_pool: usize,
    pub per_signal_limit: usize,
    pub adapter_timeout: String,
    pub encoder_timeout: String,
    /// Up to this many vectors the dense index scans exhaustively
    pub exhaustive_search_threshold: usize,
    pub dense_dim: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub weights: SignalWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            candidate_pool: 50,
            per_signal_limit: 100,
            adapter_timeout: "2s".to_string(),
            encoder_timeout: "1s".to_string(),
            exhaustive_search_threshold: 10_000,
            dense_dim: 384,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            weights: SignalWeights::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn adapter_timeout(&self) -> Duration {
        parse_duration(&self.adapter_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn encoder_timeout(&self) -> Duration {
        parse_duration(&self.encoder_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn settings(&self) -> Result<RetrievalSettings> {
        let fusion = FusionConfig::new(self.rrf_k, self.weights)
            .map_err(|e| GroundedError::Config(e.to_string()))?;

        Ok(RetrievalSettings {
            fusion,
            candidate_pool: self.candidate_pool,
            per_signal_limit: self.per_signal_limit,
            adapter_timeout: self.adapter_timeout(),
            encoder_timeout: self.encoder_timeout(),
        })
    }

    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
            ..HnswParams::default()
        }
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub model: String,
    pub batch_limit: usize,
    pub timeout: String,
    pub boosts: Vec<BoostRuleConfig>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "BAAI/bge-reranker-base".to_string(),
            batch_limit: 50,
            timeout: "3s".to_string(),
            boosts: vec![BoostRuleConfig::formula()],
        }
    }
}

impl RerankConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(3))
    }
}

/// Citation extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationConfig {
    pub min_confidence: f32,
    pub max_context_chunks: usize,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            max_context_chunks: 8,
        }
    }
}

/// Circuit breaker configuration, shared by all providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub failure_window: String,
    pub base_delay: String,
    pub max_delay: String,
    pub probe_interval: String,
    /// Budget for one background probe of an open provider
    pub probe_timeout: String,
    pub latency_smoothing: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: "60s".to_string(),
            base_delay: "1s".to_string(),
            max_delay: "60s".to_string(),
            probe_interval: "1s".to_string(),
            probe_timeout: "10s".to_string(),
            latency_smoothing: 0.2,
        }
    }
}

impl CircuitConfig {
    pub fn policy(&self) -> CircuitPolicy {
        let defaults = CircuitPolicy::default();
        CircuitPolicy {
            failure_threshold: self.failure_threshold,
            failure_window: parse_duration(&self.failure_window).unwrap_or(defaults.failure_window),
            base_delay: parse_duration(&self.base_delay).unwrap_or(defaults.base_delay),
            max_delay: parse_duration(&self.max_delay).unwrap_or(defaults.max_delay),
            latency_smoothing: self.latency_smoothing,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        parse_duration(&self.probe_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(10))
    }
}

/// Query orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_in_flight: usize,
    pub default_deadline: String,
    pub default_top_k: usize,
    pub max_answer_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            default_deadline: "30s".to_string(),
            default_top_k: 8,
            max_answer_tokens: 512,
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_in_flight: self.max_in_flight,
            default_top_k: self.default_top_k,
            default_deadline: parse_duration(&self.default_deadline)
                .unwrap_or(Duration::from_secs(30)),
            max_answer_tokens: self.max_answer_tokens,
        }
    }
}

/// Query encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name, or "lexical" for the sparse-only encoder
    pub model: String,
    pub token_vectors: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            token_vectors: true,
        }
    }
}

/// One generation provider; list order is failover priority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_provider_timeout")]
    pub timeout: String,
}

fn default_provider_timeout() -> String {
    "20s".to_string()
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(20))
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        id: "local".to_string(),
        base_url: "http://localhost:11434/v1".to_string(),
        model: "llama3.1".to_string(),
        api_key_env: None,
        temperature: 0.1,
        timeout: default_provider_timeout(),
    }]
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    /// Provider ids to keep, in the listed order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GroundedError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| GroundedError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load from `path`, or defaults (plus env overrides) if the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(GroundedError::ConfigNotFound { path }) => {
                tracing::warn!("Config file {:?} not found, using defaults", path);
                let mut config = Self::default();
                config.apply_env_overrides();
                ConfigValidator::validate(&config)?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GroundedError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| GroundedError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| GroundedError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.rerank_enabled {
            self.rerank.enabled = enabled;
        }
        if let Some(max_in_flight) = overrides.max_in_flight {
            self.orchestrator.max_in_flight = max_in_flight;
        }
        if let Some(ids) = overrides.providers {
            let mut selected = Vec::with_capacity(ids.len());
            for id in &ids {
                let provider = self
                    .providers
                    .iter()
                    .find(|p| &p.id == id)
                    .cloned()
                    .ok_or_else(|| {
                        GroundedError::Config(format!(
                            "Profile {} references unknown provider {}",
                            profile, id
                        ))
                    })?;
                selected.push(provider);
            }
            self.providers = selected;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: GROUNDED_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        self.apply_overrides(vars);
    }

    /// Apply `(name, value)` pairs as if they were environment variables
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("GROUNDED_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RETRIEVAL__RRF_K" => self.retrieval.rrf_k = parse_value(path, value)?,
            "RETRIEVAL__CANDIDATE_POOL" => self.retrieval.candidate_pool = parse_value(path, value)?,
            "RETRIEVAL__ADAPTER_TIMEOUT" => self.retrieval.adapter_timeout = value.to_string(),
            "RETRIEVAL__ENCODER_TIMEOUT" => self.retrieval.encoder_timeout = value.to_string(),
            "RETRIEVAL__WEIGHTS__DENSE" => self.retrieval.weights.dense = parse_value(path, value)?,
            "RETRIEVAL__WEIGHTS__SPARSE" => self.retrieval.weights.sparse = parse_value(path, value)?,
            "RETRIEVAL__WEIGHTS__TOKEN" => self.retrieval.weights.token = parse_value(path, value)?,
            "RERANK__ENABLED" => self.rerank.enabled = parse_value(path, value)?,
            "RERANK__MODEL" => self.rerank.model = value.to_string(),
            "RERANK__TIMEOUT" => self.rerank.timeout = value.to_string(),
            "CIRCUIT__FAILURE_THRESHOLD" => {
                self.circuit.failure_threshold = parse_value(path, value)?
            }
            "CIRCUIT__BASE_DELAY" => self.circuit.base_delay = value.to_string(),
            "CIRCUIT__MAX_DELAY" => self.circuit.max_delay = value.to_string(),
            "CIRCUIT__PROBE_TIMEOUT" => self.circuit.probe_timeout = value.to_string(),
            "ORCHESTRATOR__MAX_IN_FLIGHT" => {
                self.orchestrator.max_in_flight = parse_value(path, value)?
            }
            "ORCHESTRATOR__DEFAULT_DEADLINE" => {
                self.orchestrator.default_deadline = value.to_string()
            }
            "ORCHESTRATOR__DEFAULT_TOP_K" => {
                self.orchestrator.default_top_k = parse_value(path, value)?
            }
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__TOKEN_VECTORS" => self.embedding.token_vectors = parse_value(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| GroundedError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("grounded").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            citation: CitationConfig::default(),
            circuit: CircuitConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            embedding: EmbeddingConfig::default(),
            providers: default_providers(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| GroundedError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a duration string such as `"250ms"`, `"5s"`, `"2m"` or `"1h"`.
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("5d"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("GROUNDED_ORCHESTRATOR__MAX_IN_FLIGHT".to_string(), "4".to_string()),
            ("GROUNDED_RERANK__ENABLED".to_string(), "false".to_string()),
            ("GROUNDED_RETRIEVAL__WEIGHTS__TOKEN".to_string(), "0.5".to_string()),
            ("GROUNDED_ORCHESTRATOR__DEFAULT_TOP_K".to_string(), "many".to_string()),
            ("OTHER_VAR".to_string(), "ignored".to_string()),
        ]);

        assert_eq!(config.orchestrator.max_in_flight, 4);
        assert!(!config.rerank.enabled);
        assert_eq!(config.retrieval.weights.token, 0.5);
        // Unparseable value keeps the previous setting
        assert_eq!(config.orchestrator.default_top_k, 8);
    }

    #[test]
    fn test_profile_selects_providers() {
        let mut config = Config::default();
        config.providers.push(ProviderConfig {
            id: "backup".to_string(),
            base_url: "http://backup:8000/v1".to_string(),
            model: "m".to_string(),
            api_key_env: None,
            temperature: 0.0,
            timeout: "5s".to_string(),
        });
        config.profiles.insert(
            "backup-only".to_string(),
            ProfileOverrides {
                rerank_enabled: Some(false),
                providers: Some(vec!["backup".to_string()]),
                ..Default::default()
            },
        );

        config.apply_profile("backup-only").unwrap();
        assert!(!config.rerank.enabled);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].id, "backup");
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let config = Config::default();
        let policy = config.circuit.policy();
        assert_eq!(policy.failure_threshold, 3);
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(config.retrieval.adapter_timeout(), Duration::from_secs(2));
        assert_eq!(config.retrieval.encoder_timeout(), Duration::from_secs(1));
        assert_eq!(config.circuit.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.orchestrator.settings().default_deadline, Duration::from_secs(30));
        assert!(config.retrieval.settings().is_ok());
    }
}
