use crate::config::{parse_duration, Config};
use crate::error::{GroundedError, Result, ValidationError};
use regex::Regex;
use std::collections::HashSet;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        // Validate schema version
        Self::validate_schema_version(config, &mut errors);

        // Validate retrieval and index settings
        Self::validate_retrieval(config, &mut errors);

        // Validate rerank settings and boost rules
        Self::validate_rerank(config, &mut errors);

        // Validate citation settings
        Self::validate_citation(config, &mut errors);

        // Validate circuit breaker settings
        Self::validate_circuit(config, &mut errors);

        // Validate orchestrator limits
        Self::validate_orchestrator(config, &mut errors);

        // Validate encoder settings
        Self::validate_embedding(config, &mut errors);

        // Validate provider list
        Self::validate_providers(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GroundedError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF constant must be a non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        let weights = [
            ("dense", retrieval.weights.dense),
            ("sparse", retrieval.weights.sparse),
            ("token", retrieval.weights.token),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    format!("retrieval.weights.{}", name),
                    format!("Weight must be non-negative, got {}", weight),
                ));
            }
        }
        if weights.iter().all(|(_, w)| *w == 0.0) {
            errors.push(ValidationError::new(
                "retrieval.weights",
                "At least one signal weight must be positive",
            ));
        }

        Self::require_positive(retrieval.candidate_pool, "retrieval.candidate_pool", errors);
        Self::require_positive(retrieval.per_signal_limit, "retrieval.per_signal_limit", errors);
        Self::require_positive(retrieval.dense_dim, "retrieval.dense_dim", errors);
        Self::require_positive(retrieval.hnsw_m, "retrieval.hnsw_m", errors);
        Self::require_positive(
            retrieval.hnsw_ef_construction,
            "retrieval.hnsw_ef_construction",
            errors,
        );
        Self::require_positive(retrieval.hnsw_ef_search, "retrieval.hnsw_ef_search", errors);
        Self::require_duration(&retrieval.adapter_timeout, "retrieval.adapter_timeout", errors);
        Self::require_duration(&retrieval.encoder_timeout, "retrieval.encoder_timeout", errors);
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let rerank = &config.rerank;

        Self::require_positive(rerank.batch_limit, "rerank.batch_limit", errors);
        Self::require_duration(&rerank.timeout, "rerank.timeout", errors);

        if rerank.enabled && rerank.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "rerank.model",
                "Reranker model cannot be empty when reranking is enabled",
            ));
        }

        for (idx, rule) in rerank.boosts.iter().enumerate() {
            let path = format!("rerank.boosts[{}]", idx);
            if rule.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.name", path),
                    "Boost rule name cannot be empty",
                ));
            }
            if let Err(e) = Regex::new(&rule.pattern) {
                errors.push(ValidationError::new(
                    format!("{}.pattern", path),
                    format!("Invalid regex: {}", e),
                ));
            }
            if !rule.boost.is_finite() {
                errors.push(ValidationError::new(
                    format!("{}.boost", path),
                    "Boost must be a finite number",
                ));
            }
        }
    }

    fn validate_citation(config: &Config, errors: &mut Vec<ValidationError>) {
        let citation = &config.citation;

        if !(0.0..=1.0).contains(&citation.min_confidence) {
            errors.push(ValidationError::new(
                "citation.min_confidence",
                format!(
                    "Confidence threshold must be between 0.0 and 1.0, got {}",
                    citation.min_confidence
                ),
            ));
        }
        Self::require_positive(
            citation.max_context_chunks,
            "citation.max_context_chunks",
            errors,
        );
    }

    fn validate_circuit(config: &Config, errors: &mut Vec<ValidationError>) {
        let circuit = &config.circuit;

        if circuit.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "circuit.failure_threshold",
                "Failure threshold must be at least 1",
            ));
        }

        Self::require_duration(&circuit.failure_window, "circuit.failure_window", errors);
        Self::require_duration(&circuit.probe_interval, "circuit.probe_interval", errors);
        Self::require_duration(&circuit.probe_timeout, "circuit.probe_timeout", errors);
        let base = Self::require_duration(&circuit.base_delay, "circuit.base_delay", errors);
        let max = Self::require_duration(&circuit.max_delay, "circuit.max_delay", errors);

        if let (Some(base), Some(max)) = (base, max) {
            if base > max {
                errors.push(ValidationError::new(
                    "circuit.base_delay",
                    format!("Base delay {:?} exceeds max delay {:?}", base, max),
                ));
            }
        }

        if !(circuit.latency_smoothing > 0.0 && circuit.latency_smoothing <= 1.0) {
            errors.push(ValidationError::new(
                "circuit.latency_smoothing",
                format!(
                    "Smoothing factor must be in (0.0, 1.0], got {}",
                    circuit.latency_smoothing
                ),
            ));
        }
    }

    fn validate_orchestrator(config: &Config, errors: &mut Vec<ValidationError>) {
        let orchestrator = &config.orchestrator;

        Self::require_positive(orchestrator.max_in_flight, "orchestrator.max_in_flight", errors);
        Self::require_positive(orchestrator.default_top_k, "orchestrator.default_top_k", errors);
        Self::require_duration(
            &orchestrator.default_deadline,
            "orchestrator.default_deadline",
            errors,
        );

        if orchestrator.max_answer_tokens == 0 {
            errors.push(ValidationError::new(
                "orchestrator.max_answer_tokens",
                "Answer token budget must be at least 1",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Embedding model cannot be empty",
            ));
        }
    }

    fn validate_providers(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.providers.is_empty() {
            errors.push(ValidationError::new(
                "providers",
                "At least one generation provider is required",
            ));
        }

        let mut seen = HashSet::new();
        for (idx, provider) in config.providers.iter().enumerate() {
            let path = format!("providers[{}]", idx);

            if provider.id.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.id", path),
                    "Provider id cannot be empty",
                ));
            } else if !seen.insert(provider.id.as_str()) {
                errors.push(ValidationError::new(
                    format!("{}.id", path),
                    format!("Duplicate provider id: {}", provider.id),
                ));
            }

            if !(provider.base_url.starts_with("http://") || provider.base_url.starts_with("https://")) {
                errors.push(ValidationError::new(
                    format!("{}.base_url", path),
                    format!("Base URL must start with http:// or https://, got {}", provider.base_url),
                ));
            }

            if provider.model.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{}.model", path),
                    "Provider model cannot be empty",
                ));
            }

            if !(0.0..=2.0).contains(&provider.temperature) {
                errors.push(ValidationError::new(
                    format!("{}.temperature", path),
                    format!(
                        "Temperature must be between 0.0 and 2.0, got {}",
                        provider.temperature
                    ),
                ));
            }

            Self::require_duration(&provider.timeout, &format!("{}.timeout", path), errors);

            // Check that the API key env var is set, if one is named
            if let Some(var) = &provider.api_key_env {
                if std::env::var(var).is_err() {
                    errors.push(ValidationError::new(
                        format!("{}.api_key_env", path),
                        format!("Environment variable {} is not set", var),
                    ));
                }
            }
        }
    }

    fn require_positive(value: usize, path: &str, errors: &mut Vec<ValidationError>) {
        if value == 0 {
            errors.push(ValidationError::new(path, "Must be greater than 0"));
        }
    }

    fn require_duration(
        value: &str,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) -> Option<std::time::Duration> {
        let parsed = parse_duration(value);
        if parsed.is_none() {
            errors.push(ValidationError::new(
                path,
                format!("Invalid duration format: {}", value),
            ));
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::BoostRuleConfig;

    fn errors_of(config: &Config) -> Vec<ValidationError> {
        match ConfigValidator::validate(config) {
            Err(GroundedError::ConfigValidation { errors }) => errors,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_all_zero_weights() {
        let mut config = Config::default();
        config.retrieval.weights.dense = 0.0;
        config.retrieval.weights.sparse = 0.0;
        config.retrieval.weights.token = 0.0;
        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "retrieval.weights"));
    }

    #[test]
    fn test_negative_weight() {
        let mut config = Config::default();
        config.retrieval.weights.sparse = -0.5;
        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "retrieval.weights.sparse"));
    }

    #[test]
    fn test_invalid_boost_regex() {
        let mut config = Config::default();
        config.rerank.boosts.push(BoostRuleConfig {
            name: "broken".to_string(),
            pattern: "[unclosed".to_string(),
            boost: 0.1,
        });
        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "rerank.boosts[1].pattern"));
    }

    #[test]
    fn test_circuit_delays() {
        let mut config = Config::default();
        config.circuit.base_delay = "2m".to_string();
        config.circuit.max_delay = "30s".to_string();
        config.circuit.failure_window = "soon".to_string();
        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "circuit.base_delay"));
        assert!(errors.iter().any(|e| e.path == "circuit.failure_window"));
    }

    #[test]
    fn test_stage_timeouts_must_parse() {
        let mut config = Config::default();
        config.retrieval.encoder_timeout = "quick".to_string();
        config.circuit.probe_timeout = "later".to_string();
        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "retrieval.encoder_timeout"));
        assert!(errors.iter().any(|e| e.path == "circuit.probe_timeout"));
    }

    #[test]
    fn test_duplicate_providers_and_errors_collected() {
        let mut config = Config::default();
        let duplicate = config.providers[0].clone();
        config.providers.push(duplicate);
        config.orchestrator.max_in_flight = 0;

        let errors = errors_of(&config);
        assert!(errors.iter().any(|e| e.path == "providers[1].id"));
        assert!(errors.iter().any(|e| e.path == "orchestrator.max_in_flight"));
    }

    #[test]
    fn test_no_providers() {
        let mut config = Config::default();
        config.providers.clear();
        assert!(errors_of(&config).iter().any(|e| e.path == "providers"));
    }
}
