//! Priority-ordered failover across generation providers

use super::{
    Admission, CircuitPolicy, GenerationProvider, GenerationRequest, GenerationResponse,
    HealthRegistry, ProviderError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What happened when the router considered one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { reason: String },
    /// Circuit open or probe already in flight; not called
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub outcome: AttemptOutcome,
    /// The call was the half-open probe
    pub probe: bool,
    pub elapsed_ms: u64,
}

impl ProviderAttempt {
    fn skipped(provider_id: &str, reason: String) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            outcome: AttemptOutcome::Skipped { reason },
            probe: false,
            elapsed_ms: 0,
        }
    }
}

fn summarize(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no providers configured".to_string();
    }
    attempts
        .iter()
        .map(|a| match &a.outcome {
            AttemptOutcome::Succeeded => format!("{}: succeeded", a.provider_id),
            AttemptOutcome::Failed { reason } => format!("{}: {}", a.provider_id, reason),
            AttemptOutcome::Skipped { reason } => format!("{}: skipped ({})", a.provider_id, reason),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("All providers unavailable: {}", summarize(.attempts))]
    AllProvidersUnavailable { attempts: Vec<ProviderAttempt> },

    #[error("Deadline exceeded during generation: {}", summarize(.attempts))]
    DeadlineExceeded { attempts: Vec<ProviderAttempt> },
}

impl RouterError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            RouterError::AllProvidersUnavailable { attempts }
            | RouterError::DeadlineExceeded { attempts } => attempts,
        }
    }
}

/// Successful generation plus the route taken to get it
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub provider_id: String,
    pub response: GenerationResponse,
    pub attempts: Vec<ProviderAttempt>,
}

impl RoutedResponse {
    /// Providers tried before the one that answered
    pub fn retry_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failed { .. }))
            .count()
    }
}

/// Returns a half-open probe slot if the probe call is dropped mid-flight
struct ProbeGuard<'a> {
    registry: &'a HealthRegistry,
    provider_id: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_probe(self.provider_id);
        }
    }
}

/// Routes each generation request to the first healthy provider
pub struct FailoverRouter {
    providers: Vec<Arc<dyn GenerationProvider>>,
    registry: Arc<HealthRegistry>,
}

impl FailoverRouter {
    /// Providers are tried in the order given
    pub fn new(providers: Vec<Arc<dyn GenerationProvider>>, policy: CircuitPolicy) -> Self {
        let registry = Arc::new(HealthRegistry::new(
            providers.iter().map(|p| p.id().to_string()),
            policy,
        ));
        Self { providers, registry }
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn providers(&self) -> &[Arc<dyn GenerationProvider>] {
        &self.providers
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<RoutedResponse, RouterError> {
        let mut request = request;
        let mut attempts = Vec::new();

        for provider in &self.providers {
            let provider_id = provider.id();

            if request.deadline.is_expired() {
                warn!(query_id = %request.query_id, "Deadline exceeded before trying {}", provider_id);
                return Err(RouterError::DeadlineExceeded { attempts });
            }

            let probe = match self.registry.admit(provider_id, Instant::now()) {
                Admission::Normal => false,
                Admission::Probe => true,
                Admission::Rejected { retry_in } => {
                    debug!("Skipping {}: circuit open (retry in {:?})", provider_id, retry_in);
                    attempts.push(ProviderAttempt::skipped(provider_id, "circuit open".to_string()));
                    continue;
                }
            };

            let mut guard = ProbeGuard {
                registry: &self.registry,
                provider_id,
                armed: probe,
            };

            let started = Instant::now();
            let budget = request.deadline.remaining();
            let result = match tokio::time::timeout(budget, provider.generate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };
            let elapsed = started.elapsed();
            request.attempt += 1;

            match result {
                Ok(response) => {
                    self.registry.record_success(provider_id, elapsed, probe);
                    guard.armed = false;
                    attempts.push(ProviderAttempt {
                        provider_id: provider_id.to_string(),
                        outcome: AttemptOutcome::Succeeded,
                        probe,
                        elapsed_ms: millis(elapsed),
                    });
                    if attempts.len() > 1 {
                        info!(
                            query_id = %request.query_id,
                            provider = provider_id,
                            "Generation served by fallback provider"
                        );
                    }
                    return Ok(RoutedResponse {
                        provider_id: provider_id.to_string(),
                        response,
                        attempts,
                    });
                }
                Err(e) => {
                    self.registry.record_failure(provider_id, Instant::now(), probe);
                    guard.armed = false;
                    warn!(
                        query_id = %request.query_id,
                        provider = provider_id,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    attempts.push(ProviderAttempt {
                        provider_id: provider_id.to_string(),
                        outcome: AttemptOutcome::Failed {
                            reason: e.to_string(),
                        },
                        probe,
                        elapsed_ms: millis(elapsed),
                    });
                }
            }
        }

        if request.deadline.is_expired() {
            Err(RouterError::DeadlineExceeded { attempts })
        } else {
            Err(RouterError::AllProvidersUnavailable { attempts })
        }
    }

    /// Check every provider once through the same admission gate as
    /// [`FailoverRouter::generate`]: closed circuits get a liveness call, an
    /// open circuit whose backoff elapsed gets its single probe, and the rest
    /// are reported as skipped.
    pub async fn check_providers(&self, timeout: Duration) -> Vec<ProviderAttempt> {
        let checks = self.providers.iter().map(|provider| async move {
            let provider_id = provider.id();
            let probe = match self.registry.admit(provider_id, Instant::now()) {
                Admission::Normal => false,
                Admission::Probe => true,
                Admission::Rejected { .. } => {
                    return ProviderAttempt::skipped(provider_id, "circuit open".to_string());
                }
            };

            let mut guard = ProbeGuard {
                registry: &self.registry,
                provider_id,
                armed: probe,
            };

            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, provider.probe(timeout)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };
            let elapsed = started.elapsed();

            let outcome = match result {
                Ok(()) => {
                    self.registry.record_success(provider_id, elapsed, probe);
                    AttemptOutcome::Succeeded
                }
                Err(e) => {
                    self.registry.record_failure(provider_id, Instant::now(), probe);
                    AttemptOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            guard.armed = false;

            ProviderAttempt {
                provider_id: provider_id.to_string(),
                outcome,
                probe,
                elapsed_ms: millis(elapsed),
            }
        });

        futures::future::join_all(checks).await
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::Deadline;
    use crate::generation::{CircuitState, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        id: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(id: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationProvider for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(GenerationResponse {
                    text: format!("answer from {}", self.id),
                    usage: TokenUsage::default(),
                })
            }
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("prompt", 64, Deadline::after(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let primary = Scripted::new("primary", true);
        let secondary = Scripted::new("secondary", false);
        let router = FailoverRouter::new(
            vec![primary.clone(), secondary.clone()],
            CircuitPolicy::default(),
        );

        let routed = router.generate(request()).await.unwrap();
        assert_eq!(routed.provider_id, "secondary");
        assert_eq!(routed.retry_count(), 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_is_skipped() {
        let primary = Scripted::new("primary", true);
        let secondary = Scripted::new("secondary", false);
        let router = FailoverRouter::new(
            vec![primary.clone(), secondary.clone()],
            CircuitPolicy::default(),
        );

        for _ in 0..3 {
            router.generate(request()).await.unwrap();
        }
        assert_eq!(router.registry().state("primary"), Some(CircuitState::Open));

        let routed = router.generate(request()).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            routed.attempts[0].outcome,
            AttemptOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_all_failed_reports_every_attempt() {
        let router = FailoverRouter::new(
            vec![Scripted::new("a", true), Scripted::new("b", true)],
            CircuitPolicy::default(),
        );

        let err = router.generate(request()).await.unwrap_err();
        assert!(matches!(err, RouterError::AllProvidersUnavailable { .. }));
        assert_eq!(err.attempts().len(), 2);
        assert!(err.to_string().contains("a: Provider returned status 503"));
    }

    #[tokio::test]
    async fn test_check_providers_records_health() {
        let router = FailoverRouter::new(
            vec![Scripted::new("up", false), Scripted::new("down", true)],
            CircuitPolicy::default(),
        );

        let checks = router.check_providers(Duration::from_secs(1)).await;
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].outcome, AttemptOutcome::Succeeded);
        assert!(matches!(checks[1].outcome, AttemptOutcome::Failed { .. }));

        let down = router.registry().health("down").unwrap();
        assert_eq!(down.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_check_providers_respects_open_circuit() {
        let primary = Scripted::new("primary", true);
        let router = FailoverRouter::new(
            vec![primary.clone(), Scripted::new("secondary", false)],
            CircuitPolicy::default(),
        );
        for _ in 0..3 {
            router.generate(request()).await.unwrap();
        }

        let checks = router.check_providers(Duration::from_secs(1)).await;
        assert_eq!(
            checks[0].outcome,
            AttemptOutcome::Skipped {
                reason: "circuit open".to_string()
            }
        );
        assert_eq!(checks[1].outcome, AttemptOutcome::Succeeded);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(router.registry().state("primary"), Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = FailoverRouter::new(Vec::new(), CircuitPolicy::default());
        let err = router.generate(request()).await.unwrap_err();
        assert!(err.to_string().contains("no providers configured"));
    }
}
