//! Answer generation behind a failover router
//!
//! Providers are external black boxes reached through [`GenerationProvider`].
//! The [`FailoverRouter`] tries them in priority order, skipping any whose
//! circuit is open, and the [`HealthMonitor`] probes open circuits in the
//! background so recovered providers rejoin rotation.

mod health;
mod monitor;
mod openai;
mod router;

pub use health::{
    Admission, CircuitPolicy, CircuitState, HealthRegistry, ProviderHealth,
    ProviderHealthSnapshot, StateChange,
};
pub use monitor::HealthMonitor;
pub use openai::OpenAiCompatibleProvider;
pub use router::{AttemptOutcome, FailoverRouter, ProviderAttempt, RoutedResponse, RouterError};

use crate::deadline::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider configuration error: {0}")]
    Configuration(String),
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query_id: Uuid,
    pub prompt: String,
    pub max_tokens: u32,
    pub deadline: Deadline,
    /// Providers already tried for this request
    pub attempt: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, deadline: Deadline) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            prompt: prompt.into(),
            max_tokens,
            deadline,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// A text-generation backend
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Stable identifier used for health tracking and logs
    fn id(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError>;

    /// Cheap liveness check used while the provider's circuit is open
    async fn probe(&self, timeout: Duration) -> Result<(), ProviderError> {
        let request = GenerationRequest::new("ping", 1, Deadline::after(timeout));
        self.generate(&request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_saturates() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
        };
        assert_eq!(usage.total(), 120);

        let huge = TokenUsage {
            prompt_tokens: u32::MAX,
            completion_tokens: 7,
        };
        assert_eq!(huge.total(), u32::MAX);
    }
}
