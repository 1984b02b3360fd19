//! Per-provider circuit breakers
//!
//! State machine:
//! - Closed: requests flow; `failure_threshold` consecutive failures inside
//!   `failure_window` open the circuit
//! - Open: requests are refused until the backoff for the current open period
//!   elapses, then exactly one probe is admitted (HalfOpen)
//! - HalfOpen: probe success closes the circuit and resets counters; probe
//!   failure reopens it with a doubled backoff, capped at `max_delay`
//!
//! Only the admitted probe's outcome moves a HalfOpen circuit. Late outcomes
//! of calls admitted while the circuit was still Closed are counted in the
//! statistics but never change state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Thresholds and timings shared by every provider's circuit
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitPolicy {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// EWMA factor for latency, in (0, 1]
    pub latency_smoothing: f64,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            latency_smoothing: 0.2,
        }
    }
}

impl CircuitPolicy {
    /// Backoff for an open period after `reopenings` failed probes:
    /// `min(base_delay * 2^reopenings, max_delay)`
    pub fn backoff(&self, reopenings: u32) -> Duration {
        let factor = 1u32.checked_shl(reopenings).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Admission decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed
    Normal,
    /// The single half-open probe; its outcome decides the circuit
    Probe,
    /// Circuit open or a probe already in flight
    Rejected { retry_in: Duration },
}

/// A circuit state transition, also emitted as a `grounded::circuit` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub provider_id: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub consecutive_failures: u32,
    pub open_count: u32,
}

/// Health record for one provider
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    provider_id: String,
    state: CircuitState,
    consecutive_failures: u32,
    recent_failures: VecDeque<Instant>,
    /// Open periods since the circuit last closed
    open_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_success: Option<DateTime<Utc>>,
    latency_ms: Option<f64>,
    total_requests: u64,
    total_failures: u64,
}

impl ProviderHealth {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            recent_failures: VecDeque::new(),
            open_count: 0,
            opened_at: None,
            probe_in_flight: false,
            last_success: None,
            latency_ms: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Smoothed latency of successful calls
    pub fn latency(&self) -> Option<Duration> {
        self.latency_ms
            .map(|ms| Duration::from_micros((ms * 1000.0) as u64))
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }

    /// When the open circuit admits its next probe
    pub fn retry_at(&self, policy: &CircuitPolicy) -> Option<Instant> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(opened_at + policy.backoff(self.open_count.saturating_sub(1)))
            }
            _ => None,
        }
    }

    fn admit(&mut self, now: Instant, policy: &CircuitPolicy) -> (Admission, Option<StateChange>) {
        match self.state {
            CircuitState::Closed => (Admission::Normal, None),
            CircuitState::Open => {
                let retry_at = self.retry_at(policy).unwrap_or(now);
                if now >= retry_at {
                    self.probe_in_flight = true;
                    let change = self.transition(CircuitState::HalfOpen);
                    (Admission::Probe, Some(change))
                } else {
                    (
                        Admission::Rejected {
                            retry_in: retry_at - now,
                        },
                        None,
                    )
                }
            }
            CircuitState::HalfOpen if self.probe_in_flight => (
                Admission::Rejected {
                    retry_in: Duration::ZERO,
                },
                None,
            ),
            CircuitState::HalfOpen => {
                self.probe_in_flight = true;
                (Admission::Probe, None)
            }
        }
    }

    fn record_success(
        &mut self,
        latency: Duration,
        probe: bool,
        policy: &CircuitPolicy,
    ) -> Option<StateChange> {
        self.total_requests += 1;
        self.last_success = Some(Utc::now());

        let sample = latency.as_secs_f64() * 1000.0;
        self.latency_ms = Some(match self.latency_ms {
            Some(prev) => policy.latency_smoothing * sample + (1.0 - policy.latency_smoothing) * prev,
            None => sample,
        });

        match (self.state, probe) {
            (CircuitState::HalfOpen, true) => {
                self.probe_in_flight = false;
                self.consecutive_failures = 0;
                self.recent_failures.clear();
                self.opened_at = None;
                self.open_count = 0;
                Some(self.transition(CircuitState::Closed))
            }
            (CircuitState::Closed, _) => {
                self.consecutive_failures = 0;
                self.recent_failures.clear();
                None
            }
            // Late success from a call admitted before the circuit opened
            _ => None,
        }
    }

    fn record_failure(&mut self, now: Instant, probe: bool, policy: &CircuitPolicy) -> Option<StateChange> {
        self.total_requests += 1;
        self.total_failures += 1;

        match (self.state, probe) {
            (CircuitState::Closed, _) => {
                self.consecutive_failures += 1;
                self.recent_failures.push_back(now);
                while let Some(oldest) = self.recent_failures.front() {
                    if now.saturating_duration_since(*oldest) > policy.failure_window {
                        self.recent_failures.pop_front();
                    } else {
                        break;
                    }
                }

                if self.recent_failures.len() as u32 >= policy.failure_threshold {
                    self.recent_failures.clear();
                    self.open_count = 1;
                    self.opened_at = Some(now);
                    Some(self.transition(CircuitState::Open))
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, true) => {
                self.consecutive_failures += 1;
                self.probe_in_flight = false;
                self.open_count += 1;
                self.opened_at = Some(now);
                Some(self.transition(CircuitState::Open))
            }
            // Late failure from a call admitted before the circuit opened
            _ => None,
        }
    }

    fn release_probe(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    fn transition(&mut self, to: CircuitState) -> StateChange {
        let from = self.state;
        self.state = to;
        StateChange {
            provider_id: self.provider_id.clone(),
            from,
            to,
            consecutive_failures: self.consecutive_failures,
            open_count: self.open_count,
        }
    }

    pub fn snapshot(&self, policy: &CircuitPolicy, now: Instant) -> ProviderHealthSnapshot {
        ProviderHealthSnapshot {
            provider_id: self.provider_id.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            open_count: self.open_count,
            last_success: self.last_success,
            latency_ms: self.latency_ms,
            error_rate: self.error_rate(),
            total_requests: self.total_requests,
            retry_in_ms: self
                .retry_at(policy)
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Point-in-time copy of a provider's health, safe to serialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_count: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
    pub error_rate: f64,
    pub total_requests: u64,
    pub retry_in_ms: Option<u64>,
}

/// Health records for all providers, in priority order.
///
/// Each record sits behind its own lock; locks are never held across an await.
#[derive(Debug)]
pub struct HealthRegistry {
    records: Vec<(String, Mutex<ProviderHealth>)>,
    policy: CircuitPolicy,
}

impl HealthRegistry {
    pub fn new<I, S>(provider_ids: I, policy: CircuitPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = provider_ids
            .into_iter()
            .map(|id| {
                let id: String = id.into();
                (id.clone(), Mutex::new(ProviderHealth::new(id)))
            })
            .collect();
        Self { records, policy }
    }

    pub fn policy(&self) -> &CircuitPolicy {
        &self.policy
    }

    /// Provider ids in priority order
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|(id, _)| id.as_str())
    }

    fn with<R>(&self, provider_id: &str, f: impl FnOnce(&mut ProviderHealth) -> R) -> Option<R> {
        let (_, record) = self.records.iter().find(|(id, _)| id == provider_id)?;
        let mut health = record.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut health))
    }

    pub fn state(&self, provider_id: &str) -> Option<CircuitState> {
        self.with(provider_id, |h| h.state())
    }

    pub fn health(&self, provider_id: &str) -> Option<ProviderHealth> {
        self.with(provider_id, |h| h.clone())
    }

    pub fn snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|(_, record)| {
                record
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot(&self.policy, now)
            })
            .collect()
    }

    /// Unknown providers are rejected
    pub(crate) fn admit(&self, provider_id: &str, now: Instant) -> Admission {
        let (admission, change) = self
            .with(provider_id, |h| h.admit(now, &self.policy))
            .unwrap_or((
                Admission::Rejected {
                    retry_in: Duration::MAX,
                },
                None,
            ));
        if let Some(change) = change {
            emit(&change);
        }
        admission
    }

    /// `probe` marks the outcome of a call admitted as [`Admission::Probe`]
    pub(crate) fn record_success(&self, provider_id: &str, latency: Duration, probe: bool) {
        if let Some(Some(change)) =
            self.with(provider_id, |h| h.record_success(latency, probe, &self.policy))
        {
            emit(&change);
        }
    }

    pub(crate) fn record_failure(&self, provider_id: &str, now: Instant, probe: bool) {
        if let Some(Some(change)) =
            self.with(provider_id, |h| h.record_failure(now, probe, &self.policy))
        {
            emit(&change);
        }
    }

    /// Give back a probe slot whose call never reported an outcome
    pub(crate) fn release_probe(&self, provider_id: &str) {
        self.with(provider_id, |h| h.release_probe());
    }
}

fn emit(change: &StateChange) {
    match change.to {
        CircuitState::Open => warn!(
            target: "grounded::circuit",
            provider = %change.provider_id,
            from = %change.from,
            to = %change.to,
            consecutive_failures = change.consecutive_failures,
            open_count = change.open_count,
            "Circuit opened"
        ),
        CircuitState::HalfOpen => info!(
            target: "grounded::circuit",
            provider = %change.provider_id,
            from = %change.from,
            to = %change.to,
            consecutive_failures = change.consecutive_failures,
            open_count = change.open_count,
            "Circuit half-open, admitting probe"
        ),
        CircuitState::Closed => info!(
            target: "grounded::circuit",
            provider = %change.provider_id,
            from = %change.from,
            to = %change.to,
            consecutive_failures = change.consecutive_failures,
            open_count = change.open_count,
            "Circuit closed"
        ),
    }
}
