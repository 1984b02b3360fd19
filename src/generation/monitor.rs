//! Background probing of providers with open circuits

use super::{Admission, CircuitState, GenerationProvider, HealthRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One probe task per provider. A task only calls its provider while the
/// circuit is open and its backoff has elapsed, so healthy providers see no
/// probe traffic.
///
/// Dropping the monitor stops the tasks; [`HealthMonitor::shutdown`] also
/// waits for them to finish.
pub struct HealthMonitor {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn spawn(
        providers: &[Arc<dyn GenerationProvider>],
        registry: Arc<HealthRegistry>,
        probe_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let registry = Arc::clone(&registry);
                let mut shutdown_rx = shutdown_rx.clone();

                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(probe_interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => break,
                            _ = ticker.tick() => {
                                probe_if_open(provider.as_ref(), &registry, probe_timeout).await;
                            }
                        }
                    }
                    debug!("Health monitor for {} stopped", provider.id());
                })
            })
            .collect();

        info!(
            "Health monitor started for {} providers (interval {:?})",
            providers.len(),
            probe_interval
        );

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Stop all probe tasks and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn probe_if_open(
    provider: &dyn GenerationProvider,
    registry: &HealthRegistry,
    probe_timeout: Duration,
) {
    let id = provider.id();
    if registry.state(id) != Some(CircuitState::Open) {
        return;
    }
    if registry.admit(id, Instant::now()) != Admission::Probe {
        return;
    }

    let started = Instant::now();
    let result = match tokio::time::timeout(probe_timeout, provider.probe(probe_timeout)).await {
        Ok(result) => result,
        Err(_) => Err(super::ProviderError::Timeout),
    };

    match result {
        Ok(()) => registry.record_success(id, started.elapsed(), true),
        Err(e) => {
            debug!("Background probe of {} failed: {}", id, e);
            registry.record_failure(id, Instant::now(), true);
        }
    }
}
