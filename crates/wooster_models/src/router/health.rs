//! Cached provider health and the background probe.

use crate::registry::ProviderRegistry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Health of one provider as seen by the most recent probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// Never probed. Treated as usable so startup does not block on probes.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Up,
    /// Probe failures reached the threshold; skip until a probe succeeds.
    Down,
}

/// Per-provider health record.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    /// Current status.
    pub status: HealthStatus,
    /// Consecutive probe failures since the last success.
    pub consecutive_failures: u32,
    /// Message of the most recent failed probe.
    pub last_error: Option<String>,
    /// When the status last changed.
    pub since: DateTime<Utc>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_error: None,
            since: Utc::now(),
        }
    }
}

/// Probes providers and caches their status.
///
/// Success transitions `Unknown`/`Down` to `Up` immediately. Failure
/// transitions `Up` to `Down` only after `failure_threshold` consecutive
/// misses, so one flaky probe does not drain a healthy provider.
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    states: RwLock<HashMap<String, ProviderHealth>>,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Creates a monitor over the registered providers.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, failure_threshold: u32) -> Self {
        Self {
            registry,
            states: RwLock::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Whether the router may hand out candidates on this provider.
    ///
    /// Down providers are excluded; unknown (never-probed) providers are
    /// allowed so requests can flow before the first probe completes.
    #[must_use]
    pub fn is_usable(&self, provider: &str) -> bool {
        self.states
            .read()
            .get(provider)
            .is_none_or(|health| health.status != HealthStatus::Down)
    }

    /// Returns a copy of the current per-provider records.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.states.read().clone()
    }

    /// Probes every registered provider once and updates the cache.
    ///
    /// Chat and embedding providers registered under the same name share one
    /// record; the chat probe wins for such providers.
    pub async fn probe_all(&self) {
        let mut probed = Vec::new();
        for name in self.registry.chat_provider_names() {
            if let Some(provider) = self.registry.chat_provider(&name) {
                let result = provider.probe().await.map_err(|err| err.to_string());
                probed.push((name, result));
            }
        }
        for (name, result) in probed {
            match result {
                Ok(()) => self.record_success(&name),
                Err(message) => self.record_failure(&name, message),
            }
        }
    }

    /// Spawns the background probe loop on the current runtime.
    ///
    /// The task runs until the returned handle is aborted (typically at
    /// shutdown); each cycle probes all providers, then sleeps.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                monitor.probe_all().await;
                tokio::time::sleep(interval).await;
            }
        })
    }

    fn record_success(&self, provider: &str) {
        let mut states = self.states.write();
        let health = states.entry(provider.to_string()).or_default();
        if health.status != HealthStatus::Up {
            tracing::info!(provider, "provider is up");
            health.since = Utc::now();
        }
        health.status = HealthStatus::Up;
        health.consecutive_failures = 0;
        health.last_error = None;
    }

    fn record_failure(&self, provider: &str, message: String) {
        let mut states = self.states.write();
        let health = states.entry(provider.to_string()).or_default();
        health.consecutive_failures += 1;
        health.last_error = Some(message);
        let should_mark_down = health.status != HealthStatus::Down
            && health.consecutive_failures >= self.failure_threshold;
        if should_mark_down {
            tracing::warn!(
                provider,
                failures = health.consecutive_failures,
                "provider marked down"
            );
            health.status = HealthStatus::Down;
            health.since = Utc::now();
        }
    }
}

impl core::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("failure_threshold", &self.failure_threshold)
            .field("states", &self.snapshot())
            .finish()
    }
}
