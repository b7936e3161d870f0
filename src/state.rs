//! # Application State Management
//!
//! Shared state for everything outside a relay session: the runtime
//! configuration, the connection registry, and service-wide metrics. All of
//! it uses the Arc<RwLock<T>> pattern so HTTP handlers and WebSocket actors
//! on different worker threads can share it safely.
//!
//! Per-session relay state is deliberately NOT here — each relay session is
//! owned exclusively by its client channel's actor, so sessions never share
//! mutable state with each other.

use crate::config::AppConfig;
use crate::registry::ConnectionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The state shared across all HTTP handlers and WebSocket actors.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Active client channels, keyed by connection id
    pub registry: Arc<RwLock<ConnectionRegistry>>,

    /// Service-wide metrics (updated by middleware and relay sessions)
    pub metrics: Arc<RwLock<RelayMetrics>>,

    /// When the server started (immutable, safe to share directly)
    pub start_time: Instant,
}

/// Metrics collected across the whole service.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total HTTP errors since start
    pub error_count: u64,

    /// Client channels accepted since start
    pub connections_total: u64,

    /// Currently connected client channels
    pub active_relays: u32,

    /// Audio packets forwarded to the provider
    pub packets_relayed: u64,

    /// Audio packets dropped while no provider session was open
    pub packets_dropped: u64,

    /// Utterances delivered to clients
    pub transcripts_relayed: u64,

    /// Provider faults observed (surfaced to clients as opaque errors)
    pub provider_errors: u64,

    /// Per-endpoint request statistics
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the shared state for a validated configuration.
    pub fn new(config: AppConfig) -> Self {
        let registry = ConnectionRegistry::new(config.relay.max_sessions);

        Self {
            config: Arc::new(RwLock::new(config)),
            registry: Arc::new(RwLock::new(registry)),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads aren't
    /// blocked; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record one accepted client channel.
    pub fn record_connection_opened(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.connections_total += 1;
        metrics.active_relays += 1;
    }

    /// Record one ended client channel, folding in the session's counters.
    pub fn record_connection_closed(&self, relayed: u64, dropped: u64, transcripts: u64) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_relays > 0 {
            metrics.active_relays -= 1;
        }
        metrics.packets_relayed += relayed;
        metrics.packets_dropped += dropped;
        metrics.transcripts_relayed += transcripts;
    }

    pub fn increment_provider_errors(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.provider_errors += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a consistent snapshot of the current metrics.
    ///
    /// Clones under the read lock so the lock is never held while an HTTP
    /// response is being built.
    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        let metrics = self.metrics.read().unwrap();
        RelayMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            connections_total: metrics.connections_total,
            active_relays: metrics.active_relays,
            packets_relayed: metrics.packets_relayed,
            packets_dropped: metrics.packets_dropped,
            transcripts_relayed: metrics.transcripts_relayed,
            provider_errors: metrics.provider_errors,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_accounting() {
        let state = AppState::new(AppConfig::default());

        state.record_connection_opened();
        state.record_connection_opened();
        state.record_connection_closed(3, 1, 2);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.active_relays, 1);
        assert_eq!(snapshot.packets_relayed, 3);
        assert_eq!(snapshot.packets_dropped, 1);
        assert_eq!(snapshot.transcripts_relayed, 2);
    }

    #[test]
    fn test_active_relays_never_underflows() {
        let state = AppState::new(AppConfig::default());
        state.record_connection_closed(0, 0, 0);
        assert_eq!(state.get_metrics_snapshot().active_relays, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());

        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = snapshot.endpoint_metrics.get("GET /health").unwrap();
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_registry_capacity_comes_from_config() {
        let mut config = AppConfig::default();
        config.relay.max_sessions = 2;
        let state = AppState::new(config);

        assert_eq!(state.registry.read().unwrap().max_sessions(), 2);
    }
}
