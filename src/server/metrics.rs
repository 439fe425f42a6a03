// src/server/metrics.rs
//! Server metrics tracking
//!
//! Atomic counters fed by the event stream, so the engine and admin
//! service never touch metrics directly. Exposed as Prometheus text at
//! `GET /admin/metrics`.

use crate::events::{Event, EventSink};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Server metrics collector
#[derive(Default)]
pub struct ServerMetrics {
    /// Manifest requests answered with a manifest
    manifests_served: AtomicU64,
    /// Manifest requests answered with 204 or a directive
    manifests_not_served: AtomicU64,
    /// Asset lookups that resolved
    asset_hits: AtomicU64,
    /// Asset lookups for unknown hashes
    asset_misses: AtomicU64,
    publishes: AtomicU64,
    promotions: AtomicU64,
    rollout_changes: AtomicU64,
    rollbacks: AtomicU64,
    directive_changes: AtomicU64,
    /// Admin requests rejected by the token check
    auth_failures: AtomicU64,
    start_time: std::sync::OnceLock<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        let metrics = Self::default();
        let _ = metrics.start_time.set(Instant::now());
        metrics
    }

    /// Count one event
    pub fn record(&self, event: &Event) {
        let counter = match event {
            Event::ManifestRequest { served: true, .. } => &self.manifests_served,
            Event::ManifestRequest { served: false, .. } => &self.manifests_not_served,
            Event::AssetRequest { found: true, .. } => &self.asset_hits,
            Event::AssetRequest { found: false, .. } => &self.asset_misses,
            Event::UpdatePublished { .. } => &self.publishes,
            Event::UpdatePromoted { .. } => &self.promotions,
            Event::RolloutChanged { .. } => &self.rollout_changes,
            Event::UpdateRolledBack { .. } => &self.rollbacks,
            Event::DirectiveChanged { .. } => &self.directive_changes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self
            .start_time
            .get()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);

        MetricsSnapshot {
            manifests_served: self.manifests_served.load(Ordering::Relaxed),
            manifests_not_served: self.manifests_not_served.load(Ordering::Relaxed),
            asset_hits: self.asset_hits.load(Ordering::Relaxed),
            asset_misses: self.asset_misses.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            rollout_changes: self.rollout_changes.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            directive_changes: self.directive_changes.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            uptime_secs: uptime.as_secs(),
        }
    }

    /// Prometheus text exposition of the current counters
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP updraft_manifest_requests_total Manifest requests by outcome
# TYPE updraft_manifest_requests_total counter
updraft_manifest_requests_total{{served="true"}} {}
updraft_manifest_requests_total{{served="false"}} {}

# HELP updraft_asset_requests_total Asset lookups by outcome
# TYPE updraft_asset_requests_total counter
updraft_asset_requests_total{{found="true"}} {}
updraft_asset_requests_total{{found="false"}} {}

# HELP updraft_admin_mutations_total Successful admin mutations
# TYPE updraft_admin_mutations_total counter
updraft_admin_mutations_total{{op="publish"}} {}
updraft_admin_mutations_total{{op="promote"}} {}
updraft_admin_mutations_total{{op="rollout"}} {}
updraft_admin_mutations_total{{op="rollback"}} {}
updraft_admin_mutations_total{{op="directive"}} {}

# HELP updraft_admin_auth_failures_total Admin requests rejected as unauthorized
# TYPE updraft_admin_auth_failures_total counter
updraft_admin_auth_failures_total {}

# HELP updraft_uptime_seconds Seconds since the server started
# TYPE updraft_uptime_seconds gauge
updraft_uptime_seconds {}
"#,
            s.manifests_served,
            s.manifests_not_served,
            s.asset_hits,
            s.asset_misses,
            s.publishes,
            s.promotions,
            s.rollout_changes,
            s.rollbacks,
            s.directive_changes,
            s.auth_failures,
            s.uptime_secs,
        )
    }
}

#[async_trait]
impl EventSink for ServerMetrics {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub manifests_served: u64,
    pub manifests_not_served: u64,
    pub asset_hits: u64,
    pub asset_misses: u64,
    pub publishes: u64,
    pub promotions: u64,
    pub rollout_changes: u64,
    pub rollbacks: u64,
    pub directive_changes: u64,
    pub auth_failures: u64,
    pub uptime_secs: u64,
}
