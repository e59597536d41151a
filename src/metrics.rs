//! Prometheus exposition of the `update_available` gauge.
//!
//! The gauge lives in a registry owned by [`FreshnessMetrics`] instead of the
//! process-wide default registry, so every instance is independent.

use crate::reconciler::{GaugeSurface, ReconcileSummary, Reconciler};
use crate::state::{FreshnessJudgment, SampleKey};
use chrono::Utc;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

pub static UPDATE_AVAILABLE: &str = "update_available";
static LABELS: [&str; 3] = ["namespace", "pod", "container"];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

pub struct FreshnessMetrics {
    registry: Registry,
    update_available: GaugeVec,
    cycles_total: IntCounterVec,
    last_success: Gauge,
    state: RwLock<GaugeState>,
}

#[derive(Default)]
struct GaugeState {
    reconciler: Reconciler,
    samples: BTreeMap<SampleKey, f64>,
}

/// Writes to the prometheus gauge and mirrors the values for inspection.
struct GaugeVecSurface<'a> {
    gauge: &'a GaugeVec,
    samples: &'a mut BTreeMap<SampleKey, f64>,
}

impl GaugeSurface for GaugeVecSurface<'_> {
    fn set_gauge(&mut self, key: &SampleKey, value: f64) {
        self.gauge.with_label_values(&key.label_values()).set(value);
        self.samples.insert(key.clone(), value);
    }

    fn remove_gauge(&mut self, key: &SampleKey) {
        if let Err(e) = self.gauge.remove_label_values(&key.label_values()) {
            warn!("Failed to remove gauge {}: {}", key, e);
        }
        self.samples.remove(key);
    }
}

impl FreshnessMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let update_available = GaugeVec::new(
            Opts::new(
                UPDATE_AVAILABLE,
                "Indicates if a newer version is available (1) or not (0)",
            ),
            &LABELS,
        )?;
        registry.register(Box::new(update_available.clone()))?;

        let cycles_total = IntCounterVec::new(
            Opts::new(
                "update_available_cycles_total",
                "Polling cycles by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let last_success = Gauge::with_opts(Opts::new(
            "update_available_last_success_timestamp_seconds",
            "Unix time of the last successful polling cycle",
        ))?;
        registry.register(Box::new(last_success.clone()))?;

        Ok(Self {
            registry,
            update_available,
            cycles_total,
            last_success,
            state: RwLock::new(GaugeState::default()),
        })
    }

    /// Prunes and writes the gauge for one cycle while holding the write lock, so a
    /// scrape never sees a half-applied cycle.
    pub fn apply(&self, judgments: &[FreshnessJudgment]) -> ReconcileSummary {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let GaugeState {
            reconciler,
            samples,
        } = &mut *state;
        let mut surface = GaugeVecSurface {
            gauge: &self.update_available,
            samples,
        };
        let summary = reconciler.reconcile(judgments, &mut surface);

        self.cycles_total.with_label_values(&["success"]).inc();
        self.last_success.set(Utc::now().timestamp() as f64);
        summary
    }

    pub fn record_failure(&self) {
        self.cycles_total.with_label_values(&["failure"]).inc();
    }

    #[cfg(test)]
    pub(crate) fn cycles(&self, outcome: &str) -> u64 {
        self.cycles_total.with_label_values(&[outcome]).get()
    }

    /// Current gauge values keyed by label set.
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> BTreeMap<SampleKey, f64> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .clone()
    }

    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let _state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
