//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the point ledger.
//!
//! # Metrics
//!
//! - `point_charges_total` - Committed charge operations
//! - `point_uses_total` - Committed use operations
//! - `point_rejections_total` - Failed mutations by operation and reason
//! - `point_gate_wait_seconds` - Time spent waiting for a per-user lock
//! - `point_gate_active_keys` - Live entries in the lock table

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed charges
    pub charges_total: IntCounter,

    /// Committed uses
    pub uses_total: IntCounter,

    /// Rejected mutations, labelled by operation and reason
    pub rejections_total: IntCounterVec,

    /// Gate wait histogram
    pub gate_wait: Histogram,

    /// Live lock table entries
    pub gate_active_keys: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let charges_total = IntCounter::new("point_charges_total", "Committed charge operations")?;
        registry.register(Box::new(charges_total.clone()))?;

        let uses_total = IntCounter::new("point_uses_total", "Committed use operations")?;
        registry.register(Box::new(uses_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("point_rejections_total", "Failed mutations by reason"),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let gate_wait = Histogram::with_opts(
            HistogramOpts::new(
                "point_gate_wait_seconds",
                "Time spent waiting for a per-user lock",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(gate_wait.clone()))?;

        let gate_active_keys =
            IntGauge::new("point_gate_active_keys", "Live entries in the lock table")?;
        registry.register(Box::new(gate_active_keys.clone()))?;

        Ok(Self {
            charges_total,
            uses_total,
            rejections_total,
            gate_wait,
            gate_active_keys,
            registry,
        })
    }

    /// Record a committed charge
    pub fn record_charge(&self) {
        self.charges_total.inc();
    }

    /// Record a committed use
    pub fn record_use(&self) {
        self.uses_total.inc();
    }

    /// Record a rejected mutation
    pub fn record_rejection(&self, operation: &str, reason: &str) {
        self.rejections_total
            .with_label_values(&[operation, reason])
            .inc();
    }

    /// Record time spent waiting at the gate
    pub fn record_gate_wait(&self, wait_seconds: f64) {
        self.gate_wait.observe(wait_seconds);
    }

    /// Render all collectors in the text exposition format
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("charges_total", &self.charges_total.get())
            .field("uses_total", &self.uses_total.get())
            .field("gate_active_keys", &self.gate_active_keys.get())
            .finish()
    }
}
