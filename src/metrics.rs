//! Prometheus metrics for gate decisions

use anyhow::Context;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::error;

use crate::stats::{CounterKind, CounterStore};
use crate::verdict::Verdict;
use crate::Result;

/// Gate metrics, registered in a private registry
#[derive(Clone)]
pub struct GateMetrics {
    registry: Registry,
    verdicts_total: IntCounterVec,
    lookup_errors_total: IntCounter,
    lookup_duration: Histogram,
    stored_attempts: IntGaugeVec,
}

impl GateMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let verdicts_total = IntCounterVec::new(
            Opts::new("countrygate_verdicts_total", "Login verdicts by decision and reason"),
            &["decision", "reason"],
        )
        .context("Failed to create verdicts counter")?;

        let lookup_errors_total = IntCounter::new(
            "countrygate_lookup_errors_total",
            "Country lookups that failed with an error",
        )
        .context("Failed to create lookup error counter")?;

        let lookup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "countrygate_lookup_duration_seconds",
                "Duration of country lookups in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .context("Failed to create lookup duration histogram")?;

        let stored_attempts = IntGaugeVec::new(
            Opts::new("countrygate_stored_attempts", "Persisted attempt counters"),
            &["counter", "key"],
        )
        .context("Failed to create stored attempts gauge")?;

        registry
            .register(Box::new(verdicts_total.clone()))
            .context("Failed to register verdicts counter")?;
        registry
            .register(Box::new(lookup_errors_total.clone()))
            .context("Failed to register lookup error counter")?;
        registry
            .register(Box::new(lookup_duration.clone()))
            .context("Failed to register lookup duration histogram")?;
        registry
            .register(Box::new(stored_attempts.clone()))
            .context("Failed to register stored attempts gauge")?;

        Ok(Self {
            registry,
            verdicts_total,
            lookup_errors_total,
            lookup_duration,
            stored_attempts,
        })
    }

    pub fn record_verdict(&self, verdict: &Verdict) {
        self.verdicts_total
            .with_label_values(&[verdict.decision.as_str(), verdict.reason.as_str()])
            .inc();
    }

    pub fn record_lookup_error(&self) {
        self.lookup_errors_total.inc();
    }

    pub fn observe_lookup(&self, elapsed: Duration) {
        self.lookup_duration.observe(elapsed.as_secs_f64());
    }

    /// Mirror the persisted counters into gauges
    pub fn load_counters(&self, store: &dyn CounterStore) {
        self.stored_attempts.reset();
        for kind in CounterKind::ALL {
            for (key, count) in store.snapshot(kind) {
                self.stored_attempts
                    .with_label_values(&[kind.as_str(), key.as_str()])
                    .set(i64::try_from(count).unwrap_or(i64::MAX));
            }
        }
    }

    pub fn verdict_count(&self, verdict: &Verdict) -> u64 {
        self.verdicts_total
            .with_label_values(&[verdict.decision.as_str(), verdict.reason.as_str()])
            .get()
    }

    pub fn lookup_errors(&self) -> u64 {
        self.lookup_errors_total.get()
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}
