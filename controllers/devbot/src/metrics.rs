//! Prometheus metrics exposed on the metrics port.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Controller metrics, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: HistogramVec,
    jobs_launched: IntCounterVec,
    webhook_events: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("devbot_reconcile_total", "Reconciliation passes by kind and result."),
            &["kind", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "devbot_reconcile_duration_seconds",
                "Duration of reconciliation passes.",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;
        let jobs_launched = IntCounterVec::new(
            Opts::new("devbot_jobs_launched_total", "Pipeline jobs launched by phase."),
            &["phase"],
        )?;
        let webhook_events = IntCounterVec::new(
            Opts::new("devbot_webhook_events_total", "Webhook deliveries by event and result."),
            &["event", "result"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(jobs_launched.clone()))?;
        registry.register(Box::new(webhook_events.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            jobs_launched,
            webhook_events,
        })
    }

    /// Records one finished reconciliation pass
    pub fn reconciled(&self, kind: &str, started: Instant, ok: bool) {
        let result = if ok { "success" } else { "error" };
        self.reconcile_total.with_label_values(&[kind, result]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn job_launched(&self, phase: &str) {
        self.jobs_launched.with_label_values(&[phase]).inc();
    }

    pub fn webhook_event(&self, event: &str, result: &str) {
        self.webhook_events.with_label_values(&[event, result]).inc();
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }
}
