use prometheus::{HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Process-wide Prometheus registry plus the named collectors every component
/// in this crate records against. Constructed once at startup and shared behind
/// an `Arc` with the HTTP `/metrics` handler.
pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub triage_runs_started_total: IntCounter,
    pub triage_runs_completed_total: IntCounter,
    pub triage_runs_failed_total: IntCounter,
    pub triage_step_duration_ms: HistogramVec,
    pub triage_fallback_total: IntCounterVec,
    pub rate_limiter_admitted_total: IntCounter,
    pub rate_limiter_rejected_total: IntCounter,
    pub rate_limiter_fail_open_total: IntCounter,
    pub idempotency_cache_hits_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status"),
            &["route", "status"],
        )
        .expect("valid http_requests_total metric");

        let triage_runs_started_total = IntCounter::new(
            "triage_runs_started_total",
            "Triage runs started",
        )
        .expect("valid triage_runs_started_total metric");

        let triage_runs_completed_total = IntCounter::new(
            "triage_runs_completed_total",
            "Triage runs completed with a terminal decision",
        )
        .expect("valid triage_runs_completed_total metric");

        let triage_runs_failed_total = IntCounter::new(
            "triage_runs_failed_total",
            "Triage runs that ended in a terminal error",
        )
        .expect("valid triage_runs_failed_total metric");

        let triage_step_duration_ms = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "triage_step_duration_ms",
                "Per-step duration in the triage pipeline",
            ),
            &["step"],
        )
        .expect("valid triage_step_duration_ms metric");

        let triage_fallback_total = IntCounterVec::new(
            Opts::new("triage_fallback_total", "Fallback invocations by step"),
            &["step"],
        )
        .expect("valid triage_fallback_total metric");

        let rate_limiter_admitted_total = IntCounter::new(
            "rate_limiter_admitted_total",
            "Requests admitted by the rate limiter",
        )
        .expect("valid rate_limiter_admitted_total metric");

        let rate_limiter_rejected_total = IntCounter::new(
            "rate_limiter_rejected_total",
            "Requests rejected by the rate limiter",
        )
        .expect("valid rate_limiter_rejected_total metric");

        let rate_limiter_fail_open_total = IntCounter::new(
            "rate_limiter_fail_open_total",
            "Requests admitted because the coordination store was unreachable",
        )
        .expect("valid rate_limiter_fail_open_total metric");

        let idempotency_cache_hits_total = IntCounter::new(
            "idempotency_cache_hits_total",
            "Replayed responses served from the idempotency cache",
        )
        .expect("valid idempotency_cache_hits_total metric");

        for collector in [
            Box::new(http_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(triage_runs_started_total.clone()),
            Box::new(triage_runs_completed_total.clone()),
            Box::new(triage_runs_failed_total.clone()),
            Box::new(triage_step_duration_ms.clone()),
            Box::new(triage_fallback_total.clone()),
            Box::new(rate_limiter_admitted_total.clone()),
            Box::new(rate_limiter_rejected_total.clone()),
            Box::new(rate_limiter_fail_open_total.clone()),
            Box::new(idempotency_cache_hits_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registered exactly once");
        }

        Self {
            registry,
            http_requests_total,
            triage_runs_started_total,
            triage_runs_completed_total,
            triage_runs_failed_total,
            triage_step_duration_ms,
            triage_fallback_total,
            rate_limiter_admitted_total,
            rate_limiter_rejected_total,
            rate_limiter_fail_open_total,
            idempotency_cache_hits_total,
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("metric families encode cleanly");
        String::from_utf8(buffer).expect("prometheus text exposition is valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.triage_runs_started_total.inc();
        let text = metrics.render();
        assert!(text.contains("triage_runs_started_total"));
    }
}
