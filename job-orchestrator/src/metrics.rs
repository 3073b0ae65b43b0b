//! Observability (C10): request metrics and orchestrator gauges exported in
//! Prometheus text format at `/metrics`. Registration happens once at
//! startup; handlers and the scheduler update the same registered
//! collectors through the shared `Metrics` handle.

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Instant;

pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_latency: HistogramVec,
    active_jobs: IntGaugeVec,
    depth_usage: IntGaugeVec,
    depth_quota: IntGaugeVec,
    jobs_total: IntCounterVec,
}

/// Groups the status code into the class dashboards alarm on, so a route
/// with steady 404 traffic doesn't look identical to one throwing 500s.
pub fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status class"),
            &["route", "status_class"],
        )
        .expect("metric options are valid");
        let http_latency = HistogramVec::new(
            prometheus::HistogramOpts::new("http_request_duration_seconds", "HTTP request latency"),
            &["route"],
        )
        .expect("metric options are valid");
        let active_jobs = IntGaugeVec::new(
            Opts::new("orchestrator_active_jobs", "Jobs with an in-flight driving task"),
            &[],
        )
        .expect("metric options are valid");
        let depth_usage = IntGaugeVec::new(
            Opts::new("orchestrator_depth_used_workers", "Allocated worker slots per depth"),
            &["depth"],
        )
        .expect("metric options are valid");
        let depth_quota = IntGaugeVec::new(
            Opts::new("orchestrator_depth_quota_workers", "Worker quota per depth"),
            &["depth"],
        )
        .expect("metric options are valid");
        let jobs_total = IntCounterVec::new(
            Opts::new("orchestrator_jobs_total", "Terminal jobs by outcome"),
            &["outcome"],
        )
        .expect("metric options are valid");

        registry
            .register(Box::new(http_requests.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(http_latency.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(active_jobs.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(depth_usage.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(depth_quota.clone()))
            .expect("unique metric name");
        registry
            .register(Box::new(jobs_total.clone()))
            .expect("unique metric name");

        Self {
            registry,
            http_requests,
            http_latency,
            active_jobs,
            depth_usage,
            depth_quota,
            jobs_total,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn record_request(&self, route: &str, status: u16, elapsed: std::time::Duration) {
        self.http_requests
            .with_label_values(&[route, status_class(status)])
            .inc();
        self.http_latency
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_job_outcome(&self, outcome: &str) {
        self.jobs_total.with_label_values(&[outcome]).inc();
    }

    /// Refreshes the gauges from a live snapshot. Called after every request
    /// that could have moved them, rather than on a background tick, since
    /// the orchestrator has no long-running metrics-collection loop of its own.
    pub fn refresh_gauges(&self, active_jobs: i64, usage: &[crate::resource_manager::DepthUsage]) {
        self.active_jobs.with_label_values(&[]).set(active_jobs);
        for depth_usage in usage {
            let depth = depth_usage.depth.to_string();
            self.depth_usage
                .with_label_values(&[depth.as_str()])
                .set(depth_usage.used as i64);
            self.depth_quota
                .with_label_values(&[depth.as_str()])
                .set(depth_usage.quota as i64);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock stopwatch for a single request, started at handler entry and
/// consumed via `Metrics::record_request` in the `finally`-style tail of
/// each endpoint.
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn status_classes_bucket_correctly() {
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(500), "5xx");
    }

    #[test]
    fn recording_a_request_does_not_panic() {
        let metrics = Metrics::new();
        metrics.record_request("/api/jobs/submit", 201, std::time::Duration::from_millis(5));
        metrics.record_job_outcome("completed");
        metrics.refresh_gauges(1, &[]);
        let families = metrics.registry().gather();
        assert!(!families.is_empty());
    }
}
