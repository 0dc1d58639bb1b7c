use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics for the identity service
pub struct MetricsRegistry {
    registry: Registry,

    // HTTP Metrics
    pub http_requests_total: CounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // Identity Metrics
    pub logins_total: CounterVec,
    pub refresh_total: CounterVec,
    pub codes_total: CounterVec,
    pub quota_checks_total: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests").namespace("identity"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration")
                .namespace("identity")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let logins_total = CounterVec::new(
            Opts::new("logins_total", "Sessions started, by sign-in method").namespace("identity"),
            &["method"],
        )?;
        registry.register(Box::new(logins_total.clone()))?;

        let refresh_total = CounterVec::new(
            Opts::new("refresh_total", "Refresh token presentations, by outcome").namespace("identity"),
            &["outcome"],
        )?;
        registry.register(Box::new(refresh_total.clone()))?;

        let codes_total = CounterVec::new(
            Opts::new("codes_total", "Verification code events, by outcome").namespace("identity"),
            &["outcome"],
        )?;
        registry.register(Box::new(codes_total.clone()))?;

        let quota_checks_total = CounterVec::new(
            Opts::new("quota_checks_total", "Quota checks, by tier and outcome").namespace("identity"),
            &["tier", "outcome"],
        )?;
        registry.register(Box::new(quota_checks_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            logins_total,
            refresh_total,
            codes_total,
            quota_checks_total,
        }))
    }

    pub fn record_login(&self, method: &str) {
        self.logins_total.with_label_values(&[method]).inc();
    }

    pub fn record_refresh(&self, outcome: &str) {
        self.refresh_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_code(&self, outcome: &str) {
        self.codes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_quota(&self, tier: &str, outcome: &str) {
        self.quota_checks_total.with_label_values(&[tier, outcome]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
