use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus instruments for the terminal checkout service.
///
/// Constructed once at startup and cloned into application state; every
/// counter lives in a private registry so tests can build as many isolated
/// instances as they need.
#[derive(Clone)]
pub struct TerminalMetrics {
    registry: Registry,
    processor_requests: IntCounterVec,
    checkout_outcomes: IntCounterVec,
    poll_attempts: IntCounterVec,
    poll_duration_seconds: Histogram,
    http_errors_total: IntCounterVec,
}

impl TerminalMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let processor_requests = IntCounterVec::new(
            Opts::new(
                "processor_requests_total",
                "Payment processor calls grouped by endpoint and result",
            ),
            &["endpoint", "result"],
        )?;
        let checkout_outcomes = IntCounterVec::new(
            Opts::new(
                "terminal_checkout_outcomes_total",
                "Finished checkouts grouped by flow and final status",
            ),
            &["flow", "status"],
        )?;
        let poll_attempts = IntCounterVec::new(
            Opts::new(
                "checkout_poll_attempts_total",
                "Status poll attempts grouped by result",
            ),
            &["result"],
        )?;
        let poll_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "checkout_poll_duration_seconds",
                "Wall time from first poll to a terminal status or timeout",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0]),
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["service", "code", "status"],
        )?;
        registry.register(Box::new(processor_requests.clone()))?;
        registry.register(Box::new(checkout_outcomes.clone()))?;
        registry.register(Box::new(poll_attempts.clone()))?;
        registry.register(Box::new(poll_duration_seconds.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        Ok(Self {
            registry,
            processor_requests,
            checkout_outcomes,
            poll_attempts,
            poll_duration_seconds,
            http_errors_total,
        })
    }

    pub fn record_processor_request(&self, endpoint: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.processor_requests
            .with_label_values(&[endpoint, result])
            .inc();
    }

    pub fn record_checkout_outcome(&self, flow: &str, status: &str) {
        self.checkout_outcomes
            .with_label_values(&[flow, status])
            .inc();
    }

    pub fn record_poll_attempt(&self, result: &str) {
        self.poll_attempts.with_label_values(&[result]).inc();
    }

    pub fn observe_poll_duration(&self, seconds: f64) {
        self.poll_duration_seconds.observe(seconds);
    }

    pub fn record_http_error(&self, service: &str, code: &str, status: u16) {
        self.http_errors_total
            .with_label_values(&[service, code, status.to_string().as_str()])
            .inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
