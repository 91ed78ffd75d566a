//! # Metrics
//!
//! Prometheus metrics for the secret service, held in one [`Metrics`] sink
//! built at startup and handed to whoever records observations.
//!
//! ## Metrics Exposed
//!
//! - `ares_http_requests_total{method,endpoint,status}` - HTTP requests served
//! - `ares_http_request_duration_seconds{method,endpoint}` - HTTP latency
//! - `ares_secrets_created_total` - Secrets created
//! - `ares_secrets_read_total` - Secrets successfully read
//! - `ares_secrets_already_read_total` - Reads refused because the secret was already read
//! - `ares_secrets_expired_read_total` - Reads refused because the secret had expired
//! - `ares_secrets_cleaned_up_total` - Expired secrets removed by the reaper
//! - `ares_active_secrets` - Unread, unexpired secrets (refreshed by the reaper)
//! - `ares_encryption_errors_total` / `ares_decryption_errors_total` - Cipher failures

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub secrets_created_total: IntCounter,
    pub secrets_read_total: IntCounter,
    pub secrets_already_read_total: IntCounter,
    pub secrets_expired_read_total: IntCounter,
    pub secrets_cleaned_up_total: IntCounter,
    pub active_secrets: IntGauge,
    pub encryption_errors_total: IntCounter,
    pub decryption_errors_total: IntCounter,
}

impl Metrics {
    /// Build every metric and register it with a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("ares_http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "ares_http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(prometheus::DEFAULT_BUCKETS.to_vec()),
            &["method", "endpoint"],
        )?;

        let counter = |name: &str, help: &str| IntCounter::new(name, help);
        let secrets_created_total =
            counter("ares_secrets_created_total", "Total number of secrets created")?;
        let secrets_read_total = counter(
            "ares_secrets_read_total",
            "Total number of secrets read successfully",
        )?;
        let secrets_already_read_total = counter(
            "ares_secrets_already_read_total",
            "Attempts to read a secret that was already read",
        )?;
        let secrets_expired_read_total = counter(
            "ares_secrets_expired_read_total",
            "Attempts to read a secret that had expired",
        )?;
        let secrets_cleaned_up_total = counter(
            "ares_secrets_cleaned_up_total",
            "Total number of expired secrets removed by cleanup",
        )?;
        let active_secrets = IntGauge::new(
            "ares_active_secrets",
            "Current number of unread, unexpired secrets",
        )?;
        let encryption_errors_total = counter(
            "ares_encryption_errors_total",
            "Total number of encryption errors",
        )?;
        let decryption_errors_total = counter(
            "ares_decryption_errors_total",
            "Total number of decryption errors",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        for c in [
            &secrets_created_total,
            &secrets_read_total,
            &secrets_already_read_total,
            &secrets_expired_read_total,
            &secrets_cleaned_up_total,
            &encryption_errors_total,
            &decryption_errors_total,
        ] {
            registry.register(Box::new(c.clone()))?;
        }
        registry.register(Box::new(active_secrets.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            secrets_created_total,
            secrets_read_total,
            secrets_already_read_total,
            secrets_expired_read_total,
            secrets_cleaned_up_total,
            active_secrets,
            encryption_errors_total,
            decryption_errors_total,
        })
    }

    /// Record one served HTTP request.
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, endpoint])
            .observe(seconds);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("encode metrics")?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_registries() {
        // Two sinks in one process must not collide.
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.secrets_created_total.inc();
        assert_eq!(a.secrets_created_total.get(), 1);
        assert_eq!(b.secrets_created_total.get(), 0);
    }

    #[test]
    fn render_includes_request_labels() {
        let m = Metrics::new().unwrap();
        m.observe_request("GET", "/api/secrets/{id}", 410, 0.002);
        m.active_secrets.set(3);

        let text = String::from_utf8(m.render().unwrap()).unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with("ares_http_requests_total{"))
            .unwrap();
        assert!(line.contains(r#"endpoint="/api/secrets/{id}""#));
        assert!(line.contains(r#"status="410""#));
        assert!(line.ends_with(" 1"));
        assert!(text.contains("ares_active_secrets 3"));
        assert!(text.contains("ares_http_request_duration_seconds_bucket"));
    }
}
