// Metrics module
// Process-wide Prometheus counters for sessions, tool calls and backend requests

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Global metrics, registered on first use
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub struct Metrics {
    registry: Registry,
    sessions: IntCounterVec,
    tool_calls: IntCounterVec,
    backend_requests: IntCounterVec,
    session_rounds: HistogramVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let sessions = IntCounterVec::new(
            Opts::new("krypton_sessions_total", "Tool-use sessions by route and outcome"),
            &["route", "outcome"],
        )
        .expect("valid sessions metric");
        let tool_calls = IntCounterVec::new(
            Opts::new("krypton_tool_calls_total", "Tool executions by tool and status"),
            &["tool", "status"],
        )
        .expect("valid tool_calls metric");
        let backend_requests = IntCounterVec::new(
            Opts::new(
                "krypton_backend_requests_total",
                "Backend request attempts by backend and status",
            ),
            &["backend", "status"],
        )
        .expect("valid backend_requests metric");
        let session_rounds = HistogramVec::new(
            HistogramOpts::new("krypton_session_rounds", "Backend rounds used per session")
                .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]),
            &["route"],
        )
        .expect("valid session_rounds metric");

        for collector in [
            Box::new(sessions.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(tool_calls.clone()),
            Box::new(backend_requests.clone()),
            Box::new(session_rounds.clone()),
        ] {
            if let Err(e) = registry.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }

        Self {
            registry,
            sessions,
            tool_calls,
            backend_requests,
            session_rounds,
        }
    }

    pub fn record_session(&self, route: &str, outcome: &str, rounds: usize) {
        self.sessions.with_label_values(&[route, outcome]).inc();
        if rounds > 0 {
            self.session_rounds
                .with_label_values(&[route])
                .observe(rounds as f64);
        }
    }

    pub fn record_tool_call(&self, tool: &str, is_error: bool) {
        let status = if is_error { "error" } else { "ok" };
        self.tool_calls.with_label_values(&[tool, status]).inc();
    }

    pub fn record_backend_request(&self, backend: &str, status: &str) {
        self.backend_requests
            .with_label_values(&[backend, status])
            .inc();
    }

    pub fn tool_call_count(&self, tool: &str, status: &str) -> u64 {
        self.tool_calls.with_label_values(&[tool, status]).get()
    }

    pub fn session_count(&self, route: &str, outcome: &str) -> u64 {
        self.sessions.with_label_values(&[route, outcome]).get()
    }

    /// Observations and their sum for a route's rounds histogram
    pub fn session_rounds(&self, route: &str) -> (u64, f64) {
        let histogram = self.session_rounds.with_label_values(&[route]);
        (histogram.get_sample_count(), histogram.get_sample_sum())
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_text_output() {
        let before = METRICS.tool_call_count("metrics_test_tool", "error");
        METRICS.record_tool_call("metrics_test_tool", true);
        assert_eq!(METRICS.tool_call_count("metrics_test_tool", "error"), before + 1);

        METRICS.record_session("metrics_test_route", "completed", 2);
        METRICS.record_backend_request("metrics_test_backend", "ok");

        let text = METRICS.gather_text();
        assert!(text.contains("krypton_tool_calls_total"));
        assert!(text.contains("metrics_test_route"));
        assert!(text.contains("krypton_session_rounds_bucket"));
        assert!(text.contains("krypton_backend_requests_total"));
    }
}
