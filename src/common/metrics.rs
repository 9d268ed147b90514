//! Request and transaction metrics
//!
//! Prometheus text exposition of:
//! - request counts and latency histograms per endpoint
//! - failures by error kind
//! - lock conflicts reported by the storage engine, including the ones
//!   masked during account initialization
//! - schema creation retries

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::Error;

/// Latency bucket boundaries in milliseconds
const LATENCY_BUCKETS: [f64; 10] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
];

#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: &'static [f64],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            boundaries: &LATENCY_BUCKETS,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, millis: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&le| millis <= le)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((millis * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(le, count)` pairs, ending with `+Inf`.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut total = 0;
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            total += bucket.load(Ordering::Relaxed);
            let le = self.boundaries.get(i).copied().unwrap_or(f64::INFINITY);
            out.push((le, total));
        }
        out
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests: Counter,
    pub errors: Counter,
    pub latency: Histogram,
}

#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<BTreeMap<String, Arc<EndpointMetrics>>>,
    errors_by_kind: Mutex<BTreeMap<&'static str, u64>>,

    pub contention: Counter,
    pub masked_contention: Counter,
    pub schema_retries: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            errors_by_kind: Mutex::new(BTreeMap::new()),
            contention: Counter::new(),
            masked_contention: Counter::new(),
            schema_retries: Counter::new(),
            start_time: Instant::now(),
        }
    }

    pub fn endpoint(&self, name: &str) -> Arc<EndpointMetrics> {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.entry(name.to_string()).or_default().clone()
    }

    /// Record the outcome of one request.
    pub fn record(&self, endpoint: &str, elapsed: Duration, error: Option<&Error>) {
        let metrics = self.endpoint(endpoint);
        metrics.requests.inc();
        metrics.latency.observe(elapsed.as_secs_f64() * 1000.0);

        if let Some(err) = error {
            metrics.errors.inc();
            if err.is_contention() {
                self.contention.inc();
            }
            let mut kinds = self
                .errors_by_kind
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *kinds.entry(err.kind()).or_insert(0) += 1;
        }
    }

    pub fn errors_of_kind(&self, kind: &str) -> u64 {
        self.errors_by_kind
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        counter(
            &mut out,
            "txgate_contention_total",
            "Lock conflicts surfaced to callers",
            self.contention.get(),
        );
        counter(
            &mut out,
            "txgate_masked_contention_total",
            "Lock conflicts masked during account initialization",
            self.masked_contention.get(),
        );
        counter(
            &mut out,
            "txgate_schema_retries_total",
            "Schema creation retries",
            self.schema_retries.get(),
        );

        out.push_str("# HELP txgate_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE txgate_uptime_seconds gauge\n");
        let _ = writeln!(out, "txgate_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP txgate_errors_total Failures by kind\n");
        out.push_str("# TYPE txgate_errors_total counter\n");
        for (kind, count) in self
            .errors_by_kind
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            let _ = writeln!(out, "txgate_errors_total{{kind=\"{}\"}} {}", kind, count);
        }

        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());

        out.push_str("# HELP txgate_requests_total Requests per endpoint\n");
        out.push_str("# TYPE txgate_requests_total counter\n");
        for (name, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "txgate_requests_total{{endpoint=\"{}\"}} {}",
                name,
                m.requests.get()
            );
        }

        out.push_str("# HELP txgate_request_errors_total Failed requests per endpoint\n");
        out.push_str("# TYPE txgate_request_errors_total counter\n");
        for (name, m) in endpoints.iter() {
            let _ = writeln!(
                out,
                "txgate_request_errors_total{{endpoint=\"{}\"}} {}",
                name,
                m.errors.get()
            );
        }

        out.push_str("# HELP txgate_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE txgate_request_duration_ms histogram\n");
        for (name, m) in endpoints.iter() {
            for (le, count) in m.latency.cumulative() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "txgate_request_duration_ms_bucket{{endpoint=\"{}\",le=\"{}\"}} {}",
                    name, le, count
                );
            }
            let _ = writeln!(
                out,
                "txgate_request_duration_ms_sum{{endpoint=\"{}\"}} {}",
                name,
                m.latency.sum()
            );
            let _ = writeln!(
                out,
                "txgate_request_duration_ms_count{{endpoint=\"{}\"}} {}",
                name,
                m.latency.count()
            );
        }

        out
    }
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();
        hist.observe(0.5);
        hist.observe(30.0);
        hist.observe(9000.0);

        assert_eq!(hist.count(), 3);
        let buckets = hist.cumulative();
        assert_eq!(buckets.first(), Some(&(1.0, 1)));
        assert_eq!(buckets.last().map(|b| b.1), Some(3));
        assert!(buckets.last().unwrap().0.is_infinite());
    }

    #[test]
    fn test_registry_records_errors() {
        let registry = MetricsRegistry::new();
        registry.record("append", Duration::from_millis(3), None);
        registry.record("append", Duration::from_millis(7), Some(&Error::Contention));
        registry.record(
            "bank",
            Duration::from_millis(2),
            Some(&Error::MalformedRequest("x".into())),
        );

        let append = registry.endpoint("append");
        assert_eq!(append.requests.get(), 2);
        assert_eq!(append.errors.get(), 1);
        assert_eq!(registry.contention.get(), 1);
        assert_eq!(registry.errors_of_kind("malformed_request"), 1);

        let text = registry.to_prometheus();
        assert!(text.contains("txgate_requests_total{endpoint=\"append\"} 2"));
        assert!(text.contains("txgate_errors_total{kind=\"contention\"} 1"));
    }
}
