//! Runtime metrics: counters, gauges, histograms, and component health.
//!
//! [`GameMetrics`] is the single sink all subsystems report into. The
//! [`GameMetrics::scrape`] output follows the Prometheus text exposition
//! format so the health server can serve it directly.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Histogram bucket boundaries (upper bounds, in ascending order).
#[derive(Debug, Clone)]
pub struct HistogramBuckets {
    pub boundaries: Vec<f64>,
}

impl HistogramBuckets {
    /// Default buckets for request latencies, in seconds.
    pub fn latency() -> Self {
        Self {
            boundaries: vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        }
    }

    /// Default buckets for longer-running durations, in seconds.
    pub fn duration() -> Self {
        Self {
            boundaries: vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0],
        }
    }
}

/// Health of a single monitored component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Aggregated health report across all registered components.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Worst status among all components.
    pub status: HealthStatus,
    /// Per-component statuses.
    pub components: HashMap<String, HealthStatus>,
}

#[derive(Debug)]
struct Histogram {
    boundaries: Vec<f64>,
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Central metrics registry.
///
/// Counters and gauges are lock-free; histograms and health state take a
/// short mutex on update.
#[derive(Default)]
pub struct GameMetrics {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>, // f64 bits
    histograms: Mutex<HashMap<String, Histogram>>,
    health: Mutex<HashMap<String, HealthStatus>>,
}

impl GameMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Counters -----------------------------------------------------------

    /// Adds `value` to the named counter, creating it at zero if needed.
    pub fn increment_counter(&self, name: &str, value: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Current value of the named counter (0 if never incremented).
    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    /// Sets the named gauge to `value`.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `delta` to the named gauge.
    pub fn add_gauge(&self, name: &str, delta: f64) {
        let entry = self
            .gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let mut current = entry.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match entry.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Subtracts `delta` from the named gauge.
    pub fn sub_gauge(&self, name: &str, delta: f64) {
        self.add_gauge(name, -delta);
    }

    /// Current value of the named gauge (0.0 if never set).
    pub fn gauge_value(&self, name: &str) -> f64 {
        self.gauges
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Registers a histogram with the given bucket boundaries.
    ///
    /// Re-registering an existing histogram is a no-op.
    pub fn register_histogram(&self, name: &str, buckets: HistogramBuckets) {
        let mut histograms = self.histograms.lock();
        histograms.entry(name.to_string()).or_insert_with(|| Histogram {
            bucket_counts: vec![0; buckets.boundaries.len()],
            boundaries: buckets.boundaries,
            sum: 0.0,
            count: 0,
        });
    }

    /// Records an observation. Unregistered histogram names are ignored.
    pub fn record_histogram(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.lock();
        if let Some(h) = histograms.get_mut(name) {
            for (i, bound) in h.boundaries.iter().enumerate() {
                if value <= *bound {
                    h.bucket_counts[i] += 1;
                }
            }
            h.sum += value;
            h.count += 1;
        }
    }

    /// Total number of observations recorded for a histogram.
    pub fn histogram_count(&self, name: &str) -> u64 {
        self.histograms.lock().get(name).map(|h| h.count).unwrap_or(0)
    }

    // -- Health -------------------------------------------------------------

    /// Reports the health of a named component.
    pub fn set_component_health(&self, component: &str, status: HealthStatus) {
        self.health.lock().insert(component.to_string(), status);
    }

    /// Aggregates component health; overall status is the worst component.
    pub fn health_check(&self) -> HealthCheckResult {
        let components = self.health.lock().clone();
        let status = components
            .values()
            .copied()
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthCheckResult { status, components }
    }

    // -- Export -------------------------------------------------------------

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn scrape(&self) -> String {
        let mut out = String::new();

        let mut counter_names: Vec<String> =
            self.counters.iter().map(|e| e.key().clone()).collect();
        counter_names.sort();
        for name in counter_names {
            let value = self.counter_value(&name);
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        let mut gauge_names: Vec<String> = self.gauges.iter().map(|e| e.key().clone()).collect();
        gauge_names.sort();
        for name in gauge_names {
            let value = self.gauge_value(&name);
            let _ = writeln!(out, "# TYPE {name} gauge");
            let _ = writeln!(out, "{name} {value}");
        }

        let histograms = self.histograms.lock();
        let mut histogram_names: Vec<&String> = histograms.keys().collect();
        histogram_names.sort();
        for name in histogram_names {
            let h = &histograms[name.as_str()];
            let _ = writeln!(out, "# TYPE {name} histogram");
            for (bound, count) in h.boundaries.iter().zip(&h.bucket_counts) {
                let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {count}");
            }
            let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", h.count);
            let _ = writeln!(out, "{name}_sum {}", h.sum);
            let _ = writeln!(out, "{name}_count {}", h.count);
        }

        out
    }

    /// Clears all metrics and health state.
    pub fn reset(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.lock().clear();
        self.health.lock().clear();
    }
}
