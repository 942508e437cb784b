//! Process-wide metrics
//!
//! Counters and gauges are plain atomics; histograms keep a bounded window of
//! recent observations so summaries stay cheap. Everything is registered by
//! name in a global registry and exported by [`crate::tracing::prometheus`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::trace;

/// Maximum observations a histogram keeps for its summary
const HISTOGRAM_WINDOW: usize = 4096;

/// A counter metric that can only increase
#[derive(Clone)]
pub struct Counter {
    name: Arc<str>,
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Increment the counter by 1
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add a value to the counter
    pub fn add(&self, value: u64) {
        let total = self.value.fetch_add(value, Ordering::Relaxed) + value;
        trace!(metric = "counter", name = %self.name, total, "Counter incremented");
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge metric that can increase or decrease
#[derive(Clone)]
pub struct Gauge {
    name: Arc<str>,
    value: Arc<AtomicI64>,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Set the gauge value
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
        trace!(metric = "gauge", name = %self.name, value, "Gauge set");
    }

    /// Increment the gauge by 1
    pub fn increment(&self) {
        let value = self.value.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(metric = "gauge", name = %self.name, value, "Gauge incremented");
    }

    /// Decrement the gauge by 1
    pub fn decrement(&self) {
        let value = self.value.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(metric = "gauge", name = %self.name, value, "Gauge decremented");
    }

    /// Get the current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Summary of a histogram's current window
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

#[derive(Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    window: VecDeque<f64>,
}

/// A histogram metric for recording durations
#[derive(Clone)]
pub struct Histogram {
    name: Arc<str>,
    state: Arc<RwLock<HistogramState>>,
}

impl Histogram {
    /// Create a new histogram
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(HistogramState::default())),
        }
    }

    /// Record an observation
    pub fn observe(&self, value: f64) {
        if let Ok(mut state) = self.state.write() {
            state.count += 1;
            state.sum += value;
            if state.window.len() == HISTOGRAM_WINDOW {
                state.window.pop_front();
            }
            state.window.push_back(value);
            trace!(metric = "histogram", name = %self.name, value, "Observation recorded");
        }
    }

    /// Record a duration in seconds
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Totals plus percentiles over the recent window
    pub fn stats(&self) -> Option<HistogramStats> {
        let state = self.state.read().ok()?;
        if state.window.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = state.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let percentile = |p: f64| sorted[((sorted.len() - 1) as f64 * p) as usize];

        Some(HistogramStats {
            count: state.count,
            sum: state.sum,
            p50: percentile(0.50),
            p90: percentile(0.90),
            p99: percentile(0.99),
        })
    }
}

/// Named metrics registry
#[derive(Default)]
pub struct Metrics {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
    histograms: RwLock<BTreeMap<String, Histogram>>,
}

fn get_or_insert<T: Clone>(
    map: &RwLock<BTreeMap<String, T>>,
    name: &str,
    create: impl FnOnce(&str) -> T,
) -> T {
    if let Ok(existing) = map.read()
        && let Some(metric) = existing.get(name)
    {
        return metric.clone();
    }

    match map.write() {
        Ok(mut map) => map
            .entry(name.to_string())
            .or_insert_with(|| create(name))
            .clone(),
        Err(_) => create(name),
    }
}

impl Metrics {
    /// Create a new metrics registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str) -> Counter {
        get_or_insert(&self.counters, name, Counter::new)
    }

    /// Get or create a gauge
    pub fn gauge(&self, name: &str) -> Gauge {
        get_or_insert(&self.gauges, name, Gauge::new)
    }

    /// Get or create a histogram
    pub fn histogram(&self, name: &str) -> Histogram {
        get_or_insert(&self.histograms, name, Histogram::new)
    }

    /// Current counter values, sorted by name
    pub fn all_counters(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.get())).collect())
            .unwrap_or_default()
    }

    /// Current gauge values, sorted by name
    pub fn all_gauges(&self) -> Vec<(String, i64)> {
        self.gauges
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.get())).collect())
            .unwrap_or_default()
    }

    /// Summaries of every histogram that has observations
    pub fn all_histograms(&self) -> Vec<(String, HistogramStats)> {
        self.histograms
            .read()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.stats().map(|stats| (k.clone(), stats)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_METRICS: Metrics = Metrics::new();
}

/// Get or create a global counter
pub fn counter(name: &str) -> Counter {
    GLOBAL_METRICS.counter(name)
}

/// Get or create a global gauge
pub fn gauge(name: &str) -> Gauge {
    GLOBAL_METRICS.gauge(name)
}

/// Get or create a global histogram
pub fn histogram(name: &str) -> Histogram {
    GLOBAL_METRICS.histogram(name)
}

/// Get the global metrics instance
pub fn global() -> &'static Metrics {
    &GLOBAL_METRICS
}

/// Records the elapsed time into a histogram when dropped
pub struct Timer {
    histogram: Histogram,
    start: Instant,
}

impl Timer {
    /// Start timing into `histogram`
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.histogram.observe_duration(self.start.elapsed());
    }
}
