use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down. Stores f64 bits in an atomic.
#[derive(Default)]
struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn add(&self, delta: f64) {
        loop {
            let current = self.value.load(Ordering::Relaxed);
            let updated = (f64::from_bits(current as u64) + delta).to_bits() as i64;
            if self
                .value
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// In-memory histogram. Keeps every observation so percentiles are exact.
#[derive(Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        HistogramSummary {
            count: count as u64,
            sum: obs.iter().sum(),
            p50: obs[count / 2],
            p95: obs[((count as f64 * 0.95) as usize).min(count - 1)],
            p99: obs[((count as f64 * 0.99) as usize).min(count - 1)],
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name plus labels sorted by label name, so the same label set
/// maps to the same series regardless of call-site ordering.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// One family of series sharing a metric type.
struct SeriesMap<M> {
    series: RwLock<HashMap<SeriesKey, Arc<M>>>,
}

impl<M: Default> SeriesMap<M> {
    fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, key: SeriesKey) -> Arc<M> {
        if let Some(m) = self.series.read().get(&key) {
            return m.clone();
        }
        self.series.write().entry(key).or_default().clone()
    }

    fn get(&self, key: &SeriesKey) -> Option<Arc<M>> {
        self.series.read().get(key).cloned()
    }
}

/// Thread-safe in-memory metrics recorder.
pub struct MetricsRecorder {
    counters: SeriesMap<Counter>,
    gauges: SeriesMap<Gauge>,
    histograms: SeriesMap<Histogram>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            counters: SeriesMap::new(),
            gauges: SeriesMap::new(),
            histograms: SeriesMap::new(),
        }
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.counters
            .get_or_create(SeriesKey::new(name, labels))
            .increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges
            .get_or_create(SeriesKey::new(name, labels))
            .set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        self.gauges
            .get_or_create(SeriesKey::new(name, labels))
            .add(delta);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.histograms
            .get_or_create(SeriesKey::new(name, labels))
            .observe(value);
    }

    /// Summary of a histogram, zeroed when the series does not exist.
    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.histograms
            .get(&SeriesKey::new(name, labels))
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    /// Current value of a counter, zero when the series does not exist.
    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&SeriesKey::new(name, labels))
            .map_or(0, |c| c.get())
    }

    /// Current value of a gauge, zero when the series does not exist.
    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.gauges
            .get(&SeriesKey::new(name, labels))
            .map_or(0.0, |g| g.get())
    }
}
