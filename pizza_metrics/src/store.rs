use crate::error::TelemetryError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Key for a counter or gauge: a metric name plus at most one dimension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub name: String,
    pub dim: Option<(String, String)>,
}

impl MetricKey {
    fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dim: None,
        }
    }

    fn with_dim(name: &str, key: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            dim: Some((key.to_string(), value.to_string())),
        }
    }
}

/// Running (sum, count) pair for one latency category.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub sum_ms: f64,
    pub count: u64,
}

impl LatencyStats {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Arithmetic mean; `None` when no samples exist, so callers can never
    /// divide by zero.
    pub fn average_ms(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum_ms / self.count as f64)
        } else {
            None
        }
    }

    fn add(&mut self, ms: f64) {
        self.sum_ms += ms;
        self.count += 1;
    }
}

#[derive(Default)]
struct StoreInner {
    counters: BTreeMap<MetricKey, f64>,
    gauges: BTreeMap<MetricKey, f64>,
    latency: BTreeMap<String, LatencyStats>,
    creation_latency: LatencyStats,
    active_users: HashMap<String, Instant>,
}

/// Process-wide aggregate state for the telemetry pipeline.
///
/// All writers (request instrumentation, event recorders) and the single
/// reader (the exporter) share one instance behind `Arc`. Mutation is
/// serialized by a std mutex rather than an async lock: every entry point is
/// synchronous and holds the lock only for a few map operations, so the
/// request path never suspends.
#[derive(Default)]
pub struct MetricStore {
    inner: Mutex<StoreInner>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned lock only means a writer panicked mid-mutation; the
        // aggregates are still usable, so keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rejects non-finite values, clamps negatives to zero. Returns `None`
    /// when the observation must be dropped.
    fn sanitize(name: &str, value: f64) -> Option<f64> {
        if !value.is_finite() {
            let err = TelemetryError::InvalidValue {
                name: name.to_string(),
                value,
            };
            warn!(metric = name, error = %err, "dropping metric observation");
            return None;
        }
        if value < 0.0 {
            warn!(metric = name, value, "clamping negative metric value to zero");
            return Some(0.0);
        }
        Some(value)
    }

    pub fn increment_counter(&self, name: &str, delta: f64, dim: Option<(&str, &str)>) {
        let Some(delta) = Self::sanitize(name, delta) else {
            return;
        };
        let key = match dim {
            Some((k, v)) => MetricKey::with_dim(name, k, v),
            None => MetricKey::plain(name),
        };
        *self.lock().counters.entry(key).or_insert(0.0) += delta;
    }

    pub fn set_gauge(&self, name: &str, value: f64, dim: Option<(&str, &str)>) {
        let Some(value) = Self::sanitize(name, value) else {
            return;
        };
        let key = match dim {
            Some((k, v)) => MetricKey::with_dim(name, k, v),
            None => MetricKey::plain(name),
        };
        self.lock().gauges.insert(key, value);
    }

    /// Adds one sample to the cumulative accumulator for `category`
    /// (an HTTP method in practice).
    pub fn record_latency(&self, category: &str, ms: f64) {
        let Some(ms) = Self::sanitize(category, ms) else {
            return;
        };
        self.lock()
            .latency
            .entry(category.to_string())
            .or_default()
            .add(ms);
    }

    /// Adds one sample to the resettable creation-latency accumulator.
    pub fn record_creation_latency(&self, ms: f64) {
        let Some(ms) = Self::sanitize("creation_latency", ms) else {
            return;
        };
        self.lock().creation_latency.add(ms);
    }

    /// Returns the creation-latency accumulator and resets it to empty.
    /// Called by the exporter once per tick; samples recorded between ticks
    /// where the push fails are lost, which is the accepted tradeoff.
    pub fn take_creation_latency(&self) -> LatencyStats {
        std::mem::take(&mut self.lock().creation_latency)
    }

    pub fn mark_active(&self, user_id: &str) {
        self.mark_active_at(user_id, Instant::now());
    }

    fn mark_active_at(&self, user_id: &str, at: Instant) {
        self.lock().active_users.insert(user_id.to_string(), at);
    }

    /// Number of users with activity inside the trailing window. Entries
    /// older than the window are evicted during the scan; the count is
    /// identical to filter-only semantics but the map stays bounded.
    pub fn active_user_count(&self, window: Duration) -> usize {
        self.active_user_count_at(Instant::now(), window)
    }

    fn active_user_count_at(&self, now: Instant, window: Duration) -> usize {
        let mut inner = self.lock();
        inner
            .active_users
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= window);
        inner.active_users.len()
    }

    /// Read-only copy of all counters, gauges and cumulative latency
    /// accumulators, plus the active-user count for `active_window`, taken
    /// under a single lock acquisition so one export tick sees one
    /// consistent state.
    pub fn snapshot(&self, active_window: Duration) -> MetricsSnapshot {
        self.snapshot_at(Instant::now(), active_window)
    }

    fn snapshot_at(&self, now: Instant, active_window: Duration) -> MetricsSnapshot {
        let mut inner = self.lock();
        inner
            .active_users
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= active_window);
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            latency: inner.latency.clone(),
            active_users: inner.active_users.len(),
        }
    }
}

/// Point-in-time copy of the store, consumed by the exporter while building
/// one tick's envelopes.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    counters: BTreeMap<MetricKey, f64>,
    gauges: BTreeMap<MetricKey, f64>,
    latency: BTreeMap<String, LatencyStats>,
    active_users: usize,
}

impl MetricsSnapshot {
    /// Active-user count as of the snapshot's window scan.
    pub fn active_users(&self) -> usize {
        self.active_users
    }

    /// Value of an undimensioned counter; zero if it was never incremented,
    /// matching lazy counter creation.
    pub fn counter(&self, name: &str) -> f64 {
        self.counters
            .get(&MetricKey::plain(name))
            .copied()
            .unwrap_or(0.0)
    }

    /// All `(dimension value, count)` pairs recorded under `name`, in
    /// deterministic (sorted) order.
    pub fn counters_with_dim(&self, name: &str) -> Vec<(String, f64)> {
        self.counters
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter_map(|(key, value)| {
                key.dim.as_ref().map(|(_, v)| (v.clone(), *value))
            })
            .collect()
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(&MetricKey::plain(name)).copied()
    }

    pub fn latency(&self, category: &str) -> LatencyStats {
        self.latency.get(category).copied().unwrap_or_default()
    }

    pub fn latencies(&self) -> impl Iterator<Item = (&str, &LatencyStats)> {
        self.latency.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_default_to_zero() {
        let store = MetricStore::new();
        store.increment_counter("http_requests_total", 1.0, None);
        store.increment_counter("http_requests_total", 2.0, None);

        let snapshot = store.snapshot(Duration::from_secs(300));
        assert_eq!(snapshot.counter("http_requests_total"), 3.0);
        assert_eq!(snapshot.counter("never_touched"), 0.0);
    }

    #[test]
    fn dimensioned_counters_are_tracked_independently() {
        let store = MetricStore::new();
        store.increment_counter("by_method", 1.0, Some(("method", "GET")));
        store.increment_counter("by_method", 1.0, Some(("method", "GET")));
        store.increment_counter("by_method", 1.0, Some(("method", "POST")));

        let snapshot = store.snapshot(Duration::from_secs(300));
        assert_eq!(
            snapshot.counters_with_dim("by_method"),
            vec![("GET".to_string(), 2.0), ("POST".to_string(), 1.0)]
        );
        // The plain key was never written.
        assert_eq!(snapshot.counter("by_method"), 0.0);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let store = MetricStore::new();
        store.increment_counter("c", f64::NAN, None);
        store.increment_counter("c", f64::INFINITY, None);
        store.set_gauge("g", f64::NEG_INFINITY, None);
        store.record_latency("GET", f64::NAN);

        let snapshot = store.snapshot(Duration::from_secs(300));
        assert_eq!(snapshot.counter("c"), 0.0);
        assert_eq!(snapshot.gauge("g"), None);
        assert!(snapshot.latency("GET").is_empty());
    }

    #[test]
    fn negative_values_clamp_to_zero() {
        let store = MetricStore::new();
        store.increment_counter("c", -5.0, None);
        store.record_latency("GET", -12.5);

        let snapshot = store.snapshot(Duration::from_secs(300));
        assert_eq!(snapshot.counter("c"), 0.0);
        // The clamped sample still counts, with zero contribution.
        assert_eq!(snapshot.latency("GET").count, 1);
        assert_eq!(snapshot.latency("GET").sum_ms, 0.0);
    }

    #[test]
    fn gauges_keep_last_observation() {
        let store = MetricStore::new();
        store.set_gauge("mem", 40.0, None);
        store.set_gauge("mem", 61.5, None);
        assert_eq!(store.snapshot(Duration::from_secs(300)).gauge("mem"), Some(61.5));
    }

    #[test]
    fn latency_average_matches_arithmetic_mean() {
        let store = MetricStore::new();
        for ms in [10.0, 20.0, 60.0] {
            store.record_latency("GET", ms);
        }
        let stats = store.snapshot(Duration::from_secs(300)).latency("GET");
        assert_eq!(stats.count, 3);
        assert_eq!(stats.average_ms(), Some(30.0));
    }

    #[test]
    fn empty_latency_has_no_average() {
        assert_eq!(LatencyStats::default().average_ms(), None);
    }

    #[test]
    fn take_creation_latency_resets_the_accumulator() {
        let store = MetricStore::new();
        store.record_creation_latency(100.0);
        store.record_creation_latency(200.0);

        let taken = store.take_creation_latency();
        assert_eq!(taken.average_ms(), Some(150.0));
        assert!(store.take_creation_latency().is_empty());
    }

    #[test]
    fn active_window_boundary() {
        let window = Duration::from_secs(300);
        let start = Instant::now();
        let store = MetricStore::new();
        store.mark_active_at("user-1", start);

        let just_inside = start + window - Duration::from_millis(1);
        assert_eq!(store.active_user_count_at(just_inside, window), 1);

        let just_outside = start + window + Duration::from_millis(1);
        assert_eq!(store.active_user_count_at(just_outside, window), 0);
    }

    #[test]
    fn snapshot_carries_the_active_count_from_its_own_scan() {
        let window = Duration::from_secs(300);
        let start = Instant::now();
        let store = MetricStore::new();
        store.increment_counter("http_requests_total", 1.0, None);
        store.mark_active_at("user-1", start);
        store.mark_active_at("user-2", start + Duration::from_secs(200));

        // user-1 has gone stale by snapshot time; user-2 has not.
        let snapshot = store.snapshot_at(start + Duration::from_secs(400), window);
        assert_eq!(snapshot.active_users(), 1);
        assert_eq!(snapshot.counter("http_requests_total"), 1.0);
    }

    #[test]
    fn activity_refreshes_last_seen() {
        let window = Duration::from_secs(300);
        let start = Instant::now();
        let store = MetricStore::new();
        store.mark_active_at("user-1", start);
        store.mark_active_at("user-2", start);
        // user-1 comes back later, user-2 goes stale.
        store.mark_active_at("user-1", start + Duration::from_secs(400));

        let now = start + Duration::from_secs(500);
        assert_eq!(store.active_user_count_at(now, window), 1);
    }
}
