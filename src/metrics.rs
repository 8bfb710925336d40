//! Thread-safe metrics collection and snapshot queries.
//!
//! Every scenario invocation submits request samples, check results and
//! custom trend values here, from arbitrarily many VU tasks at once. Reads
//! go through [`Collector::snapshot`], which copies the aggregate state
//! under the lock so queries see a consistent point in time.
//!
//! Percentiles use linear interpolation between closest ranks: for `n`
//! sorted values the rank of percentile `p` is `p/100 * (n-1)`, and
//! fractional ranks interpolate between the two neighbouring values. The
//! 95th percentile of [100, 200, 300, 400, 500] is therefore 480.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One completed HTTP call.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    /// HTTP status, or 0 for a transport-level failure (connect error,
    /// timeout, malformed response).
    pub status: u16,
    /// Scenario that issued the request.
    pub scenario: String,
    /// Step label, e.g. `stories_list` or `login`.
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestSample {
    /// Failed means transport error or a 4xx/5xx status, matching the
    /// `http_req_failed` rate of the threshold language.
    pub fn failed(&self) -> bool {
        self.status == 0 || self.status >= 400
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Pass/total counters for one named check.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CheckStats {
    pub passed: u64,
    pub total: u64,
}

impl CheckStats {
    /// Pass rate; 0 when the check was never evaluated.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    samples: Vec<RequestSample>,
    checks: BTreeMap<String, CheckStats>,
    trends: BTreeMap<String, Vec<f64>>,
    iterations: u64,
    failed_iterations: u64,
    aborted_iterations: u64,
}

/// Shared aggregator for all VU tasks of one run.
///
/// A single mutex over the aggregate state keeps writes cheap (a push and a
/// counter bump) and preserves per-VU submission order.
#[derive(Debug, Default)]
pub struct Collector {
    inner: Mutex<Inner>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sample(&self, sample: RequestSample) {
        self.inner.lock().samples.push(sample);
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        let mut inner = self.inner.lock();
        let stats = inner.checks.entry(name.to_string()).or_default();
        stats.total += 1;
        if passed {
            stats.passed += 1;
        }
    }

    pub fn add_trend(&self, name: &str, value: f64) {
        self.inner
            .lock()
            .trends
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    /// One scenario invocation ran to completion (`ok` false when the
    /// scenario returned an error).
    pub fn record_iteration(&self, ok: bool) {
        let mut inner = self.inner.lock();
        inner.iterations += 1;
        if !ok {
            inner.failed_iterations += 1;
        }
    }

    /// One VU was abandoned past the grace period mid-iteration.
    pub fn record_aborted_iteration(&self) {
        self.inner.lock().aborted_iterations += 1;
    }

    /// Consistent point-in-time copy of the aggregate state.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        Snapshot {
            samples: inner.samples.clone(),
            checks: inner.checks.clone(),
            trends: inner.trends.clone(),
            iterations: inner.iterations,
            failed_iterations: inner.failed_iterations,
            aborted_iterations: inner.aborted_iterations,
        }
    }
}

/// Immutable copy of the collector state, safe to query repeatedly.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    samples: Vec<RequestSample>,
    checks: BTreeMap<String, CheckStats>,
    trends: BTreeMap<String, Vec<f64>>,
    pub iterations: u64,
    pub failed_iterations: u64,
    pub aborted_iterations: u64,
}

impl Snapshot {
    pub fn request_count(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn count_matching(&self, predicate: impl Fn(&RequestSample) -> bool) -> u64 {
        self.samples.iter().filter(|s| predicate(s)).count() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.count_matching(RequestSample::failed)
    }

    /// `http_req_failed` rate; 0 when no requests were made.
    pub fn failed_rate(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.failed_count() as f64 / self.samples.len() as f64
        }
    }

    /// Request durations in milliseconds, sorted ascending, optionally
    /// scoped to one step label.
    pub fn durations_ms(&self, label: Option<&str>) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| label.map_or(true, |l| s.label == l))
            .map(RequestSample::duration_ms)
            .collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }

    pub fn duration_percentile(&self, p: f64, label: Option<&str>) -> f64 {
        percentile(&self.durations_ms(label), p)
    }

    pub fn checks(&self) -> &BTreeMap<String, CheckStats> {
        &self.checks
    }

    /// Pass rate over every check evaluation of the run; 0 without samples.
    pub fn checks_rate(&self) -> f64 {
        let (passed, total) = self
            .checks
            .values()
            .fold((0u64, 0u64), |(p, t), c| (p + c.passed, t + c.total));
        if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        }
    }

    pub fn trend_names(&self) -> impl Iterator<Item = &str> {
        self.trends.keys().map(String::as_str)
    }

    pub fn trend_values(&self, name: &str) -> Option<Vec<f64>> {
        self.trends.get(name).map(|values| {
            let mut sorted = values.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            sorted
        })
    }

    /// Step labels seen so far, sorted and deduplicated.
    pub fn labels(&self) -> Vec<String> {
        use itertools::Itertools;
        self.samples
            .iter()
            .map(|s| s.label.clone())
            .sorted()
            .dedup()
            .collect()
    }

    pub fn samples(&self) -> &[RequestSample] {
        &self.samples
    }
}

/// Linear-interpolation percentile over ascending-sorted values.
///
/// Rank of percentile `p` is `p/100 * (n-1)`; fractional ranks interpolate
/// between the two neighbouring values. Empty input yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(label: &str, status: u16, ms: u64) -> RequestSample {
        RequestSample {
            timestamp: Utc::now(),
            duration: Duration::from_millis(ms),
            status,
            scenario: "test".into(),
            label: label.into(),
            error: None,
        }
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(percentile(&values, 95.0), 480.0);
        assert_eq!(percentile(&values, 50.0), 300.0);
        assert_eq!(percentile(&values, 0.0), 100.0);
        assert_eq!(percentile(&values, 100.0), 500.0);
    }

    #[test]
    fn test_percentile_degenerate_inputs() {
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[42.0], 95.0), 42.0);
    }

    #[test]
    fn test_every_sample_counted_exactly_once() {
        let collector = Collector::new();
        collector.record_sample(sample("a", 200, 10));
        collector.record_sample(sample("a", 500, 20));
        collector.record_sample(sample("b", 200, 30));

        let snap = collector.snapshot();
        assert_eq!(snap.request_count(), 3);
        assert_eq!(snap.count_matching(|s| s.status == 200), 2);
        assert_eq!(snap.failed_count(), 1);
        assert_eq!(snap.durations_ms(Some("a")).len(), 2);
    }

    #[test]
    fn test_snapshot_idempotent_without_writes() {
        let collector = Collector::new();
        collector.record_sample(sample("a", 200, 10));
        collector.record_check("status is 200", true);
        collector.add_trend("response_time_trend", 10.0);

        let a = collector.snapshot();
        let b = collector.snapshot();
        assert_eq!(a.request_count(), b.request_count());
        assert_eq!(a.checks_rate(), b.checks_rate());
        assert_eq!(a.durations_ms(None), b.durations_ms(None));
        assert_eq!(
            a.trend_values("response_time_trend"),
            b.trend_values("response_time_trend")
        );
    }

    #[test]
    fn test_rates_are_zero_without_samples() {
        let snap = Collector::new().snapshot();
        assert_eq!(snap.failed_rate(), 0.0);
        assert_eq!(snap.checks_rate(), 0.0);
    }

    #[test]
    fn test_check_rates_aggregate_per_name() {
        let collector = Collector::new();
        collector.record_check("status is 200", true);
        collector.record_check("status is 200", true);
        collector.record_check("status is 200", false);
        collector.record_check("token present", true);

        let snap = collector.snapshot();
        assert_eq!(snap.checks()["status is 200"].total, 3);
        assert_eq!(snap.checks()["status is 200"].passed, 2);
        assert_eq!(snap.checks_rate(), 0.75);
    }

    #[test]
    fn test_concurrent_writers() {
        let collector = Arc::new(Collector::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let collector = Arc::clone(&collector);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    collector.record_sample(sample("load", 200, i));
                    collector.record_check("ok", true);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = collector.snapshot();
        assert_eq!(snap.request_count(), 800);
        assert_eq!(snap.checks()["ok"].total, 800);
        assert_eq!(snap.checks_rate(), 1.0);
    }
}
