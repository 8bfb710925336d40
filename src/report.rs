//! Final run report: aggregates, per-check rates, threshold verdicts.
//!
//! The report is plain data (serializable to JSON) plus a `log` method that
//! prints the summary through tracing. It is always produced on graceful
//! completion or cooperative cancellation; only a fatal config/setup error
//! skips it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::{percentile, CheckStats, Snapshot};
use crate::pool::PoolStats;
use crate::threshold::{verdict, ThresholdOutcome};

/// min/avg/percentile summary of one value series (milliseconds for
/// request durations, raw units for trends).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SeriesStats {
    pub count: u64,
    pub min: f64,
    pub avg: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl SeriesStats {
    /// Build from an ascending-sorted series; all zeros when empty.
    pub fn from_sorted(sorted: &[f64]) -> Self {
        if sorted.is_empty() {
            return Self::default();
        }
        Self {
            count: sorted.len() as u64,
            min: sorted[0],
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            med: percentile(sorted, 50.0),
            p90: percentile(sorted, 90.0),
            p95: percentile(sorted, 95.0),
            p99: percentile(sorted, 99.0),
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Per-check pass rate in the report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckReport {
    pub passed: u64,
    pub total: u64,
    pub rate: f64,
}

impl From<CheckStats> for CheckReport {
    fn from(stats: CheckStats) -> Self {
        Self {
            passed: stats.passed,
            total: stats.total,
            rate: stats.rate(),
        }
    }
}

/// Everything the harness knows at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,

    pub iterations: u64,
    pub failed_iterations: u64,
    pub aborted_iterations: u64,
    pub vus_peak: usize,
    pub vus_spawned: u64,

    pub requests: u64,
    pub requests_failed: u64,
    pub requests_per_second: f64,

    /// `http_req_duration` summary across every request.
    pub duration_ms: SeriesStats,
    /// Same summary scoped per step label.
    pub steps: BTreeMap<String, SeriesStats>,
    pub checks: BTreeMap<String, CheckReport>,
    pub trends: BTreeMap<String, SeriesStats>,

    pub thresholds: Vec<ThresholdOutcome>,
    /// Overall verdict: AND of all threshold outcomes.
    pub passed: bool,
}

impl RunReport {
    pub fn build(
        run_id: Uuid,
        scenario: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        snapshot: &Snapshot,
        pool: PoolStats,
        thresholds: Vec<ThresholdOutcome>,
    ) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64();
        let requests = snapshot.request_count();

        let steps = snapshot
            .labels()
            .into_iter()
            .map(|label| {
                let stats = SeriesStats::from_sorted(&snapshot.durations_ms(Some(&label)));
                (label, stats)
            })
            .collect();

        let trends = snapshot
            .trend_names()
            .map(|name| {
                let values = snapshot.trend_values(name).unwrap_or_default();
                (name.to_string(), SeriesStats::from_sorted(&values))
            })
            .collect();

        let checks = snapshot
            .checks()
            .iter()
            .map(|(name, stats)| (name.clone(), CheckReport::from(*stats)))
            .collect();

        Self {
            run_id,
            scenario: scenario.to_string(),
            started_at,
            elapsed_seconds,
            iterations: snapshot.iterations,
            failed_iterations: snapshot.failed_iterations,
            aborted_iterations: snapshot.aborted_iterations,
            vus_peak: pool.peak,
            vus_spawned: pool.spawned,
            requests,
            requests_failed: snapshot.failed_count(),
            requests_per_second: if elapsed_seconds > 0.0 {
                requests as f64 / elapsed_seconds
            } else {
                0.0
            },
            duration_ms: SeriesStats::from_sorted(&snapshot.durations_ms(None)),
            steps,
            checks,
            trends,
            passed: verdict(&thresholds),
            thresholds,
        }
    }

    /// Process exit code the verdict maps to.
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }

    /// Log the summary through tracing.
    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            scenario = %self.scenario,
            elapsed_s = format!("{:.1}", self.elapsed_seconds),
            iterations = self.iterations,
            failed_iterations = self.failed_iterations,
            aborted_iterations = self.aborted_iterations,
            vus_peak = self.vus_peak,
            "run finished"
        );
        info!(
            requests = self.requests,
            failed = self.requests_failed,
            rps = format!("{:.1}", self.requests_per_second),
            avg_ms = format!("{:.1}", self.duration_ms.avg),
            p95_ms = format!("{:.1}", self.duration_ms.p95),
            max_ms = format!("{:.1}", self.duration_ms.max),
            "http_req_duration"
        );
        for (name, check) in &self.checks {
            info!(
                check = %name,
                passed = check.passed,
                total = check.total,
                rate = format!("{:.4}", check.rate),
                "check"
            );
        }
        for (name, stats) in &self.trends {
            info!(
                trend = %name,
                count = stats.count,
                avg = format!("{:.1}", stats.avg),
                p95 = format!("{:.1}", stats.p95),
                "trend"
            );
        }
        for outcome in &self.thresholds {
            if outcome.passed {
                info!(threshold = %outcome.expression, observed = ?outcome.observed, "threshold passed");
            } else {
                warn!(
                    threshold = %outcome.expression,
                    observed = ?outcome.observed,
                    error = ?outcome.error,
                    "threshold FAILED"
                );
            }
        }
        if self.passed {
            info!("verdict: PASS");
        } else {
            warn!("verdict: FAIL");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_stats_from_sorted() {
        let stats = SeriesStats::from_sorted(&[100.0, 200.0, 300.0, 400.0, 500.0]);
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 500.0);
        assert_eq!(stats.avg, 300.0);
        assert_eq!(stats.med, 300.0);
        assert_eq!(stats.p95, 480.0);
    }

    #[test]
    fn test_series_stats_empty_is_all_zero() {
        let stats = SeriesStats::from_sorted(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.p95, 0.0);
    }
}
