//! Threshold evaluation over a metrics snapshot.
//!
//! Thresholds only ever influence the final verdict. Evaluation happens on
//! a [`Snapshot`], so it can run at intervals during the run or once at the
//! end without disturbing the collector. An unknown metric name yields a
//! failed outcome carrying a configuration-error message instead of
//! aborting anything.

use serde::Serialize;

use crate::metrics::{percentile, Snapshot};
use crate::plan::{Aggregate, ThresholdSpec};

/// Result of evaluating one threshold.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdOutcome {
    /// Human-readable form, e.g. `http_req_duration: p(95)<500`.
    pub expression: String,
    pub passed: bool,
    /// Aggregate value the predicate was compared against, when the metric
    /// resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    /// Configuration problem (unknown metric, aggregate mismatch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluate every threshold; the overall verdict is the AND of all results.
pub fn evaluate_all(specs: &[ThresholdSpec], snapshot: &Snapshot) -> Vec<ThresholdOutcome> {
    specs.iter().map(|spec| evaluate(spec, snapshot)).collect()
}

pub fn evaluate(spec: &ThresholdSpec, snapshot: &Snapshot) -> ThresholdOutcome {
    match resolve(spec, snapshot) {
        Ok(observed) => ThresholdOutcome {
            expression: spec.to_string(),
            passed: spec.predicate.comparison.holds(observed, spec.predicate.value),
            observed: Some(observed),
            error: None,
        },
        Err(message) => ThresholdOutcome {
            expression: spec.to_string(),
            passed: false,
            observed: None,
            error: Some(message),
        },
    }
}

/// True when every outcome passed. Vacuously true with no thresholds.
pub fn verdict(outcomes: &[ThresholdOutcome]) -> bool {
    outcomes.iter().all(|o| o.passed)
}

fn resolve(spec: &ThresholdSpec, snapshot: &Snapshot) -> Result<f64, String> {
    let agg = spec.predicate.aggregate;
    match spec.metric.as_str() {
        "http_req_duration" => {
            aggregate_series(&snapshot.durations_ms(None), agg).ok_or_else(|| rate_mismatch(spec))
        }
        "http_req_failed" => match agg {
            Aggregate::Rate => Ok(snapshot.failed_rate()),
            Aggregate::Count => Ok(snapshot.failed_count() as f64),
            _ => Err(format!(
                "threshold '{spec}': '{agg}' is not defined for the rate metric 'http_req_failed'"
            )),
        },
        "checks" => match agg {
            Aggregate::Rate => Ok(snapshot.checks_rate()),
            _ => Err(format!(
                "threshold '{spec}': '{agg}' is not defined for the rate metric 'checks'"
            )),
        },
        name => match snapshot.trend_values(name) {
            Some(values) => aggregate_series(&values, agg).ok_or_else(|| rate_mismatch(spec)),
            None => Err(format!("threshold '{spec}': unknown metric '{name}'")),
        },
    }
}

fn rate_mismatch(spec: &ThresholdSpec) -> String {
    format!(
        "threshold '{spec}': 'rate' is not defined for the value metric '{}'",
        spec.metric
    )
}

/// Apply a value aggregate to an ascending-sorted series. `None` for the
/// rate aggregate, which only applies to rate metrics.
fn aggregate_series(sorted: &[f64], agg: Aggregate) -> Option<f64> {
    let value = match agg {
        Aggregate::Rate => return None,
        Aggregate::Count => sorted.len() as f64,
        Aggregate::Percentile(p) => percentile(sorted, p),
        Aggregate::Med => percentile(sorted, 50.0),
        Aggregate::Avg => {
            if sorted.is_empty() {
                0.0
            } else {
                sorted.iter().sum::<f64>() / sorted.len() as f64
            }
        }
        Aggregate::Min => sorted.first().copied().unwrap_or(0.0),
        Aggregate::Max => sorted.last().copied().unwrap_or(0.0),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Collector, RequestSample};
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot_with_durations(ms: &[u64]) -> Snapshot {
        let collector = Collector::new();
        for &m in ms {
            collector.record_sample(RequestSample {
                timestamp: Utc::now(),
                duration: Duration::from_millis(m),
                status: 200,
                scenario: "test".into(),
                label: "step".into(),
                error: None,
            });
        }
        collector.snapshot()
    }

    fn spec(metric: &str, expr: &str) -> ThresholdSpec {
        ThresholdSpec::parse(metric, expr).unwrap()
    }

    #[test]
    fn test_duration_percentile_threshold() {
        let snap = snapshot_with_durations(&[100, 200, 300, 400, 500]);

        let pass = evaluate(&spec("http_req_duration", "p(95)<500"), &snap);
        assert!(pass.passed);
        assert_eq!(pass.observed, Some(480.0));

        let fail = evaluate(&spec("http_req_duration", "p(95)<100"), &snap);
        assert!(!fail.passed);
    }

    #[test]
    fn test_checks_rate_threshold() {
        let collector = Collector::new();
        for i in 0..100 {
            collector.record_check("status is 200", i != 0);
        }
        let snap = collector.snapshot();

        assert!(!evaluate(&spec("checks", "rate>0.99"), &snap).passed);
        assert!(evaluate(&spec("checks", "rate>0.95"), &snap).passed);
    }

    #[test]
    fn test_unknown_metric_is_config_error_not_panic() {
        let snap = snapshot_with_durations(&[100]);
        let outcome = evaluate(&spec("no_such_metric", "p(95)<500"), &snap);
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().contains("unknown metric"));
    }

    #[test]
    fn test_aggregate_mismatch_is_config_error() {
        let snap = snapshot_with_durations(&[100]);
        let outcome = evaluate(&spec("http_req_duration", "rate<0.5"), &snap);
        assert!(!outcome.passed);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_trend_threshold_resolves_custom_metric() {
        let collector = Collector::new();
        for v in [10.0, 20.0, 30.0] {
            collector.add_trend("response_time_trend", v);
        }
        let snap = collector.snapshot();
        let outcome = evaluate(&spec("response_time_trend", "avg<25"), &snap);
        assert!(outcome.passed);
        assert_eq!(outcome.observed, Some(20.0));
    }

    #[test]
    fn test_verdict_is_and_of_outcomes() {
        let snap = snapshot_with_durations(&[100, 200, 300, 400, 500]);
        let outcomes = evaluate_all(
            &[
                spec("http_req_duration", "p(95)<500"),
                spec("http_req_duration", "max<200"),
            ],
            &snap,
        );
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert!(!verdict(&outcomes));
    }
}
