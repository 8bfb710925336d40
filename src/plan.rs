//! Run plan data model: ramp stages, threshold expressions, run options.
//!
//! A [`RunPlan`] is assembled once (from config or by hand in tests),
//! validated before any virtual user starts, and is immutable for the rest
//! of the run.

use std::fmt;
use std::time::Duration;

use crate::error::HarnessError;

/// One ramp segment: hold or move the VU target over a time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    /// Length of the segment. Must be positive.
    pub duration: Duration,
    /// VU target reached at the end of the segment.
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Aggregate selector on the left-hand side of a threshold expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// `p(95)` style percentile, value in 0..=100.
    Percentile(f64),
    /// Pass/fail ratio of a rate metric (`checks`, `http_req_failed`).
    Rate,
    Avg,
    Min,
    Max,
    /// Median, shorthand for `p(50)`.
    Med,
    Count,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Percentile(p) => write!(f, "p({p})"),
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Count => write!(f, "count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// Parsed threshold predicate, e.g. `p(95)<500` or `rate>0.99`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub value: f64,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregate,
            self.comparison.as_str(),
            self.value
        )
    }
}

/// A pass/fail predicate over one named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    /// Metric family (`http_req_duration`, `http_req_failed`, `checks`) or a
    /// custom trend name.
    pub metric: String,
    pub predicate: Predicate,
}

impl ThresholdSpec {
    /// Parse a k6-style threshold expression such as
    /// `http_req_duration: p(95)<500` (metric and expression passed
    /// separately).
    pub fn parse(metric: &str, expression: &str) -> Result<Self, HarnessError> {
        let predicate = parse_predicate(expression).ok_or_else(|| {
            HarnessError::Config(format!(
                "threshold '{metric}': cannot parse expression '{expression}'"
            ))
        })?;

        if let Aggregate::Percentile(p) = predicate.aggregate {
            if !(0.0..=100.0).contains(&p) {
                return Err(HarnessError::Config(format!(
                    "threshold '{metric}': percentile {p} out of range 0..=100"
                )));
            }
        }

        Ok(Self {
            metric: metric.to_string(),
            predicate,
        })
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.predicate)
    }
}

fn parse_predicate(expression: &str) -> Option<Predicate> {
    let expr: String = expression.chars().filter(|c| !c.is_whitespace()).collect();

    // Two-character operators first so `<=` is not read as `<`.
    let (op_idx, op_len, comparison) = ["<=", ">=", "<", ">"]
        .iter()
        .find_map(|op| expr.find(op).map(|i| (i, op.len(), *op)))
        .map(|(i, len, op)| {
            let cmp = match op {
                "<=" => Comparison::Le,
                ">=" => Comparison::Ge,
                "<" => Comparison::Lt,
                _ => Comparison::Gt,
            };
            (i, len, cmp)
        })?;

    let aggregate = parse_aggregate(&expr[..op_idx])?;
    let value: f64 = expr[op_idx + op_len..].parse().ok()?;

    Some(Predicate {
        aggregate,
        comparison,
        value,
    })
}

fn parse_aggregate(token: &str) -> Option<Aggregate> {
    match token {
        "rate" => Some(Aggregate::Rate),
        "avg" => Some(Aggregate::Avg),
        "min" => Some(Aggregate::Min),
        "max" => Some(Aggregate::Max),
        "med" => Some(Aggregate::Med),
        "count" => Some(Aggregate::Count),
        _ => {
            let inner = token.strip_prefix("p(")?.strip_suffix(')')?;
            inner.parse().ok().map(Aggregate::Percentile)
        }
    }
}

/// Immutable description of one load-test run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Ordered ramp stages. At least one.
    pub stages: Vec<Stage>,
    /// Thresholds evaluated against the final metrics snapshot.
    pub thresholds: Vec<ThresholdSpec>,
    /// Base URL all relative request paths resolve against.
    pub base_url: String,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
    /// How long to wait for in-flight iterations after the deadline before
    /// abandoning them.
    pub grace_period: Duration,
}

impl RunPlan {
    pub fn new(stages: Vec<Stage>, base_url: impl Into<String>) -> Self {
        Self {
            stages,
            thresholds: Vec::new(),
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(10),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<ThresholdSpec>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sum of all stage durations; the run deadline.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Reject malformed plans before any VU starts.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.stages.is_empty() {
            return Err(HarnessError::Config("plan has zero stages".into()));
        }
        if let Some(i) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(HarnessError::Config(format!(
                "stage {i} has zero duration"
            )));
        }
        if self.base_url.is_empty() {
            return Err(HarnessError::Config("base_url is empty".into()));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| HarnessError::Config(format!("base_url '{}': {e}", self.base_url)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentile_threshold() {
        let spec = ThresholdSpec::parse("http_req_duration", "p(95)<500").unwrap();
        assert_eq!(spec.metric, "http_req_duration");
        assert_eq!(spec.predicate.aggregate, Aggregate::Percentile(95.0));
        assert_eq!(spec.predicate.comparison, Comparison::Lt);
        assert_eq!(spec.predicate.value, 500.0);
    }

    #[test]
    fn test_parse_rate_threshold_with_spaces() {
        let spec = ThresholdSpec::parse("checks", "rate > 0.99").unwrap();
        assert_eq!(spec.predicate.aggregate, Aggregate::Rate);
        assert_eq!(spec.predicate.comparison, Comparison::Gt);
        assert_eq!(spec.predicate.value, 0.99);
    }

    #[test]
    fn test_parse_two_char_operator() {
        let spec = ThresholdSpec::parse("http_req_failed", "rate<=0.05").unwrap();
        assert_eq!(spec.predicate.comparison, Comparison::Le);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ThresholdSpec::parse("checks", "rate is high").is_err());
        assert!(ThresholdSpec::parse("checks", "p(95)").is_err());
        assert!(ThresholdSpec::parse("checks", "p(200)<1").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_stages() {
        let plan = RunPlan::new(Vec::new(), "http://localhost:8000");
        assert!(matches!(plan.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_duration_stage() {
        let plan = RunPlan::new(
            vec![Stage::new(Duration::ZERO, 10)],
            "http://localhost:8000",
        );
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_total_duration_sums_stages() {
        let plan = RunPlan::new(
            vec![
                Stage::new(Duration::from_secs(30), 50),
                Stage::new(Duration::from_secs(60), 100),
            ],
            "http://localhost:8000",
        );
        assert_eq!(plan.total_duration(), Duration::from_secs(90));
    }
}
