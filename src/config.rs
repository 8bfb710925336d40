use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::error::HarnessError;
use crate::plan::{RunPlan, Stage, ThresholdSpec};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Base URL all relative request paths resolve against,
    /// e.g. `http://localhost:8000/api`.
    pub base_url: String,
    /// Login endpoint for scenarios with an auth setup phase. May live on a
    /// different host than the API under test.
    pub login_url: Option<String>,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Built-in scenario to run, e.g. `read_stories`.
    pub scenario: String,
    pub stages: Vec<StageConfig>,
    /// Threshold expressions per metric, k6 style:
    /// `http_req_duration = ["p(95)<3000"]`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub grace_period_seconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StageConfig {
    pub duration_seconds: u64,
    pub target: u32,
}

/// Credentials for the login setup phase. Set via environment
/// (`RAMPART__AUTH__USERNAME`, `RAMPART__AUTH__PASSWORD`), never committed
/// to the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Test-data knobs for the write-interactions scenario.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DataConfig {
    pub story_id_min: u64,
    pub story_id_max: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            story_id_min: 1,
            story_id_max: 100,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("RAMPART__").split("__"));
        Ok(figment.extract()?)
    }

    /// Build the immutable run plan this config describes.
    pub fn plan(&self) -> Result<RunPlan, HarnessError> {
        let stages = self
            .run
            .stages
            .iter()
            .map(|s| Stage::new(Duration::from_secs(s.duration_seconds), s.target))
            .collect();

        let mut thresholds = Vec::new();
        for (metric, expressions) in &self.run.thresholds {
            for expression in expressions {
                thresholds.push(ThresholdSpec::parse(metric, expression)?);
            }
        }

        let mut plan =
            RunPlan::new(stages, self.target.base_url.clone()).with_thresholds(thresholds);
        plan.request_timeout = Duration::from_secs(self.target.http_timeout_seconds);
        plan.grace_period = Duration::from_secs(self.run.grace_period_seconds);
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Aggregate;

    fn config_from_toml(toml: &str) -> Config {
        Figment::new().merge(Toml::string(toml)).extract().unwrap()
    }

    const BASE: &str = r#"
        [target]
        base_url = "http://localhost:8000/api"
        http_timeout_seconds = 30

        [run]
        scenario = "read_stories"
        grace_period_seconds = 10
        stages = [
            { duration_seconds = 30, target = 50 },
            { duration_seconds = 30, target = 0 },
        ]

        [run.thresholds]
        http_req_duration = ["p(95)<3000"]
        checks = ["rate>0.95"]
    "#;

    #[test]
    fn test_plan_from_config() {
        let plan = config_from_toml(BASE).plan().unwrap();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].target, 50);
        assert_eq!(plan.total_duration(), Duration::from_secs(60));
        assert_eq!(plan.thresholds.len(), 2);
        assert!(plan
            .thresholds
            .iter()
            .any(|t| t.metric == "checks" && t.predicate.aggregate == Aggregate::Rate));
    }

    #[test]
    fn test_bad_threshold_expression_is_config_error() {
        let toml = BASE.replace("p(95)<3000", "p95 below 3000");
        let err = config_from_toml(&toml).plan().unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }
}
