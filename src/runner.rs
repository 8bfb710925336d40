//! Run orchestration: validate the plan, run the setup phase, drive the VU
//! pool to the deadline, evaluate thresholds, build the report.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::HarnessError;
use crate::metrics::Collector;
use crate::plan::RunPlan;
use crate::pool::VuPool;
use crate::report::RunReport;
use crate::scenario::{Context, Scenario};
use crate::schedule::RampSchedule;
use crate::threshold;

/// Executes one [`RunPlan`] against one [`Scenario`].
pub struct Runner {
    plan: RunPlan,
    scenario: Arc<dyn Scenario>,
    collector: Arc<Collector>,
}

impl Runner {
    pub fn new(plan: RunPlan, scenario: Arc<dyn Scenario>) -> Self {
        Self {
            plan,
            scenario,
            collector: Arc::new(Collector::new()),
        }
    }

    /// The collector backing this run, inspectable after (or during) it.
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Run to completion (or cooperative cancellation via `cancel`).
    ///
    /// Config and setup failures are the only error returns; everything
    /// else, including failed thresholds, comes back inside the report.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, HarnessError> {
        self.plan.validate()?;
        let schedule = RampSchedule::new(&self.plan.stages)?;

        let client = Client::builder()
            .timeout(self.plan.request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("http client: {e}")))?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            %run_id,
            scenario = self.scenario.name(),
            stages = self.plan.stages.len(),
            total = ?self.plan.total_duration(),
            base_url = %self.plan.base_url,
            "starting run"
        );

        // One-time setup phase, before any VU exists. VU id 0 is reserved
        // for it; a failure here is fatal.
        let setup_ctx = Context::new(
            0,
            self.scenario.name(),
            client.clone(),
            self.plan.base_url.clone(),
            Arc::clone(&self.collector),
            Arc::default(),
        );
        let setup = Arc::new(self.scenario.setup(&setup_ctx).await?);

        let pool = VuPool::new(
            Arc::clone(&self.scenario),
            client,
            self.plan.base_url.clone(),
            Arc::clone(&self.collector),
            setup,
        );
        let pool_stats = pool.run(schedule, cancel, self.plan.grace_period).await;

        let snapshot = self.collector.snapshot();
        let outcomes = threshold::evaluate_all(&self.plan.thresholds, &snapshot);
        let report = RunReport::build(
            run_id,
            self.scenario.name(),
            started_at,
            start.elapsed(),
            &snapshot,
            pool_stats,
            outcomes,
        );
        report.log();
        Ok(report)
    }
}
