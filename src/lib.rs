//! Rampart - a self-contained HTTP load-generation harness.
//!
//! A run ramps a population of virtual users (VUs) through time-boxed
//! target levels, each VU repeatedly executing a scripted multi-step HTTP
//! workflow. Latency and outcome metrics are aggregated across all VUs and
//! scored against declared thresholds at the end of the run.
//!
//! The moving parts, leaves first:
//! - [`schedule`]: piecewise-linear VU target as a function of elapsed time
//! - [`pool`]: spawns/retires VU tasks to track the scheduled target
//! - [`scenario`]: the author-facing `Scenario` trait and per-invocation
//!   `Context` (HTTP steps, checks, think time, trends)
//! - [`metrics`]: thread-safe collector with percentile/rate queries
//! - [`threshold`]: pass/fail predicates over the final snapshot
//! - [`runner`]: orchestrates setup phase, pool, evaluation and report

pub mod config;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod pool;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod scenarios;
pub mod schedule;
pub mod telemetry;
pub mod threshold;

pub use error::HarnessError;
pub use plan::{RunPlan, Stage, ThresholdSpec};
pub use report::RunReport;
pub use runner::Runner;
pub use scenario::{Context, Scenario, SetupResult};
