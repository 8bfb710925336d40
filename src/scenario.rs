//! Scenario execution: the author-facing trait and the per-invocation
//! [`Context`].
//!
//! A scenario is an ordered sequence of HTTP steps, checks and think-time
//! pauses. All side effects flow through the `Context`, which forwards
//! request samples, check results and trend values to the shared
//! [`Collector`]. That keeps scenarios free of globals and lets tests run
//! one in isolation against a stub server with its own collector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::error::HarnessError;
use crate::metrics::{Collector, RequestSample};

/// Read-only output of the one-time setup phase, shared by every VU.
#[derive(Debug, Default)]
pub struct SetupResult {
    /// Bearer token applied by scenarios that authenticate, typically
    /// extracted from a login response.
    pub bearer_token: Option<String>,
    /// Any further setup data a scenario wants to carry into its iterations.
    pub data: Value,
}

/// An author-defined workflow executed repeatedly by every virtual user.
///
/// `setup` runs exactly once, before any VU starts; returning an error
/// aborts the whole run. `run` is one iteration; an error ends that
/// iteration only and is recorded as a failed iteration, never escalated.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup phase, e.g. a login producing a shared token.
    async fn setup(&self, _ctx: &Context) -> Result<SetupResult, HarnessError> {
        Ok(SetupResult::default())
    }

    /// One scenario iteration for one virtual user.
    async fn run(&self, ctx: &Context) -> anyhow::Result<()>;
}

/// Session handle passed into every scenario invocation.
pub struct Context {
    vu_id: u64,
    scenario: String,
    client: Client,
    base_url: String,
    collector: Arc<Collector>,
    setup: Arc<SetupResult>,
}

impl Context {
    pub fn new(
        vu_id: u64,
        scenario: impl Into<String>,
        client: Client,
        base_url: impl Into<String>,
        collector: Arc<Collector>,
        setup: Arc<SetupResult>,
    ) -> Self {
        Self {
            vu_id,
            scenario: scenario.into(),
            client,
            base_url: base_url.into(),
            collector,
            setup,
        }
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    pub fn setup_result(&self) -> &SetupResult {
        &self.setup
    }

    /// Record a named boolean assertion. Never aborts the iteration; the
    /// result is returned so callers can branch on it, mirroring how the
    /// login flow escalates explicitly.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.collector.record_check(name, passed);
        passed
    }

    /// Add a value to a named custom trend.
    pub fn trend(&self, name: &str, value: f64) {
        self.collector.add_trend(name, value);
    }

    /// Think-time pause; suspends only this VU.
    pub async fn think(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn get(&self, label: &str, path: &str) -> StepRequest<'_> {
        self.request(Method::GET, label, path)
    }

    pub fn post(&self, label: &str, path: &str) -> StepRequest<'_> {
        self.request(Method::POST, label, path)
    }

    pub fn patch(&self, label: &str, path: &str) -> StepRequest<'_> {
        self.request(Method::PATCH, label, path)
    }

    fn request(&self, method: Method, label: &str, path: &str) -> StepRequest<'_> {
        StepRequest {
            ctx: self,
            method,
            label: label.to_string(),
            url: self.resolve_url(path),
            body: None,
            bearer: None,
            headers: Vec::new(),
        }
    }

    /// Relative paths resolve against the base URL; absolute URLs (the
    /// login endpoint may live on another host) pass through untouched.
    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }
}

/// Builder for one HTTP step.
pub struct StepRequest<'a> {
    ctx: &'a Context,
    method: Method,
    label: String,
    url: String,
    body: Option<Value>,
    bearer: Option<String>,
    headers: Vec<(String, String)>,
}

impl StepRequest<'_> {
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Issue the request and submit exactly one [`RequestSample`].
    ///
    /// Never returns an error: transport failures come back as a response
    /// with status 0, so a scenario keeps running and only its checks decide
    /// what a failure means.
    pub async fn send(self) -> StepResponse {
        let timestamp = Utc::now();
        let start = Instant::now();

        let mut builder = self.ctx.client.request(self.method.clone(), &self.url);
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let (status, body, error) = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Duration includes receiving the body, so decode failures
                // still produce a meaningful latency sample.
                let bytes = response.bytes().await.unwrap_or_default();
                (status, serde_json::from_slice(&bytes).ok(), None)
            }
            Err(e) => {
                debug!(vu = self.ctx.vu_id, label = %self.label, error = %e, "request failed");
                (0, None, Some(e.to_string()))
            }
        };
        let duration = start.elapsed();

        self.ctx.collector.record_sample(RequestSample {
            timestamp,
            duration,
            status,
            scenario: self.ctx.scenario.clone(),
            label: self.label,
            error,
        });

        StepResponse {
            status,
            duration,
            body,
        }
    }
}

/// Outcome of one HTTP step, available to build later steps' inputs.
#[derive(Debug, Clone)]
pub struct StepResponse {
    /// HTTP status, 0 on transport failure.
    pub status: u16,
    pub duration: Duration,
    body: Option<Value>,
}

impl StepResponse {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// Decoded JSON body, if the response carried one.
    pub fn json(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Top-level JSON field lookup, e.g. the `access` token of a login
    /// response.
    pub fn json_field(&self, name: &str) -> Option<&Value> {
        self.body.as_ref().and_then(|v| v.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(base_url: &str) -> Context {
        Context::new(
            1,
            "test",
            Client::new(),
            base_url,
            Arc::new(Collector::new()),
            Arc::new(SetupResult::default()),
        )
    }

    #[test]
    fn test_resolve_url_joins_relative_paths() {
        let ctx = context("http://localhost:8000/api/");
        assert_eq!(
            ctx.resolve_url("/stories/"),
            "http://localhost:8000/api/stories/"
        );
        assert_eq!(
            ctx.resolve_url("stories/1/rating/"),
            "http://localhost:8000/api/stories/1/rating/"
        );
    }

    #[test]
    fn test_resolve_url_passes_absolute_urls_through() {
        let ctx = context("http://localhost:8000/api");
        assert_eq!(
            ctx.resolve_url("http://127.0.0.1:8000/accounts/login/"),
            "http://127.0.0.1:8000/accounts/login/"
        );
    }

    #[test]
    fn test_check_records_and_returns_outcome() {
        let collector = Arc::new(Collector::new());
        let ctx = Context::new(
            1,
            "test",
            Client::new(),
            "http://localhost",
            Arc::clone(&collector),
            Arc::new(SetupResult::default()),
        );

        assert!(ctx.check("passes", true));
        assert!(!ctx.check("fails", false));

        let snap = collector.snapshot();
        assert_eq!(snap.checks()["passes"].passed, 1);
        assert_eq!(snap.checks()["fails"].passed, 0);
        assert_eq!(snap.checks_rate(), 0.5);
    }
}
