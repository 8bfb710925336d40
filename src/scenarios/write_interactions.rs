use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::HarnessError;
use crate::scenario::{Context, Scenario, SetupResult};

/// Authenticated write load: react to, rate and review a random story.
///
/// The target API legitimately rejects some of these writes (duplicate
/// reaction → 409, repeated rating/review → 400), so the checks accept
/// those statuses as expected outcomes rather than failures.
#[derive(Debug)]
pub struct WriteInteractions {
    login_url: String,
    username: String,
    password: String,
    story_ids: RangeInclusive<u64>,
    think_time: Duration,
}

impl WriteInteractions {
    /// Credentials and the login endpoint are mandatory for this scenario;
    /// missing ones are a config error caught before the run starts.
    pub fn from_config(config: &Config) -> Result<Self, HarnessError> {
        let login_url = config
            .target
            .login_url
            .clone()
            .ok_or_else(|| HarnessError::Config("target.login_url is not set".into()))?;
        let username = config
            .auth
            .username
            .clone()
            .ok_or_else(|| HarnessError::Config("auth.username is not set".into()))?;
        let password = config
            .auth
            .password
            .clone()
            .ok_or_else(|| HarnessError::Config("auth.password is not set".into()))?;

        Ok(Self {
            login_url,
            username,
            password,
            story_ids: config.data.story_id_min..=config.data.story_id_max,
            think_time: Duration::from_secs(2),
        })
    }

    fn pick_story_id(&self) -> u64 {
        rand::thread_rng().gen_range(self.story_ids.clone())
    }
}

#[async_trait]
impl Scenario for WriteInteractions {
    fn name(&self) -> &'static str {
        "write_interactions"
    }

    /// Log in once and share the access token with every VU.
    async fn setup(&self, ctx: &Context) -> Result<SetupResult, HarnessError> {
        let res = ctx
            .post("login", &self.login_url)
            .json(json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await;

        let token = res
            .json_field("access")
            .and_then(Value::as_str)
            .map(str::to_string);

        let status_ok = ctx.check("login status is 200", res.status == 200);
        let token_ok = ctx.check("access token present", token.is_some());
        if !status_ok || !token_ok {
            return Err(HarnessError::Setup(format!(
                "login to {} failed (status {})",
                self.login_url, res.status
            )));
        }

        Ok(SetupResult {
            bearer_token: token,
            data: Value::Null,
        })
    }

    async fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let token = ctx
            .setup_result()
            .bearer_token
            .as_deref()
            .context("no bearer token in setup result")?;
        let story_id = self.pick_story_id();

        let reaction = ctx
            .post("reaction", &format!("/stories/{story_id}/reaction/"))
            .bearer(token)
            .json(json!({ "reaction": "like" }))
            .send()
            .await;
        ctx.check(
            "reaction accepted or conflict",
            reaction.status == 201 || reaction.status == 409,
        );

        // Already reacted: flip the reaction instead.
        if reaction.status == 409 {
            let patch = ctx
                .patch("reaction_patch", &format!("/stories/{story_id}/reaction/"))
                .bearer(token)
                .json(json!({ "reaction": "dislike" }))
                .send()
                .await;
            ctx.check("reaction patch ok", patch.status == 200);
        }

        let rating = ctx
            .post("rating", &format!("/stories/{story_id}/rating/"))
            .bearer(token)
            .json(json!({ "rating": 4 }))
            .send()
            .await;
        ctx.check(
            "rating accepted or bad request",
            rating.status == 201 || rating.status == 400,
        );

        let review = ctx
            .post("review", &format!("/stories/{story_id}/reviews/"))
            .bearer(token)
            .json(json!({ "content": "Great story!" }))
            .send()
            .await;
        ctx.check(
            "review accepted or bad request",
            review.status == 201 || review.status == 400,
        );

        ctx.think(self.think_time).await;
        Ok(())
    }
}
