use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::scenario::{Context, Scenario};

/// Anonymous browsing load: list the stories feed, verify it responds fast,
/// and pause like a reader scanning the page.
pub struct ReadStories {
    think_time_ms: std::ops::RangeInclusive<u64>,
}

impl ReadStories {
    pub fn new() -> Self {
        Self {
            think_time_ms: 500..=1000,
        }
    }
}

impl Default for ReadStories {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scenario for ReadStories {
    fn name(&self) -> &'static str {
        "read_stories"
    }

    async fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let res = ctx.get("stories_list", "/stories/").send().await;

        ctx.check("status is 200", res.status == 200);
        ctx.check(
            "response time < 500ms",
            res.duration < Duration::from_millis(500),
        );
        ctx.trend("response_time_trend", res.duration_ms());

        let pause = rand::thread_rng().gen_range(self.think_time_ms.clone());
        ctx.think(Duration::from_millis(pause)).await;
        Ok(())
    }
}
