//! Built-in scenarios, ported from the original performance test scripts.

mod read_stories;
mod write_interactions;

use std::sync::Arc;

pub use read_stories::ReadStories;
pub use write_interactions::WriteInteractions;

use crate::config::Config;
use crate::error::HarnessError;
use crate::scenario::Scenario;

/// Look up a built-in scenario by the name in `run.scenario`.
pub fn by_name(config: &Config) -> Result<Arc<dyn Scenario>, HarnessError> {
    match config.run.scenario.as_str() {
        "read_stories" => Ok(Arc::new(ReadStories::new())),
        "write_interactions" => Ok(Arc::new(WriteInteractions::from_config(config)?)),
        other => Err(HarnessError::Config(format!(
            "unknown scenario '{other}' (expected read_stories or write_interactions)"
        ))),
    }
}
