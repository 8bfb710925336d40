use thiserror::Error;

/// Fatal harness errors.
///
/// Only two classes of failure ever stop a run: a malformed configuration
/// (caught before any virtual user starts) and a failed setup phase (e.g.
/// the one-time login). Per-request failures and failed thresholds are data,
/// recorded in the metrics and the final verdict, never surfaced here.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid run configuration: zero stages, a bad threshold expression,
    /// an unknown metric name, missing credentials.
    #[error("invalid run configuration: {0}")]
    Config(String),

    /// The one-time setup phase failed. Aborts the run before (or instead of)
    /// spawning any virtual users.
    #[error("setup phase failed: {0}")]
    Setup(String),
}

impl HarnessError {
    /// Process exit code for this error class.
    pub fn exit_code(&self) -> i32 {
        2
    }
}
