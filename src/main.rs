use rampart::config::Config;
use rampart::error::HarnessError;
use rampart::report::RunReport;
use rampart::runner::Runner;
use rampart::telemetry::{self, init_tracing};
use rampart::scenarios;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let code = match run().await {
        Ok(report) => report.exit_code(),
        Err(e) => {
            error!(error = %e, "fatal: run aborted");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<RunReport, HarnessError> {
    let cfg = Config::load().map_err(|e| HarnessError::Config(e.to_string()))?;
    let scenario = scenarios::by_name(&cfg)?;
    let plan = cfg.plan()?;

    // Ctrl+C ends the run cooperatively: VUs finish their current
    // iteration and the report is still produced.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        telemetry::shutdown_signal().await;
        signal_cancel.cancel();
    });

    Runner::new(plan, scenario).run(cancel).await
}
