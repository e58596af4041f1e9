//! `account-recon` command line entry point

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use account_recon::fetch::source_from_config;
use account_recon::logging::init_logging;
use account_recon::{ReconError, ReconciliationEngine, ReconciliationReport, RunConfig};

const EXIT_MISMATCH: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_FETCH_ABORT: u8 = 3;

/// Compare the key column of two databases and list keys missing on either side
///
/// Connection details come from `{PREFIX}HOST`, `{PREFIX}PORT`,
/// `{PREFIX}DATABASE`, `{PREFIX}USER`, `{PREFIX}PASSWORD`, `{PREFIX}QUERY`
/// and `{PREFIX}KEY_COLUMN`.
#[derive(Debug, Parser)]
#[command(name = "account-recon", version)]
struct Cli {
    /// Environment prefix of the first source
    #[arg(long, default_value = account_recon::FIRST_PREFIX)]
    first_prefix: String,

    /// Environment prefix of the second source
    #[arg(long, default_value = account_recon::SECOND_PREFIX)]
    second_prefix: String,

    /// Per-fetch deadline in seconds, 0 to wait forever
    #[arg(long, env = "RECON_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Fetch the sources one after the other
    #[arg(long)]
    sequential: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Exit with status 1 when any key is unmatched
    #[arg(long)]
    fail_on_mismatch: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "RECON_LOG", default_value = "info")]
    log_level: String,
}

fn print_report(report: &ReconciliationReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for discrepancy in report.discrepancies() {
        println!("{}", discrepancy);
    }
    println!(
        "{} rows from {}, {} rows from {}: {} missing in {}, {} missing in {}",
        report.first.rows,
        report.first.label,
        report.second.rows,
        report.second.label,
        report.result.missing_in_second.len(),
        report.second.label,
        report.result.missing_in_first.len(),
        report.first.label,
    );
    Ok(())
}

async fn run(cli: &Cli) -> Result<ReconciliationReport, ReconError> {
    let mut config = RunConfig::from_env(&cli.first_prefix, &cli.second_prefix)?;
    if let Some(secs) = cli.deadline_secs {
        config.options.deadline = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if cli.sequential {
        config.options.concurrent = false;
    }
    let config = config.apply_deadline_to_queries();

    let first = source_from_config(config.first)?;
    let second = source_from_config(config.second)?;
    ReconciliationEngine::new(first, second)
        .with_options(config.options)
        .run()
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(&cli).await {
        Ok(report) => {
            if let Err(e) = print_report(&report, cli.json) {
                error!(error = %e, "Failed to render report");
                return ExitCode::FAILURE;
            }
            if cli.fail_on_mismatch && !report.is_reconciled() {
                ExitCode::from(EXIT_MISMATCH)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err @ ReconError::FetchAbort(_)) => {
            eprintln!("{}", err);
            ExitCode::from(EXIT_FETCH_ABORT)
        }
        Err(err) => {
            error!(error = %err, "Reconciliation not started");
            eprintln!("{}", err);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
