//! Reconciliation over in-memory sources

use std::sync::Arc;

use account_recon::logging::{init_logging, TracingEvents};
use account_recon::utils::MemorySource;
use account_recon::{ReconciliationEngine, RunOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");
    println!("🔎 Account Recon - In-Memory Example\n");

    // Stand-ins for `SELECT account_no FROM accounts LIMIT 10` on each side
    let postgres = MemorySource::new("postgres", ["ACC-1001", "ACC-1002", "ACC-1002", "ACC-1004"]);
    let db2 = MemorySource::new("db2", ["ACC-1004", "ACC-1002", "ACC-1003"]);

    let engine = ReconciliationEngine::new(postgres, db2)
        .with_events(Arc::new(TracingEvents))
        .with_options(RunOptions::default());

    let report = engine.run().await?;

    println!(
        "📊 {} rows from {}, {} rows from {}\n",
        report.first.rows, report.first.label, report.second.rows, report.second.label
    );
    for discrepancy in report.discrepancies() {
        println!("  ✗ {}", discrepancy);
    }

    println!("\n🧮 Per-key counts:");
    for (key, tally) in report.tally() {
        println!(
            "  {}: {} missing in {}, {} missing in {}",
            key,
            tally.missing_in_second,
            report.second.label,
            tally.missing_in_first,
            report.first.label
        );
    }

    println!("\n{}", serde_json::to_string_pretty(&report.result)?);
    Ok(())
}
