use agropay::domain::money::CommissionRate;
use agropay::interfaces::csv::balance_writer::BalanceWriter;
use agropay::interfaces::csv::scenario_reader::ScenarioReader;
use agropay::interfaces::replay::ScenarioRunner;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input scenario CSV file
    input: PathBuf,

    /// Platform commission rate, as a decimal fraction in [0, 1)
    #[arg(long, default_value = "0.1")]
    commission: Decimal,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let commission = CommissionRate::new(cli.commission).into_diagnostic()?;
    let mut runner = ScenarioRunner::new(commission);

    let file = File::open(cli.input).into_diagnostic()?;
    for step in ScenarioReader::new(file).steps() {
        match step {
            Ok(step) => {
                if let Err(e) = runner.apply(step).await {
                    eprintln!("Error applying step: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading step: {}", e);
            }
        }
    }

    let accounts = runner.accounts().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
