use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use zip_geocoder::{init_tracing, AppConfig, ColumnRoles, SessionRegistry};

/// Fill missing or invalid postal codes in an address CSV file
#[derive(Parser, Debug)]
#[command(name = "zip-geocoder")]
#[command(about = "Fill missing or invalid postal codes in an address CSV file", long_about = None)]
struct CliArgs {
    /// Input CSV file with a header row
    #[arg(value_name = "INPUT")]
    input_file: PathBuf,

    /// Where the rewritten CSV is written
    #[arg(value_name = "OUTPUT")]
    output_file: PathBuf,

    #[arg(long = "address-column", value_name = "NAME")]
    address_column: String,

    #[arg(long = "city-column", value_name = "NAME")]
    city_column: String,

    #[arg(long = "state-column", value_name = "NAME")]
    state_column: String,

    #[arg(long = "zip-column", value_name = "NAME")]
    zip_column: String,

    /// Seconds between progress reports
    #[arg(long = "report-every", value_name = "SECS", default_value_t = 5)]
    report_every: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CliArgs::parse();
    let config = AppConfig::from_env();

    let registry = SessionRegistry::new();
    let session = registry
        .create(&config)
        .context("failed to build geocoding session")?;
    let roles = ColumnRoles {
        address: args.address_column,
        city: args.city_column,
        state: args.state_column,
        zip: args.zip_column,
    };

    info!(session = session.id(), input = %args.input_file.display(), "starting session");
    let mut handle = session.spawn_file(args.input_file, args.output_file, roles);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.report_every.max(1)));

    let state = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("processing task panicked")?,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received; cancelling session");
                registry.cancel(session.id())?;
            }
            _ = ticker.tick() => {
                let snapshot = session.snapshot();
                info!(
                    progress = snapshot.progress_percent,
                    processed = snapshot.total_processed,
                    current = %snapshot.current_address,
                    "progress"
                );
            }
        }
    };

    let snapshot = session.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    registry.remove(session.id());
    info!(state = state.as_str(), "session finished");
    Ok(())
}
