//! Register an OHLCV CSV file into the dataset catalog.
//!
//! Usage: `register-dataset <name> <symbol> <csv-path> [source-tag]`
//!
//! Exit codes: 0 on success, 1 on config/runtime failure, 2 on bad
//! arguments.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use verdict::clock::SystemClock;
use verdict::config::Config;
use verdict::data::catalog::{DatasetCatalog, RegisterDataset};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a.starts_with('-')) || !(3..=4).contains(&args.len()) {
        eprintln!("usage: register-dataset <name> <symbol> <csv-path> [source-tag]");
        return ExitCode::from(2);
    }

    let request = RegisterDataset {
        name: args[0].clone(),
        symbol: args[1].to_uppercase(),
        source: args.get(3).cloned().unwrap_or_else(|| "manual".to_string()),
        path: PathBuf::from(&args[2]),
    };

    match register(request) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn register(request: RegisterDataset) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let catalog = DatasetCatalog::open(config.dataset_root, Arc::new(SystemClock))?;
    let entry = catalog.register(request)?;
    println!(
        "{}",
        serde_json::json!({
            "id": entry.id,
            "name": entry.name,
            "symbol": entry.symbol,
            "rows": entry.record_count,
            "sha256": entry.sha256,
            "start_date": entry.start_date,
            "end_date": entry.end_date,
        })
    );
    Ok(())
}
