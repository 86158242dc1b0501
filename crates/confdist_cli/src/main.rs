//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `confdist_core` linkage.
//! - Open a configuration service from an optional JSON config file.

use confdist_core::{CoreConfig, CoreError, RecordFilter};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("confdist_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|err| format!("cannot read `{path}`: {err}"))?;
            CoreConfig::from_json_str(&raw).map_err(|err| err.to_string())?
        }
        None => CoreConfig::default(),
    };

    if let Some(log_dir) = &config.log_dir {
        confdist_core::init_logging(&config.log_level, log_dir).map_err(|err| err.to_string())?;
    }

    let service =
        confdist_core::ConfigService::from_config(&config).map_err(|err: CoreError| err.to_string())?;
    let records = service.list_records(&RecordFilter::all());
    info!(
        "event=cli_smoke module=cli status=ok records={}",
        records.len()
    );

    println!("confdist_core ping={}", confdist_core::ping());
    println!("confdist_core version={}", confdist_core::core_version());
    println!("confdist_core records={}", records.len());
    Ok(())
}
