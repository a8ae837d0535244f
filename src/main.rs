use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use env_logger::Env;

use corefit::archive::DataArchive;
use corefit::batch::{
    resolve_convert_targets, resolve_targets, run_convert, run_generate, BatchSummary,
    ConvertSummary,
};
use corefit::config::Config;
use corefit::constants::Probe;
use corefit::fitting::bi_maxwellian::BiMaxwellianFitter;

/// Regenerate the Helios proton core-fit dataset.
#[derive(Debug, Parser)]
#[command(name = "corefit", version, about)]
struct Cli {
    /// Configuration file (default: $COREFIT_CONFIG, then
    /// ~/.config/corefit/config.yml).
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fit every selected day and write its Parquet table.
    Generate {
        /// Restrict to one spacecraft (1 or 2).
        #[arg(long)]
        probe: Option<Probe>,
        /// Restrict to one year.
        #[arg(long)]
        year: Option<i32>,
        /// Restrict to one day of year (1-366).
        #[arg(long)]
        doy: Option<u16>,
    },
    /// Render finalized tables as published-format CSV.
    Convert {
        /// Restrict to one spacecraft (1 or 2).
        #[arg(long)]
        probe: Option<Probe>,
        /// Restrict to one year.
        #[arg(long)]
        year: Option<i32>,
        /// Restrict to one day of year (1-366).
        #[arg(long)]
        doy: Option<u16>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match Config::locate(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Generate { probe, year, doy } => generate(&config, probe, year, doy),
        Commands::Convert { probe, year, doy } => convert(&config, probe, year, doy),
    }
}

fn generate(
    config: &Config,
    probe: Option<Probe>,
    year: Option<i32>,
    doy: Option<u16>,
) -> ExitCode {
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }
    let params = match config.fit_params() {
        Ok(params) => params,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("{params:#}");

    let archive = DataArchive::new(config.data_dir.clone());
    let targets = resolve_targets(&archive, probe, year, doy);
    if targets.is_empty() {
        log::warn!("no matching days under {}", config.data_dir);
        return ExitCode::SUCCESS;
    }
    log::info!("{} days selected", targets.len());

    let results = run_generate(config, &params, &BiMaxwellianFitter, &targets);
    let summary = BatchSummary::from_results(&results);
    println!("{summary:#}");

    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn convert(
    config: &Config,
    probe: Option<Probe>,
    year: Option<i32>,
    doy: Option<u16>,
) -> ExitCode {
    if let Err(e) = config.validate_output() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    let targets = resolve_convert_targets(&config.output_dir, probe, year, doy);
    if targets.is_empty() {
        log::warn!("no finalized tables under {}", config.output_dir);
        return ExitCode::SUCCESS;
    }
    log::info!("{} days selected", targets.len());

    let results = run_convert(config, &targets);
    let summary = ConvertSummary::from_results(&results);
    println!("{summary:#}");

    if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
