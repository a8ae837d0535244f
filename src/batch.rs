//! # Batch orchestration
//!
//! Drives the two pipeline passes over a set of target days:
//!
//! - **generate**: read one day of scans and field data, fit every scan,
//!   write the day's Parquet table ([`run_generate`]).
//! - **convert**: render finalized tables as published-format CSV
//!   ([`run_convert`]).
//!
//! Each day is processed in isolation. Recoverable conditions (missing
//! inputs, unreadable files, unmatched scans, rejected fits) are logged with
//! day context and folded into that day's [`DayReport`]; only unexpected
//! failures (I/O, Parquet) mark the day [`DayOutcome::Failed`] without
//! touching the rest of the batch. Outcomes collect into a per-day map
//! keyed by [`DayKey`] and are condensed by [`BatchSummary`] /
//! [`ConvertSummary`] for the caller's exit decision.
//!
//! [`run_generate_with_cancel`] polls a caller-supplied closure between
//! days, so a long regeneration can be stopped after the current day.
//! With the `progress` feature enabled, both passes of [`run_generate`]
//! render an `indicatif` progress bar.

use std::collections::HashMap;

use camino::Utf8Path;
use hifitime::Epoch;

use crate::archive::DataArchive;
use crate::config::Config;
use crate::constants::{DayKey, Probe};
use crate::corefit_errors::CorefitError;
use crate::dataset::csv_export::convert_day;
use crate::dataset::parquet_io::write_day;
use crate::dataset::{self, DailyDataset};
use crate::fitting::driver::fit_day;
use crate::fitting::{FitParams, ScanFitter};
use crate::records::dist_reader::load_scan;
use crate::records::mag_reader::load_mag_file;
use crate::records::{MagCadence, MagSeries};
use crate::time::day_start;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "progress")]
use std::time::Duration;

/// Per-day counters reported alongside a written or empty outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DayReport {
    /// Scan files discovered in the day's distribution directory.
    pub scan_files: usize,
    /// Scan files skipped because they failed to parse.
    pub unreadable_files: usize,
    /// Scans handed to the fit loop, after duplicate-epoch dropping.
    pub scans: usize,
    /// Scans with no field vector within tolerance.
    pub unmatched: usize,
    /// Scans the fitter rejected.
    pub fit_failures: usize,
    /// Rows in the finalized table.
    pub rows: usize,
}

impl std::fmt::Display for DayReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scan files, {} unreadable, {} scans, {} unmatched, {} rejected, {} rows",
            self.scan_files,
            self.unreadable_files,
            self.scans,
            self.unmatched,
            self.fit_failures,
            self.rows
        )
    }
}

/// Result of processing one day.
#[derive(Debug)]
pub enum DayOutcome {
    /// Table finalized with at least one row.
    Written(DayReport),
    /// Valid empty result: no inputs, or nothing matched or converged.
    /// No table is written.
    Empty(DayReport),
    /// Unexpected failure, isolated to this day.
    Failed(CorefitError),
}

/// Per-day outcomes of one generate pass.
pub type BatchResult = HashMap<DayKey, DayOutcome, ahash::RandomState>;

/// Aggregate counters over a [`BatchResult`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub days: usize,
    pub written: usize,
    pub empty: usize,
    pub failed: usize,
    pub rows: usize,
    pub unmatched: usize,
    pub fit_failures: usize,
}

impl BatchSummary {
    /// Condense a result map into totals.
    pub fn from_results(results: &BatchResult) -> Self {
        let mut summary = BatchSummary {
            days: results.len(),
            ..BatchSummary::default()
        };
        for outcome in results.values() {
            match outcome {
                DayOutcome::Written(report) => {
                    summary.written += 1;
                    summary.rows += report.rows;
                    summary.unmatched += report.unmatched;
                    summary.fit_failures += report.fit_failures;
                }
                DayOutcome::Empty(report) => {
                    summary.empty += 1;
                    summary.unmatched += report.unmatched;
                    summary.fit_failures += report.fit_failures;
                }
                DayOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// True when any day ended in [`DayOutcome::Failed`].
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "Generation summary")?;
            writeln!(f, "------------------")?;
            writeln!(f, "  days processed  = {}", self.days)?;
            writeln!(f, "  tables written  = {}", self.written)?;
            writeln!(f, "  empty days      = {}", self.empty)?;
            writeln!(f, "  failed days     = {}", self.failed)?;
            writeln!(f, "  rows fitted     = {}", self.rows)?;
            writeln!(f, "  unmatched scans = {}", self.unmatched)?;
            write!(f, "  rejected scans  = {}", self.fit_failures)
        } else {
            write!(
                f,
                "{} days: {} written, {} empty, {} failed ({} rows)",
                self.days, self.written, self.empty, self.failed, self.rows
            )
        }
    }
}

/// Process one day end to end: load, fit, write.
///
/// Never panics and never aborts the batch: every condition short of an
/// I/O or Parquet failure degrades to [`DayOutcome::Empty`] with a log
/// line naming the day.
///
/// Arguments
/// -----------------
/// * `archive`: input tree holding scans and field files.
/// * `output_root`: directory tree the day table is written under.
/// * `params`: association tolerance and fit thresholds.
/// * `fitter`: per-scan fit implementation.
/// * `key`: the day to process.
pub fn process_day(
    archive: &DataArchive,
    output_root: &Utf8Path,
    params: &FitParams,
    fitter: &dyn ScanFitter,
    key: &DayKey,
) -> DayOutcome {
    let day = match day_start(key.year, key.doy) {
        Ok(epoch) => epoch,
        Err(reason) => {
            log::warn!("{key}: {reason}, skipped");
            return DayOutcome::Empty(DayReport::default());
        }
    };

    let files = match archive.scan_files(key) {
        Ok(files) => files,
        Err(CorefitError::MissingData(reason)) => {
            log::info!("{key}: {reason}");
            return DayOutcome::Empty(DayReport::default());
        }
        Err(e) => {
            log::error!("{key}: cannot list scan files: {e}");
            return DayOutcome::Failed(e);
        }
    };

    let mut report = DayReport {
        scan_files: files.len(),
        ..DayReport::default()
    };

    let mut scans = Vec::with_capacity(files.len());
    for file in &files {
        match load_scan(file) {
            Ok(scan) => scans.push(scan),
            Err(e) => {
                report.unreadable_files += 1;
                log::warn!("{key}: skipping unreadable scan file: {e}");
            }
        }
    }

    let mag_4hz = load_series(&archive.mag_4hz_file(key), MagCadence::FourHertz, day, key);
    let mag_6s = load_series(&archive.mag_6s_file(key), MagCadence::SixSecond, day, key);
    if mag_4hz.is_none() && mag_6s.is_none() {
        log::info!("{key}: no usable field data, every scan will be unmatched");
    }

    let (rows, tally) = fit_day(scans, mag_4hz.as_ref(), mag_6s.as_ref(), fitter, params);
    report.scans = tally.scans;
    report.unmatched = tally.unmatched;
    report.fit_failures = tally.fit_failures;
    report.rows = rows.len();

    if rows.is_empty() {
        log::info!("{key}: no fitted rows, no table written ({report})");
        return DayOutcome::Empty(report);
    }

    let dataset = DailyDataset::from_rows(*key, rows);
    match write_day(&dataset, output_root) {
        Ok(path) => {
            log::info!("{key}: wrote {} rows to {path}", report.rows);
            DayOutcome::Written(report)
        }
        Err(e) => {
            log::error!("{key}: cannot write table: {e}");
            DayOutcome::Failed(e)
        }
    }
}

/// Load one field series, degrading every problem to `None`.
fn load_series(
    path: &Utf8Path,
    cadence: MagCadence,
    day: Epoch,
    key: &DayKey,
) -> Option<MagSeries> {
    if !path.is_file() {
        log::debug!("{key}: no {cadence} field file at {path}");
        return None;
    }
    match load_mag_file(path, cadence, day) {
        Ok(series) if series.is_empty() => {
            log::debug!("{key}: {cadence} field file {path} holds no usable rows");
            None
        }
        Ok(series) => Some(series),
        Err(e) => {
            log::warn!("{key}: unreadable {cadence} field file: {e}");
            None
        }
    }
}

/// Run the generate pass over every target day.
///
/// Arguments
/// -----------------
/// * `config`: resolved directories (`data_dir` read, `output_dir` written).
/// * `params`: association tolerance and fit thresholds.
/// * `fitter`: per-scan fit implementation.
/// * `targets`: days to process, typically from [`resolve_targets`].
///
/// Return
/// ----------
/// * One [`DayOutcome`] per target day.
#[cfg(not(feature = "progress"))]
pub fn run_generate(
    config: &Config,
    params: &FitParams,
    fitter: &dyn ScanFitter,
    targets: &[DayKey],
) -> BatchResult {
    let archive = DataArchive::new(config.data_dir.clone());
    let mut results: BatchResult = HashMap::default();

    for key in targets {
        let outcome = process_day(&archive, &config.output_dir, params, fitter, key);
        results.insert(*key, outcome);
    }

    results
}

/// Run the generate pass over every target day.
///
/// Arguments
/// -----------------
/// * `config`: resolved directories (`data_dir` read, `output_dir` written).
/// * `params`: association tolerance and fit thresholds.
/// * `fitter`: per-scan fit implementation.
/// * `targets`: days to process, typically from [`resolve_targets`].
///
/// Return
/// ----------
/// * One [`DayOutcome`] per target day.
#[cfg(feature = "progress")]
pub fn run_generate(
    config: &Config,
    params: &FitParams,
    fitter: &dyn ScanFitter,
    targets: &[DayKey],
) -> BatchResult {
    let archive = DataArchive::new(config.data_dir.clone());
    let mut results: BatchResult = HashMap::default();

    let pb = ProgressBar::new(targets.len().max(1) as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
        )
        .expect("indicatif template"),
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    for key in targets {
        pb.set_message(key.to_string());
        let outcome = process_day(&archive, &config.output_dir, params, fitter, key);
        results.insert(*key, outcome);
        pb.inc(1);
    }

    pb.disable_steady_tick();
    pb.finish_and_clear();
    results
}

/// Run the generate pass, polling `should_cancel` between days.
///
/// Cancellation is coarse: the closure is checked before each day, so a
/// request lands after the current day finalizes and the map holds every
/// completed day.
#[cfg(not(feature = "progress"))]
pub fn run_generate_with_cancel<F>(
    config: &Config,
    params: &FitParams,
    fitter: &dyn ScanFitter,
    targets: &[DayKey],
    mut should_cancel: F,
) -> BatchResult
where
    F: FnMut() -> bool,
{
    let archive = DataArchive::new(config.data_dir.clone());
    let mut results: BatchResult = HashMap::default();

    for key in targets {
        if should_cancel() {
            log::info!(
                "cancellation requested, stopping after {} of {} days",
                results.len(),
                targets.len()
            );
            break;
        }
        let outcome = process_day(&archive, &config.output_dir, params, fitter, key);
        results.insert(*key, outcome);
    }

    results
}

/// Run the generate pass, polling `should_cancel` between days.
///
/// Cancellation is coarse: the closure is checked before each day, so a
/// request lands after the current day finalizes and the map holds every
/// completed day.
#[cfg(feature = "progress")]
pub fn run_generate_with_cancel<F>(
    config: &Config,
    params: &FitParams,
    fitter: &dyn ScanFitter,
    targets: &[DayKey],
    mut should_cancel: F,
) -> BatchResult
where
    F: FnMut() -> bool,
{
    let archive = DataArchive::new(config.data_dir.clone());
    let mut results: BatchResult = HashMap::default();

    let pb = ProgressBar::new(targets.len().max(1) as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
        )
        .expect("indicatif template"),
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    for key in targets {
        if should_cancel() {
            log::info!(
                "cancellation requested, stopping after {} of {} days",
                results.len(),
                targets.len()
            );
            pb.set_message("Interrupted");
            pb.disable_steady_tick();
            pb.finish_and_clear();
            break;
        }

        pb.set_message(key.to_string());
        let outcome = process_day(&archive, &config.output_dir, params, fitter, key);
        results.insert(*key, outcome);
        pb.inc(1);
    }

    pb.disable_steady_tick();
    pb.finish_and_clear();
    results
}

/// Days the generate pass should cover.
///
/// A fully specified triple addresses that single day, present in the
/// archive or not. Any missing part falls back to archive discovery,
/// filtered by whichever parts were given.
pub fn resolve_targets(
    archive: &DataArchive,
    probe: Option<Probe>,
    year: Option<i32>,
    doy: Option<u16>,
) -> Vec<DayKey> {
    if let (Some(p), Some(y), Some(d)) = (probe, year, doy) {
        return vec![DayKey::new(p, y, d)];
    }
    archive
        .available_days(probe)
        .into_iter()
        .filter(|key| year.map_or(true, |y| key.year == y))
        .filter(|key| doy.map_or(true, |d| key.doy == d))
        .collect()
}

/// Result of converting one day's table.
#[derive(Debug)]
pub enum ConvertOutcome {
    /// CSV written next to the table.
    Converted { rows: usize },
    /// No finalized table for this day; nothing to convert.
    MissingTable,
    /// Unexpected failure, isolated to this day.
    Failed(CorefitError),
}

/// Per-day outcomes of one convert pass.
pub type ConvertResult = HashMap<DayKey, ConvertOutcome, ahash::RandomState>;

/// Aggregate counters over a [`ConvertResult`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    pub days: usize,
    pub converted: usize,
    pub missing: usize,
    pub failed: usize,
    pub rows: usize,
}

impl ConvertSummary {
    /// Condense a result map into totals.
    pub fn from_results(results: &ConvertResult) -> Self {
        let mut summary = ConvertSummary {
            days: results.len(),
            ..ConvertSummary::default()
        };
        for outcome in results.values() {
            match outcome {
                ConvertOutcome::Converted { rows } => {
                    summary.converted += 1;
                    summary.rows += rows;
                }
                ConvertOutcome::MissingTable => summary.missing += 1,
                ConvertOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// True when any day ended in [`ConvertOutcome::Failed`].
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl std::fmt::Display for ConvertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "Conversion summary")?;
            writeln!(f, "------------------")?;
            writeln!(f, "  days selected  = {}", self.days)?;
            writeln!(f, "  CSVs written   = {}", self.converted)?;
            writeln!(f, "  missing tables = {}", self.missing)?;
            writeln!(f, "  failed days    = {}", self.failed)?;
            write!(f, "  rows converted = {}", self.rows)
        } else {
            write!(
                f,
                "{} days: {} converted, {} missing, {} failed ({} rows)",
                self.days, self.converted, self.missing, self.failed, self.rows
            )
        }
    }
}

/// Convert the finalized table of every target day to CSV.
///
/// A target without a table is a debug-logged skip, so `convert` can be
/// pointed at a whole mission after a partial regeneration.
pub fn run_convert(config: &Config, targets: &[DayKey]) -> ConvertResult {
    let mut results: ConvertResult = HashMap::default();

    for key in targets {
        let table = dataset::table_path(&config.output_dir, key);
        if !table.is_file() {
            log::debug!("{key}: no table at {table}, skipped");
            results.insert(*key, ConvertOutcome::MissingTable);
            continue;
        }
        let csv = dataset::csv_path(&config.output_dir, key);
        match convert_day(&table, &csv) {
            Ok(rows) => {
                log::info!("{key}: converted {rows} rows to {csv}");
                results.insert(*key, ConvertOutcome::Converted { rows });
            }
            Err(e) => {
                log::error!("{key}: conversion failed: {e}");
                results.insert(*key, ConvertOutcome::Failed(e));
            }
        }
    }

    results
}

/// Days the convert pass should cover.
///
/// Mirrors [`resolve_targets`] but discovers finalized tables under the
/// output tree instead of archive inputs.
pub fn resolve_convert_targets(
    output_root: &Utf8Path,
    probe: Option<Probe>,
    year: Option<i32>,
    doy: Option<u16>,
) -> Vec<DayKey> {
    if let (Some(p), Some(y), Some(d)) = (probe, year, doy) {
        return vec![DayKey::new(p, y, d)];
    }
    dataset::available_tables(output_root, probe)
        .into_iter()
        .filter(|key| year.map_or(true, |y| key.year == y))
        .filter(|key| doy.map_or(true, |d| key.doy == d))
        .collect()
}
