//! # Per-day output dataset
//!
//! Layout of the regenerated dataset under the configured output root, the
//! accumulated day table ([`DailyDataset`]) with its stored row form
//! ([`TableRow`]), and discovery of already finalized tables.
//!
//! ```text
//! <output>/helios1/fits/<year>/h1_<year>_<doy>_corefit.parquet
//! <output>/helios1/fits/<year>/csv/h1_<year>_<doy>_corefit.csv
//! ```
//!
//! Binary tables are written by [`parquet_io::write_day`] and converted to
//! their plain-text rendition by [`csv_export::convert_day`].

pub mod csv_export;
pub mod parquet_io;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::constants::{DayKey, Probe};
use crate::fitting::CoreFit;
use crate::time::{days_in_year, epoch_to_mjd};

/// File-name pattern of a finalized day table.
static TABLE_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^h([12])_(\d{4})_(\d{3})_corefit\.parquet$").expect("table file regex")
});

/// One day of fitted rows, accumulated in ascending epoch order by the fit
/// driver and finalized exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyDataset {
    key: DayKey,
    rows: Vec<CoreFit>,
}

impl DailyDataset {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(key: DayKey, rows: Vec<CoreFit>) -> Self {
        Self { key, rows }
    }

    pub fn push(&mut self, row: CoreFit) {
        self.rows.push(row);
    }

    pub fn key(&self) -> &DayKey {
        &self.key
    }

    pub fn rows(&self) -> &[CoreFit] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One stored table row, plain column values in schema order.
///
/// [`CoreFit`] is the in-memory fit product; `TableRow` is its on-disk
/// form, also returned by [`parquet_io::read_day`] so conversion and
/// verification never reinterpret the physics types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableRow {
    pub time_mjd: f64,
    pub status: i32,
    pub ion_instrument: i32,
    pub b_instrument: i32,
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
    pub sigma_b: f64,
    pub n_p: f64,
    pub vp_x: f64,
    pub vp_y: f64,
    pub vp_z: f64,
    pub tp_par: f64,
    pub tp_perp: f64,
    pub vth_p_par: f64,
    pub vth_p_perp: f64,
    pub r_sun: f64,
    pub clat: f64,
    pub clong: f64,
}

impl From<&CoreFit> for TableRow {
    fn from(fit: &CoreFit) -> Self {
        Self {
            time_mjd: epoch_to_mjd(fit.epoch),
            status: fit.status.code(),
            ion_instrument: i32::from(fit.ion_instrument),
            b_instrument: fit.b_cadence.code(),
            bx: fit.b.x,
            by: fit.b.y,
            bz: fit.b.z,
            sigma_b: fit.sigma_b,
            n_p: fit.n_p,
            vp_x: fit.v_p.x,
            vp_y: fit.v_p.y,
            vp_z: fit.v_p.z,
            tp_par: fit.t_par,
            tp_perp: fit.t_perp,
            vth_p_par: fit.vth_par,
            vth_p_perp: fit.vth_perp,
            r_sun: fit.r_sun,
            clat: fit.clat,
            clong: fit.clong,
        }
    }
}

/// Path of one day's binary table under `output_root`.
pub fn table_path(output_root: &Utf8Path, key: &DayKey) -> Utf8PathBuf {
    fits_dir(output_root, key).join(table_file_name(key, "parquet"))
}

/// Path of one day's CSV rendition under `output_root`.
pub fn csv_path(output_root: &Utf8Path, key: &DayKey) -> Utf8PathBuf {
    fits_dir(output_root, key)
        .join("csv")
        .join(table_file_name(key, "csv"))
}

fn fits_dir(output_root: &Utf8Path, key: &DayKey) -> Utf8PathBuf {
    output_root
        .join(key.probe.to_string())
        .join("fits")
        .join(key.year.to_string())
}

fn table_file_name(key: &DayKey, extension: &str) -> String {
    format!(
        "h{}_{}_{:03}_corefit.{extension}",
        key.probe.number(),
        key.year,
        key.doy
    )
}

/// Discover every finalized table under `output_root`, in ascending order.
///
/// Walks `helios{p}/fits/<year>` and keeps files matching the table naming
/// convention; a file whose encoded probe disagrees with its branch is
/// skipped with a warning.
pub fn available_tables(output_root: &Utf8Path, probe: Option<Probe>) -> Vec<DayKey> {
    let mut days = Vec::new();
    for p in Probe::all() {
        if probe.is_some_and(|wanted| wanted != p) {
            continue;
        }
        let fits_root = output_root.join(p.to_string()).join("fits");
        if !fits_root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&fits_root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(caps) = TABLE_FILE_RE.captures(name) else {
                continue;
            };
            let (Ok(probe_num), Ok(year), Ok(doy)) = (
                caps[1].parse::<u8>(),
                caps[2].parse::<i32>(),
                caps[3].parse::<u16>(),
            ) else {
                continue;
            };
            if probe_num != p.number() {
                log::warn!("table '{name}' under the {p} branch encodes another probe, skipped");
                continue;
            }
            if doy == 0 || doy > days_in_year(year) {
                continue;
            }
            days.push(DayKey::new(p, year, doy));
        }
    }
    days.sort();
    days
}
