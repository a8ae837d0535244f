//! # Raw data archive layout
//!
//! Resolve on-disk locations inside the Helios raw-data tree and discover
//! which (probe, year, day) combinations have distribution data at all.
//!
//! ## Overview
//! -----------------
//! The archive root holds one branch per spacecraft:
//!
//! ```text
//! <root>/helios1/dist/<year>/<doy>/h1y<yy>d<doy>h<HH>m<MM>s<SS>_hdm.<n>
//! <root>/helios1/mag/4hz/h1<yy><doy>.asc
//! <root>/helios1/6sec_ness/<year>/h1<yy><doy>.asc
//! ```
//!
//! Day-of-year path components are zero-padded to three digits, matching the
//! file-name convention. [`DataArchive`] never creates anything: the raw tree
//! is read-only input.
use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::constants::{DayKey, Probe};
use crate::corefit_errors::CorefitError;
use crate::records::dist_reader::filename_meta;
use crate::time::{day_bounds, days_in_year};

/// Read-only view over the raw Helios data tree.
#[derive(Debug, Clone)]
pub struct DataArchive {
    root: Utf8PathBuf,
}

impl DataArchive {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding the distribution scans of one day.
    pub fn dist_dir(&self, key: &DayKey) -> Utf8PathBuf {
        self.root
            .join(key.probe.to_string())
            .join("dist")
            .join(key.year.to_string())
            .join(format!("{:03}", key.doy))
    }

    /// Daily 4 Hz fluxgate file (flat directory, all years together).
    pub fn mag_4hz_file(&self, key: &DayKey) -> Utf8PathBuf {
        self.root
            .join(key.probe.to_string())
            .join("mag")
            .join("4hz")
            .join(mag_file_name(key))
    }

    /// Daily 6 s averaged field file (one directory per year).
    pub fn mag_6s_file(&self, key: &DayKey) -> Utf8PathBuf {
        self.root
            .join(key.probe.to_string())
            .join("6sec_ness")
            .join(key.year.to_string())
            .join(mag_file_name(key))
    }

    /// List the distribution scan files of one day, sorted by name.
    ///
    /// Files whose names do not follow the scan convention, or whose
    /// encoded probe/epoch disagree with `key`, are skipped with a warning.
    ///
    /// Return
    /// ----------
    /// * the sorted scan paths, or [`CorefitError::MissingData`] when the
    ///   day directory does not exist
    pub fn scan_files(&self, key: &DayKey) -> Result<Vec<Utf8PathBuf>, CorefitError> {
        let dir = self.dist_dir(key);
        if !dir.is_dir() {
            return Err(CorefitError::MissingData(format!(
                "no distribution directory for {key} at {dir}"
            )));
        }

        let (day_start, day_end) = day_bounds(key.year, key.doy)
            .map_err(CorefitError::MissingData)?;

        let mut files = Vec::new();
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match filename_meta(name) {
                Ok((probe, epoch))
                    if probe == key.probe && epoch >= day_start && epoch < day_end =>
                {
                    files.push(entry.path().to_owned());
                }
                Ok(_) => {
                    log::warn!("{key}: stray scan file '{name}' belongs to another day, skipped");
                }
                Err(_) => {
                    log::debug!("{key}: ignoring non-scan file '{name}'");
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Discover every day with a distribution directory, in ascending order.
    ///
    /// Walks `helios{p}/dist/<year>/<doy>` two levels deep; directory names
    /// that do not form a valid (year, day-of-year) pair are ignored.
    pub fn available_days(&self, probe: Option<Probe>) -> Vec<DayKey> {
        let mut days = Vec::new();
        for p in Probe::all() {
            if probe.is_some_and(|wanted| wanted != p) {
                continue;
            }
            let dist_root = self.root.join(p.to_string()).join("dist");
            if !dist_root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dist_root)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_dir() {
                    continue;
                }
                let Some(doy_name) = entry.file_name().to_str() else {
                    continue;
                };
                let Some(year_name) = entry
                    .path()
                    .parent()
                    .and_then(|d| d.file_name())
                    .and_then(|n| n.to_str())
                else {
                    continue;
                };
                let (Ok(year), Ok(doy)) = (year_name.parse::<i32>(), doy_name.parse::<u16>())
                else {
                    continue;
                };
                if doy == 0 || doy > days_in_year(year) {
                    continue;
                }
                days.push(DayKey::new(p, year, doy));
            }
        }
        days.sort();
        days
    }
}

/// Daily field file name shared by both cadences: `h{p}{yy}{doy}.asc`.
fn mag_file_name(key: &DayKey) -> String {
    format!(
        "h{}{:02}{:03}.asc",
        key.probe.number(),
        key.short_year(),
        key.doy
    )
}
