//! # Helios ion distribution scan reader
//!
//! Parse one raw 3D distribution-function file into an [`IonScan`].
//!
//! ## Overview
//! -----------------
//! Scan files are plain ASCII, one file per energy sweep. The file **name**
//! carries the probe and the sweep start time; the file **body** carries a
//! short `key value` header followed by one row per velocity-space bin:
//!
//! ```text
//! instrument 1
//! r_sun 0.4173
//! clong 152.30
//! clat -3.10
//! vr 35.9
//! vt 12.1
//! az el e vx vy vz counts pdf
//! 4 3 7 -312.1 55.2 10.9 41 3.52e-12
//! ...
//! ```
//!
//! File names follow the historical convention
//! `h{probe}y{yy}d{doy}h{HH}m{MM}s{SS}_hdm.{n}`, e.g.
//! `h1y76d092h02m24s01_hdm.5`.
//!
//! ## Units & Conventions
//! -----------------
//! - **Velocities:** km/s, spacecraft frame.
//! - **Phase-space density:** s³ m⁻⁶.
//! - **Time:** sweep start at second precision, UTC, from the file name.
//!   Two-digit years map to 1900 + yy (the missions flew 1974-1985).
//! - Unknown header keys are ignored so newer exports stay readable.
//!
//! ## Error Handling
//! -----------------
//! Any malformed content surfaces as [`CorefitError::Parse`] with the path
//! and 1-based line number (line 0 marks file-name problems). Callers skip
//! the offending file and keep the day alive.
use camino::Utf8Path;
use hifitime::{Duration, Epoch};
use nalgebra::Vector3;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::Probe;
use crate::corefit_errors::CorefitError;
use crate::records::{IonScan, VelocityBin};
use crate::time::day_start;

/// File-name pattern of a distribution scan, capturing probe, date and time.
static SCAN_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^h([12])y(\d{2})d(\d{3})h(\d{2})m(\d{2})s(\d{2})_hdm\.\d+$")
        .expect("scan file regex")
});

/// Column-header line separating the scan header from the bin rows.
const BIN_HEADER: &str = "az el e vx vy vz counts pdf";

/// Extract probe and sweep start epoch from a scan file name.
///
/// Return
/// ------
/// * `Ok((probe, epoch))` when the name matches the scan convention
/// * `Err(reason)` otherwise
pub(crate) fn filename_meta(name: &str) -> Result<(Probe, Epoch), String> {
    let caps = SCAN_FILE_RE
        .captures(name)
        .ok_or_else(|| format!("'{name}' is not a distribution scan file name"))?;

    // The regex only matches digits, so the numeric conversions cannot fail;
    // day-of-year range still needs a real check.
    let probe = if &caps[1] == "1" {
        Probe::Helios1
    } else {
        Probe::Helios2
    };
    let year = 1900 + caps[2].parse::<i32>().map_err(|e| e.to_string())?;
    let doy = caps[3].parse::<u16>().map_err(|e| e.to_string())?;
    let hour = caps[4].parse::<u32>().map_err(|e| e.to_string())?;
    let minute = caps[5].parse::<u32>().map_err(|e| e.to_string())?;
    let second = caps[6].parse::<u32>().map_err(|e| e.to_string())?;

    if hour > 23 || minute > 59 || second > 59 {
        return Err(format!("'{name}' carries an invalid time of day"));
    }

    let start = day_start(year, doy)?;
    let offset = (hour * 3600 + minute * 60 + second) as f64;
    Ok((probe, start + Duration::from_seconds(offset)))
}

/// Load one distribution scan file.
///
/// Arguments
/// -----------------
/// * `path`: location of the scan file; the file name must follow the
///   `h{p}y{yy}d{doy}h{HH}m{MM}s{SS}_hdm.{n}` convention
///
/// Return
/// ----------
/// * the parsed [`IonScan`], or [`CorefitError::Parse`] pinpointing the
///   offending line
pub fn load_scan(path: &Utf8Path) -> Result<IonScan, CorefitError> {
    let name = path.file_name().unwrap_or_default();
    let (probe, epoch) = filename_meta(name).map_err(|reason| CorefitError::Parse {
        path: path.to_owned(),
        line: 0,
        reason,
    })?;

    let text = std::fs::read_to_string(path)?;
    parse_scan_body(&text, probe, epoch).map_err(|(line, reason)| CorefitError::Parse {
        path: path.to_owned(),
        line,
        reason,
    })
}

/// Parse the body of a scan file. Returns `(line, reason)` on failure.
fn parse_scan_body(text: &str, probe: Probe, epoch: Epoch) -> Result<IonScan, (usize, String)> {
    let mut instrument: Option<u8> = None;
    let mut r_sun: Option<f64> = None;
    let mut clong: Option<f64> = None;
    let mut clat: Option<f64> = None;
    let mut vr: Option<f64> = None;
    let mut vt: Option<f64> = None;

    let mut bins: Vec<VelocityBin> = Vec::new();
    let mut in_header = true;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if in_header {
            if line == BIN_HEADER {
                in_header = false;
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| (line_no, format!("expected 'key value', got '{line}'")))?;
            let value = value.trim();
            match key {
                "instrument" => instrument = Some(parse_num(value, line_no, "instrument")?),
                "r_sun" => r_sun = Some(parse_num(value, line_no, "r_sun")?),
                "clong" => clong = Some(parse_num(value, line_no, "clong")?),
                "clat" => clat = Some(parse_num(value, line_no, "clat")?),
                "vr" => vr = Some(parse_num(value, line_no, "vr")?),
                "vt" => vt = Some(parse_num(value, line_no, "vt")?),
                other => log::debug!("ignoring unknown scan header key '{other}'"),
            }
        } else {
            bins.push(parse_bin_row(line, line_no)?);
        }
    }

    if in_header {
        return Err((0, format!("missing bin table header '{BIN_HEADER}'")));
    }
    if bins.is_empty() {
        return Err((0, "scan file contains no velocity bins".into()));
    }

    let missing = |key: &str| (0usize, format!("missing header key '{key}'"));
    Ok(IonScan {
        probe,
        epoch,
        instrument: instrument.ok_or_else(|| missing("instrument"))?,
        r_sun: r_sun.ok_or_else(|| missing("r_sun"))?,
        clong: clong.ok_or_else(|| missing("clong"))?,
        clat: clat.ok_or_else(|| missing("clat"))?,
        vr: vr.ok_or_else(|| missing("vr"))?,
        vt: vt.ok_or_else(|| missing("vt"))?,
        bins,
    })
}

/// Parse one bin row: `az el e vx vy vz counts pdf`.
fn parse_bin_row(line: &str, line_no: usize) -> Result<VelocityBin, (usize, String)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 8 {
        return Err((
            line_no,
            format!("expected 8 bin columns, got {}", fields.len()),
        ));
    }

    let az: u16 = parse_num(fields[0], line_no, "az")?;
    let el: u16 = parse_num(fields[1], line_no, "el")?;
    let e_step: u16 = parse_num(fields[2], line_no, "e")?;
    let vx: f64 = parse_num(fields[3], line_no, "vx")?;
    let vy: f64 = parse_num(fields[4], line_no, "vy")?;
    let vz: f64 = parse_num(fields[5], line_no, "vz")?;
    let counts: i64 = parse_num(fields[6], line_no, "counts")?;
    let pdf: f64 = parse_num(fields[7], line_no, "pdf")?;

    if !(vx.is_finite() && vy.is_finite() && vz.is_finite() && pdf.is_finite()) {
        return Err((line_no, "non-finite value in bin row".into()));
    }

    Ok(VelocityBin {
        az,
        el,
        e_step,
        v: Vector3::new(vx, vy, vz),
        counts,
        pdf,
    })
}

fn parse_num<T: std::str::FromStr>(
    s: &str,
    line_no: usize,
    what: &str,
) -> Result<T, (usize, String)> {
    s.parse::<T>()
        .map_err(|_| (line_no, format!("invalid {what} value '{s}'")))
}
