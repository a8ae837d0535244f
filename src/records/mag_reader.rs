//! # Helios magnetic-field file reader
//!
//! Parse one daily field file (4 Hz fluxgate or 6 s averages) into a
//! [`MagSeries`].
//!
//! ## Overview
//! -----------------
//! Field files are plain ASCII, one file per probe and day, one vector per
//! row:
//!
//! ```text
//! # optional comment lines
//! 8641.25 -3.12 4.87 1.03
//! ```
//!
//! Columns are seconds of day followed by the three field components in nT.
//! Rows carrying non-finite values are dropped with a debug log instead of
//! failing the file: single corrupt vectors are common in the raw archive
//! and the nearest-match association tolerates holes.
use camino::Utf8Path;
use hifitime::{Duration, Epoch};
use nalgebra::Vector3;

use crate::constants::SECONDS_PER_DAY;
use crate::corefit_errors::CorefitError;
use crate::records::{MagCadence, MagRecord, MagSeries};

/// Load one daily field file.
///
/// Arguments
/// -----------------
/// * `path`: location of the field file
/// * `cadence`: instrument cadence the file belongs to
/// * `day`: midnight epoch of the day the file covers; row times are
///   seconds past this epoch
///
/// Return
/// ----------
/// * the parsed, time-sorted [`MagSeries`] (possibly empty), or
///   [`CorefitError::Parse`] for structurally malformed rows
pub fn load_mag_file(
    path: &Utf8Path,
    cadence: MagCadence,
    day: Epoch,
) -> Result<MagSeries, CorefitError> {
    let text = std::fs::read_to_string(path)?;
    let (records, dropped) =
        parse_mag_body(&text, day).map_err(|(line, reason)| CorefitError::Parse {
            path: path.to_owned(),
            line,
            reason,
        })?;
    if dropped > 0 {
        log::debug!("{path}: dropped {dropped} non-finite field rows");
    }
    Ok(MagSeries::new(cadence, records))
}

/// Parse the body of a field file. Returns `(line, reason)` on failure and
/// the number of dropped non-finite rows on success.
fn parse_mag_body(text: &str, day: Epoch) -> Result<(Vec<MagRecord>, usize), (usize, String)> {
    let mut records = Vec::new();
    let mut dropped = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err((
                line_no,
                format!("expected 4 field columns, got {}", fields.len()),
            ));
        }

        let sec: f64 = fields[0]
            .parse()
            .map_err(|_| (line_no, format!("invalid seconds value '{}'", fields[0])))?;
        let bx: f64 = fields[1]
            .parse()
            .map_err(|_| (line_no, format!("invalid Bx value '{}'", fields[1])))?;
        let by: f64 = fields[2]
            .parse()
            .map_err(|_| (line_no, format!("invalid By value '{}'", fields[2])))?;
        let bz: f64 = fields[3]
            .parse()
            .map_err(|_| (line_no, format!("invalid Bz value '{}'", fields[3])))?;

        if !(sec.is_finite() && bx.is_finite() && by.is_finite() && bz.is_finite()) {
            dropped += 1;
            continue;
        }
        if !(0.0..SECONDS_PER_DAY).contains(&sec) {
            return Err((line_no, format!("seconds of day {sec} out of range")));
        }

        records.push(MagRecord {
            epoch: day + Duration::from_seconds(sec),
            b: Vector3::new(bx, by, bz),
        });
    }

    Ok((records, dropped))
}

#[cfg(test)]
mod mag_reader_test {
    use super::*;
    use crate::time::day_start;

    #[test]
    fn test_parse_mag_body() {
        let day = day_start(1976, 92).unwrap();
        let text = "\
# Helios 1 fluxgate, 1976 day 92
0.00 -3.12 4.87 1.03
0.25 -3.10 4.90 1.01
0.50 -3.15 4.85 1.05
";
        let (records, dropped) = parse_mag_body(text, day).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(dropped, 0);
        assert_eq!((records[1].epoch - day).to_seconds(), 0.25);
        assert!((records[0].b.y - 4.87).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_rows_dropped() {
        let day = day_start(1976, 92).unwrap();
        let text = "\
0.00 -3.12 4.87 1.03
0.25 NaN 4.90 1.01
0.50 -3.15 4.85 inf
0.75 -3.15 4.85 1.0
";
        let (records, dropped) = parse_mag_body(text, day).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_malformed_rows_fail() {
        let day = day_start(1976, 92).unwrap();
        assert!(parse_mag_body("0.0 1.0 2.0\n", day).is_err());
        assert!(parse_mag_body("0.0 1.0 two 3.0\n", day).is_err());
        assert!(parse_mag_body("90000.0 1.0 2.0 3.0\n", day).is_err());
    }

    #[test]
    fn test_empty_file_is_valid() {
        let day = day_start(1976, 92).unwrap();
        let (records, dropped) = parse_mag_body("# nothing today\n", day).unwrap();
        assert!(records.is_empty());
        assert_eq!(dropped, 0);
    }
}
