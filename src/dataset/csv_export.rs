//! # CSV rendition
//!
//! Plain-text form of a finalized day table, row for row, in the column
//! order of the published dataset and with its historical status cleanup
//! applied.

use camino::Utf8Path;

use crate::corefit_errors::CorefitError;
use crate::dataset::parquet_io::read_day;
use crate::dataset::TableRow;
use crate::time::{gregorian_utc_string, mjd_to_epoch};

/// Column header of the published CSV rendition.
pub const CSV_COLUMNS: [&str; 19] = [
    "Time",
    "B instrument",
    "Bx",
    "By",
    "Bz",
    "sigma B",
    "Ion instrument",
    "Status",
    "Tp_par",
    "Tp_perp",
    "r_sun",
    "clat",
    "clong",
    "n_p",
    "vp_x",
    "vp_y",
    "vp_z",
    "vth_p_par",
    "vth_p_perp",
];

/// Convert one finalized binary table to its CSV rendition.
///
/// Row count and ordering match the binary table exactly. Epochs render as
/// `YYYY-MM-DDTHH:MM:SS`, floats to 6 significant figures, NaN as `NaN`.
/// Parent directories of `csv` are created as needed.
///
/// Return
/// ----------
/// * The number of rows converted.
pub fn convert_day(table: &Utf8Path, csv: &Utf8Path) -> Result<usize, CorefitError> {
    let rows = read_day(table)?;
    if let Some(parent) = csv.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(csv)?;
    writer.write_record(CSV_COLUMNS)?;
    for row in &rows {
        writer.write_record(csv_record(row))?;
    }
    writer.flush()?;

    Ok(rows.len())
}

/// Status cleanup applied by the published dataset: rows tagged "field too
/// variable" (3) kept their velocity and were published as fitted (1), and
/// any remaining code above 2 was clamped to 3.
pub fn cleanup_status(status: i32) -> i32 {
    let status = if status == 3 { 1 } else { status };
    if status > 2 {
        3
    } else {
        status
    }
}

/// One published CSV line, in [`CSV_COLUMNS`] order.
fn csv_record(row: &TableRow) -> [String; 19] {
    [
        gregorian_utc_string(mjd_to_epoch(row.time_mjd)),
        row.b_instrument.to_string(),
        format_sigfig(row.bx),
        format_sigfig(row.by),
        format_sigfig(row.bz),
        format_sigfig(row.sigma_b),
        row.ion_instrument.to_string(),
        cleanup_status(row.status).to_string(),
        format_sigfig(row.tp_par),
        format_sigfig(row.tp_perp),
        format_sigfig(row.r_sun),
        format_sigfig(row.clat),
        format_sigfig(row.clong),
        format_sigfig(row.n_p),
        format_sigfig(row.vp_x),
        format_sigfig(row.vp_y),
        format_sigfig(row.vp_z),
        format_sigfig(row.vth_p_par),
        format_sigfig(row.vth_p_perp),
    ]
}

/// Render a float to at most 6 significant figures.
///
/// Fixed notation while the leading digit sits in `[1e-4, 1e6)`, scientific
/// otherwise, trailing zeros trimmed either way. NaN renders as `NaN`.
pub fn format_sigfig(x: f64) -> String {
    const SIG: i32 = 6;

    if x.is_nan() {
        return "NaN".to_string();
    }
    if x == 0.0 {
        return "0".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }

    let exponent = x.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= SIG {
        let precision = (SIG - 1) as usize;
        trim_mantissa(&format!("{x:.precision$e}"))
    } else {
        let decimals = (SIG - 1 - exponent).max(0) as usize;
        trim_fixed(&format!("{x:.decimals$}"))
    }
}

fn trim_fixed(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn trim_mantissa(s: &str) -> String {
    // "2.500000e-12" -> "2.5e-12"
    match s.split_once('e') {
        Some((mantissa, exponent)) => {
            let mantissa = if mantissa.contains('.') {
                mantissa.trim_end_matches('0').trim_end_matches('.')
            } else {
                mantissa
            };
            format!("{mantissa}e{exponent}")
        }
        None => s.to_string(),
    }
}
