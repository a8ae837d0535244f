use hifitime::{Duration, Epoch};

use crate::constants::MJD;

/// True iff `year` is a leap year in the Gregorian calendar.
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `year` (365 or 366).
pub fn days_in_year(year: i32) -> u16 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Midnight UTC at the start of the given day of year.
///
/// Argument
/// --------
/// * `year`: calendar year
/// * `doy`: day of year, 1-based
///
/// Return
/// ------
/// * the `Epoch` of 00:00:00 UTC on that day, or an error message when `doy`
///   is outside `1..=days_in_year(year)`
pub fn day_start(year: i32, doy: u16) -> Result<Epoch, String> {
    if doy == 0 || doy > days_in_year(year) {
        return Err(format!("day of year {doy} out of range for {year}"));
    }
    let jan1 = Epoch::from_gregorian_utc_at_midnight(year, 1, 1);
    Ok(jan1 + Duration::from_days((doy - 1) as f64))
}

/// Half-open UTC interval `[start, end)` covering the given day of year.
pub fn day_bounds(year: i32, doy: u16) -> Result<(Epoch, Epoch), String> {
    let start = day_start(year, doy)?;
    let end = if doy == days_in_year(year) {
        day_start(year + 1, 1)?
    } else {
        day_start(year, doy + 1)?
    };
    Ok((start, end))
}

/// Epoch → Modified Julian Date (UTC), the storage convention of the day tables.
pub fn epoch_to_mjd(epoch: Epoch) -> MJD {
    epoch.to_mjd_utc_days()
}

/// Modified Julian Date (UTC) → Epoch.
pub fn mjd_to_epoch(mjd: MJD) -> Epoch {
    Epoch::from_mjd_utc(mjd)
}

/// Render an epoch as `YYYY-MM-DDTHH:MM:SS` (UTC, nearest second).
///
/// Used by the plain-text rendition of the day tables. The instrument
/// timestamps are whole seconds, but most of them have no exact MJD
/// float representation, so an epoch read back from a table sits up to
/// half a microsecond off its label and must be rounded, not truncated.
pub fn gregorian_utc_string(epoch: Epoch) -> String {
    let rounded = epoch.round(Duration::from_seconds(1.0));
    let (y, mo, d, h, mi, s, _ns) = rounded.to_gregorian_utc();
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}")
}
