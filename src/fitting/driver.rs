//! # Per-day fit loop
//!
//! Pairs every distribution scan of one day with its magnetic-field sample
//! and hands the pair to a [`ScanFitter`]. Scans without a field vector
//! within tolerance and scans the fitter rejects are counted in a
//! [`FitTally`] and skipped; they never produce output rows.
//!
//! Scans are processed in ascending epoch order, so the returned rows are
//! strictly ascending as well. Duplicate scan epochs keep their first
//! occurrence.

use hifitime::{Duration, Epoch};

use crate::fitting::field_frame::window_dispersion;
use crate::fitting::{CoreFit, FieldSample, FitParams, ScanFitter};
use crate::records::{IonScan, MagSeries};

/// Skip counters of one day's fit loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FitTally {
    /// Scans handed to the loop, after duplicate-epoch dropping.
    pub scans: usize,
    /// Scans with no field vector within tolerance.
    pub unmatched: usize,
    /// Scans the fitter rejected.
    pub fit_failures: usize,
}

/// Fit every scan of one day against the available field series.
///
/// Arguments
/// -----------------
/// * `scans`: the day's distribution scans, in any order.
/// * `mag_4hz`, `mag_6s`: field series to match against, either optional.
/// * `fitter`: the fit implementation.
/// * `params`: association tolerance and fit thresholds.
///
/// Return
/// ----------
/// * The fitted rows in strictly ascending epoch order, and the tally of
///   skipped scans.
pub fn fit_day(
    mut scans: Vec<IonScan>,
    mag_4hz: Option<&MagSeries>,
    mag_6s: Option<&MagSeries>,
    fitter: &dyn ScanFitter,
    params: &FitParams,
) -> (Vec<CoreFit>, FitTally) {
    scans.sort_by_key(|s| s.epoch);
    let before = scans.len();
    scans.dedup_by(|later, kept| later.epoch == kept.epoch);
    if scans.len() < before {
        log::warn!(
            "dropped {} duplicate scan epochs, first occurrence kept",
            before - scans.len()
        );
    }

    let mut tally = FitTally {
        scans: scans.len(),
        ..Default::default()
    };
    let mut rows = Vec::with_capacity(scans.len());

    for scan in &scans {
        let Some(field) = match_field(scan, mag_4hz, mag_6s, params) else {
            tally.unmatched += 1;
            log::debug!(
                "{}: no field vector within {:.1} s, scan skipped",
                scan.epoch,
                params.mag_tolerance_s
            );
            continue;
        };
        match fitter.fit_scan(scan, &field, params) {
            Ok(row) => rows.push(row),
            Err(failure) => {
                tally.fit_failures += 1;
                log::debug!("{}: fit rejected (code {}): {failure}", scan.epoch, failure.code());
            }
        }
    }

    (rows, tally)
}

/// Field sample for one scan: the nearest vector within tolerance, 4 Hz
/// series first, 6 s series as fallback.
pub fn match_field(
    scan: &IonScan,
    mag_4hz: Option<&MagSeries>,
    mag_6s: Option<&MagSeries>,
    params: &FitParams,
) -> Option<FieldSample> {
    let midpoint = scan.window_midpoint();
    [mag_4hz, mag_6s]
        .into_iter()
        .flatten()
        .find_map(|series| sample_series(series, midpoint, params.mag_tolerance_s))
}

/// Sample one series at `midpoint`, `None` when its nearest vector lies
/// outside the tolerance. The dispersion is taken over every vector inside
/// the tolerance window around the midpoint.
fn sample_series(series: &MagSeries, midpoint: Epoch, tolerance_s: f64) -> Option<FieldSample> {
    let nearest = series.nearest(midpoint)?;
    if (nearest.epoch - midpoint).abs() > Duration::from_seconds(tolerance_s) {
        return None;
    }
    let half = Duration::from_seconds(tolerance_s);
    let sigma = window_dispersion(series.window(midpoint - half, midpoint + half));
    Some(FieldSample {
        b: nearest.b,
        sigma,
        cadence: series.cadence,
    })
}
