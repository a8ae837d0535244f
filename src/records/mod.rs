pub mod dist_reader;
pub mod mag_reader;

use hifitime::{Duration, Epoch};
use itertools::Itertools;
use nalgebra::Vector3;

use crate::constants::{Au, Degree, Kms, Probe};

/// One bin of a 3D velocity-space distribution scan.
///
/// # Fields
///
/// * `az` - Azimuth sector index
/// * `el` - Elevation sector index
/// * `e_step` - Energy step index within the sweep (one step per second)
/// * `v` - Bin velocity in the spacecraft frame, km/s
/// * `counts` - Raw counts registered in the bin (negative values flag telemetry corruption)
/// * `pdf` - Phase-space density, s^3 m^-6
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityBin {
    pub az: u16,
    pub el: u16,
    pub e_step: u16,
    pub v: Vector3<Kms>,
    pub counts: i64,
    pub pdf: f64,
}

impl VelocityBin {
    /// Bin speed (norm of the velocity vector), km/s.
    pub fn speed(&self) -> Kms {
        self.v.norm()
    }
}

/// One raw ion distribution-function scan, immutable once loaded.
///
/// The epoch is the start of the energy sweep, read from the file name with
/// second precision. Header quantities come from the file body; velocity
/// bins are kept in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct IonScan {
    pub probe: Probe,
    pub epoch: Epoch,
    /// Ion analyzer id (1 = I1a, 2 = I3).
    pub instrument: u8,
    /// Heliocentric distance of the spacecraft, AU.
    pub r_sun: Au,
    /// Carrington longitude, degrees.
    pub clong: Degree,
    /// Carrington latitude, degrees.
    pub clat: Degree,
    /// Spacecraft radial speed, km/s (aberration correction term).
    pub vr: Kms,
    /// Spacecraft tangential speed, km/s (aberration correction term).
    pub vt: Kms,
    pub bins: Vec<VelocityBin>,
}

impl IonScan {
    /// Time interval actually covered by the energy sweep.
    ///
    /// Each energy step integrates for one second, so the scan spans from
    /// `epoch + min(e_step)` to `epoch + max(e_step) + 1` seconds.
    ///
    /// Return
    /// ------
    /// * `(start, end)` epochs of the sweep; for a scan without bins the
    ///   nominal one-second window at the scan epoch
    pub fn measurement_window(&self) -> (Epoch, Epoch) {
        let (min_step, max_step) = match self.bins.iter().map(|b| b.e_step).minmax() {
            itertools::MinMaxResult::NoElements => (0, 0),
            itertools::MinMaxResult::OneElement(s) => (s, s),
            itertools::MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };
        let start = self.epoch + Duration::from_seconds(min_step as f64);
        let end = self.epoch + Duration::from_seconds((max_step + 1) as f64);
        (start, end)
    }

    /// Midpoint of the measurement window, used for field association.
    pub fn window_midpoint(&self) -> Epoch {
        let (start, end) = self.measurement_window();
        start + (end - start) / 2
    }

    /// Number of distinct azimuth sectors covered by the scan.
    pub fn azimuth_bin_count(&self) -> usize {
        self.bins.iter().map(|b| b.az).unique().count()
    }

    /// Number of distinct elevation sectors covered by the scan.
    pub fn elevation_bin_count(&self) -> usize {
        self.bins.iter().map(|b| b.el).unique().count()
    }

    /// Bin holding the largest phase-space density, `None` for an empty scan.
    pub fn peak_bin(&self) -> Option<&VelocityBin> {
        self.bins.iter().max_by(|a, b| a.pdf.total_cmp(&b.pdf))
    }
}

/// Source cadence of a magnetic-field series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagCadence {
    FourHertz,
    SixSecond,
}

impl MagCadence {
    /// Instrument code stored in the `b_instrument` table column.
    pub fn code(&self) -> i32 {
        match self {
            MagCadence::FourHertz => 1,
            MagCadence::SixSecond => 2,
        }
    }
}

impl std::fmt::Display for MagCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MagCadence::FourHertz => write!(f, "4hz"),
            MagCadence::SixSecond => write!(f, "6s"),
        }
    }
}

/// One magnetic-field vector measurement, in nT.
#[derive(Debug, Clone, PartialEq)]
pub struct MagRecord {
    pub epoch: Epoch,
    pub b: Vector3<f64>,
}

/// A time-ascending sequence of field vectors from one instrument cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct MagSeries {
    pub cadence: MagCadence,
    records: Vec<MagRecord>,
}

impl MagSeries {
    /// Build a series, sorting the records by epoch.
    pub fn new(cadence: MagCadence, mut records: Vec<MagRecord>) -> Self {
        records.sort_by_key(|r| r.epoch);
        Self { cadence, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MagRecord] {
        &self.records
    }

    /// Record closest in time to `t`, `None` for an empty series.
    ///
    /// Binary search on the sorted epochs; ties resolve to the earlier
    /// record so repeated lookups are deterministic.
    pub fn nearest(&self, t: Epoch) -> Option<&MagRecord> {
        if self.records.is_empty() {
            return None;
        }
        let idx = self.records.partition_point(|r| r.epoch < t);
        let after = self.records.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.records.get(i));
        match (before, after) {
            (Some(b), Some(a)) => {
                if (t - b.epoch).abs() <= (a.epoch - t).abs() {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// Records with epochs inside `[start, end]` (inclusive bounds).
    pub fn window(&self, start: Epoch, end: Epoch) -> &[MagRecord] {
        let lo = self.records.partition_point(|r| r.epoch < start);
        let hi = self.records.partition_point(|r| r.epoch <= end);
        &self.records[lo..hi]
    }
}

#[cfg(test)]
mod records_test {
    use super::*;
    use crate::time::day_start;

    fn series_at(seconds: &[f64]) -> MagSeries {
        let t0 = day_start(1976, 92).unwrap();
        let records = seconds
            .iter()
            .map(|s| MagRecord {
                epoch: t0 + Duration::from_seconds(*s),
                b: Vector3::new(1.0, 0.0, 0.0),
            })
            .collect();
        MagSeries::new(MagCadence::FourHertz, records)
    }

    #[test]
    fn test_nearest() {
        let t0 = day_start(1976, 92).unwrap();
        let series = series_at(&[0.0, 10.0, 20.0]);

        let hit = series.nearest(t0 + Duration::from_seconds(12.0)).unwrap();
        assert_eq!((hit.epoch - t0).to_seconds(), 10.0);

        let hit = series.nearest(t0 + Duration::from_seconds(16.0)).unwrap();
        assert_eq!((hit.epoch - t0).to_seconds(), 20.0);

        // Ties resolve to the earlier record.
        let hit = series.nearest(t0 + Duration::from_seconds(15.0)).unwrap();
        assert_eq!((hit.epoch - t0).to_seconds(), 10.0);

        // Query outside the series clamps to the edges.
        let hit = series.nearest(t0 + Duration::from_seconds(500.0)).unwrap();
        assert_eq!((hit.epoch - t0).to_seconds(), 20.0);

        assert!(series_at(&[]).nearest(t0).is_none());
    }

    #[test]
    fn test_window() {
        let t0 = day_start(1976, 92).unwrap();
        let series = series_at(&[0.0, 10.0, 20.0, 30.0]);

        let hits = series.window(
            t0 + Duration::from_seconds(10.0),
            t0 + Duration::from_seconds(20.0),
        );
        assert_eq!(hits.len(), 2);

        let hits = series.window(
            t0 + Duration::from_seconds(31.0),
            t0 + Duration::from_seconds(60.0),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let t0 = day_start(1976, 92).unwrap();
        let series = series_at(&[20.0, 0.0, 10.0]);
        let epochs: Vec<f64> = series
            .records()
            .iter()
            .map(|r| (r.epoch - t0).to_seconds())
            .collect();
        assert_eq!(epochs, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn test_measurement_window() {
        let t0 = day_start(1976, 92).unwrap();
        let bin = |e_step: u16| VelocityBin {
            az: 0,
            el: 0,
            e_step,
            v: Vector3::new(300.0, 0.0, 0.0),
            counts: 10,
            pdf: 1e-12,
        };
        let scan = IonScan {
            probe: Probe::Helios1,
            epoch: t0,
            instrument: 1,
            r_sun: 0.4,
            clong: 100.0,
            clat: -2.0,
            vr: 30.0,
            vt: 10.0,
            bins: vec![bin(3), bin(7), bin(5)],
        };

        let (start, end) = scan.measurement_window();
        assert_eq!((start - t0).to_seconds(), 3.0);
        assert_eq!((end - t0).to_seconds(), 8.0);
        assert_eq!((scan.window_midpoint() - t0).to_seconds(), 5.5);
    }
}
