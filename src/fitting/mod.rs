//! # Proton core fitting
//!
//! This module defines the [`FitParams`] configuration struct and its builder,
//! the per-scan outcome vocabulary ([`FitStatus`], [`FitFailure`]), the output
//! row type [`CoreFit`], and the [`ScanFitter`] capability implemented by the
//! production bi-Maxwellian fitter.
//!
//! ## Purpose
//!
//! [`FitParams`] centralizes every tunable threshold used while turning one
//! raw distribution scan into plasma parameters. It controls:
//!
//! - how a scan is associated with a magnetic-field vector (time tolerance),
//! - when the field is considered too variable to trust the anisotropy axes,
//! - which scans are rejected before fitting (point and angle minima),
//! - which fitted solutions are rejected afterwards (density and thermal
//!   speed plausibility),
//! - the least-squares iteration budget and convergence tolerance.
//!
//! ## Pipeline overview
//!
//! 1. **Field association**
//!    The driver picks the field vector nearest to the scan's measurement
//!    window midpoint, 4 Hz series first and 6 s series as fallback, and
//!    accepts it only within `mag_tolerance_s`. Scans without a match are
//!    skipped and counted, never written.
//!
//! 2. **Fit**
//!    The [`ScanFitter`] turns the scan and its [`FieldSample`] into a
//!    [`CoreFit`] row or a [`FitFailure`]. Failures are skipped and counted,
//!    never retried.
//!
//! 3. **Status**
//!    Successful rows carry [`FitStatus::Converged`] (code 1) or
//!    [`FitStatus::UnstableField`] (code 3) when the field dispersion
//!    exceeded `max_sigma_ratio` of the mean field strength; in the latter
//!    case density and thermal quantities are withheld as NaN and only the
//!    bulk velocity is kept.
//!
//! ## Example
//!
//! ```rust,no_run
//! use corefit::fitting::FitParams;
//!
//! let params = FitParams::builder()
//!     .mag_tolerance_s(10.0)
//!     .max_sigma_ratio(0.3)
//!     .lsq_max_iter(80)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## See also
//!
//! * [`bi_maxwellian::BiMaxwellianFitter`] – the production fitter
//! * [`driver::fit_day`] – per-day association and fit loop
pub mod bi_maxwellian;
pub mod driver;
pub mod field_frame;

use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

use hifitime::Epoch;
use nalgebra::Vector3;
use thiserror::Error;

use crate::constants::{Au, Degree, Kelvin, Kms, NanoTesla, PerCm3, K_BOLTZMANN, M_PROTON};
use crate::corefit_errors::CorefitError;
use crate::records::{IonScan, MagCadence};

/// Quality tag of a successful fit, stored in the `status` table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitStatus {
    /// Clean fit with a stable magnetic field.
    Converged,
    /// The field varied too much across the scan: the bulk velocity is kept
    /// but density and thermal quantities are withheld as NaN.
    UnstableField,
}

impl FitStatus {
    /// Historical dataset status code (1 = fitted, 3 = field too variable).
    pub fn code(&self) -> i32 {
        match self {
            FitStatus::Converged => 1,
            FitStatus::UnstableField => 3,
        }
    }
}

/// Why a scan produced no output row.
///
/// The discriminants keep the status-code vocabulary of the historical
/// dataset so operators can grep decades-old processing notes. Failed scans
/// are counted and logged, never written to tables.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitFailure {
    /// Code 4: the fitted bulk velocity left the measured velocity range.
    #[error("bulk velocity outside the measured velocity range")]
    VelocityOutOfBounds,

    /// Code 5: not enough usable bins for a 6-parameter fit.
    #[error("only {0} usable bins (minimum {1})")]
    TooFewPoints(usize, usize),

    /// Code 6: the least-squares iteration did not converge.
    #[error("least-squares fit did not converge")]
    NoConvergence,

    /// Code 9: negative counts flag overlapping particle populations.
    #[error("negative counts, more than one particle population in the scan")]
    MultiplePopulations,

    /// Code 10: the distribution peaks at the lowest measured energy step.
    #[error("distribution peak below the lowest measured energy step")]
    PeakNotCaptured,

    /// Code 11: fitted peak density implausible against the scan maximum.
    #[error("fitted peak phase-space density {0:.3e} implausible")]
    UnrealisticDensity(f64),

    /// Code 12: too few angular bins to constrain the anisotropy.
    #[error("only {0} angular bins (minimum {1})")]
    TooFewAngles(usize, usize),

    /// Code 13: fitted thermal speed below the physical floor.
    #[error("fitted thermal speed {0:.2} km/s below the physical floor")]
    UnrealisticTemperature(f64),
}

impl FitFailure {
    /// Historical dataset status code of this failure.
    pub fn code(&self) -> u8 {
        match self {
            FitFailure::VelocityOutOfBounds => 4,
            FitFailure::TooFewPoints(..) => 5,
            FitFailure::NoConvergence => 6,
            FitFailure::MultiplePopulations => 9,
            FitFailure::PeakNotCaptured => 10,
            FitFailure::UnrealisticDensity(_) => 11,
            FitFailure::TooFewAngles(..) => 12,
            FitFailure::UnrealisticTemperature(_) => 13,
        }
    }
}

/// The magnetic-field measurement matched to one scan.
///
/// # Fields
///
/// * `b` - The nearest field vector within tolerance, nT
/// * `sigma` - Norm of the component-wise standard deviation of all vectors
///   inside the tolerance window (0 when the window holds a single vector)
/// * `cadence` - Which instrument series the vector came from
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSample {
    pub b: Vector3<NanoTesla>,
    pub sigma: NanoTesla,
    pub cadence: MagCadence,
}

impl FieldSample {
    /// True when the field dispersion exceeds `max_sigma_ratio` of the
    /// field strength, i.e. the anisotropy axes cannot be trusted.
    pub fn is_unstable(&self, max_sigma_ratio: f64) -> bool {
        self.sigma > max_sigma_ratio * self.b.norm()
    }
}

/// One fitted output row, created by the fit driver and never mutated.
///
/// Velocities are in the spacecraft frame with the aberration correction
/// applied; thermal speeds and temperatures are NaN for
/// [`FitStatus::UnstableField`] rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreFit {
    pub epoch: Epoch,
    pub status: FitStatus,
    pub ion_instrument: u8,
    pub b_cadence: MagCadence,
    pub b: Vector3<NanoTesla>,
    pub sigma_b: NanoTesla,
    pub n_p: PerCm3,
    pub v_p: Vector3<Kms>,
    pub vth_par: Kms,
    pub vth_perp: Kms,
    pub t_par: Kelvin,
    pub t_perp: Kelvin,
    pub r_sun: Au,
    pub clat: Degree,
    pub clong: Degree,
}

/// Capability of turning one scan plus its field sample into a fitted row.
///
/// The production implementation is
/// [`bi_maxwellian::BiMaxwellianFitter`]; tests substitute deterministic
/// stubs to exercise the driver and writer without numerical fitting.
pub trait ScanFitter {
    fn fit_scan(
        &self,
        scan: &IonScan,
        field: &FieldSample,
        params: &FitParams,
    ) -> Result<CoreFit, FitFailure>;
}

/// Thermal speed (km/s) → temperature (K) for protons.
///
/// Uses the most-probable-speed convention `vth = sqrt(2 k_B T / m_p)`.
pub fn vth_to_kelvin(vth: Kms) -> Kelvin {
    M_PROTON * (vth * 1e3).powi(2) / (2.0 * K_BOLTZMANN)
}

/// Temperature (K) → proton thermal speed (km/s).
pub fn kelvin_to_vth(t: Kelvin) -> Kms {
    (2.0 * K_BOLTZMANN * t / M_PROTON).sqrt() / 1e3
}

/// Configuration parameters controlling field association and fitting.
///
/// Overview
/// -----------------
/// One scan flows through three gates, each controlled here:
///
/// 1) **Association** – the nearest field vector must lie within
///    `mag_tolerance_s` seconds of the scan window midpoint.
///
/// 2) **Pre-fit rejection** – scans with fewer than `min_points` bins,
///    fewer than `min_angle_bins` azimuth or elevation sectors, negative
///    counts, or a peak at the lowest energy step never reach the solver.
///
/// 3) **Post-fit plausibility** – the fitted amplitude must stay within
///    `[density_ratio_min, density_ratio_max]` of the scan's peak density,
///    thermal speeds must exceed `vth_floor_kms`, and the bulk velocity
///    must stay inside the measured velocity range.
///
/// Fields
/// -----------------
/// * `mag_tolerance_s` – maximum scan-to-field time distance (seconds).
/// * `max_sigma_ratio` – field dispersion over field strength above which
///   the fit is tagged [`FitStatus::UnstableField`].
/// * `min_points` – minimum usable bins (the model has 6 free parameters).
/// * `min_angle_bins` – minimum distinct azimuth and elevation sectors.
/// * `density_ratio_min`, `density_ratio_max` – plausibility window for the
///   fitted amplitude relative to the scan's peak phase-space density.
/// * `vth_floor_kms` – smallest credible thermal speed.
/// * `vth_guess_kms` – initial thermal-speed guess; the historical validity
///   window is 10 to 100 km/s.
/// * `lsq_max_iter`, `lsq_eps` – Levenberg-Marquardt iteration budget and
///   relative convergence tolerance.
///
/// Defaults
/// -----------------
/// * `mag_tolerance_s`: 20.0 (half the nominal 40.5 s scan cadence)
/// * `max_sigma_ratio`: 0.5
/// * `min_points`: 7
/// * `min_angle_bins`: 3
/// * `density_ratio_min`: 0.1
/// * `density_ratio_max`: 20.0
/// * `vth_floor_kms`: 5.0
/// * `vth_guess_kms`: 40.0
/// * `lsq_max_iter`: 50
/// * `lsq_eps`: 1e-8
#[derive(Debug, Clone)]
pub struct FitParams {
    pub mag_tolerance_s: f64,
    pub max_sigma_ratio: f64,
    pub min_points: usize,
    pub min_angle_bins: usize,
    pub density_ratio_min: f64,
    pub density_ratio_max: f64,
    pub vth_floor_kms: f64,
    pub vth_guess_kms: f64,
    pub lsq_max_iter: usize,
    pub lsq_eps: f64,
}

impl FitParams {
    /// Construct a new [`FitParams`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a [`FitParamsBuilder`] to override defaults with validation.
    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            mag_tolerance_s: 20.0,
            max_sigma_ratio: 0.5,
            min_points: 7,
            min_angle_bins: 3,
            density_ratio_min: 0.1,
            density_ratio_max: 20.0,
            vth_floor_kms: 5.0,
            vth_guess_kms: 40.0,
            lsq_max_iter: 50,
            lsq_eps: 1e-8,
        }
    }
}

/// Builder for [`FitParams`], with validation.
#[derive(Debug, Clone)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl Default for FitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FitParamsBuilder {
    /// Create a new builder initialized with default values.
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    pub fn mag_tolerance_s(mut self, v: f64) -> Self {
        self.params.mag_tolerance_s = v;
        self
    }
    pub fn max_sigma_ratio(mut self, v: f64) -> Self {
        self.params.max_sigma_ratio = v;
        self
    }
    pub fn min_points(mut self, v: usize) -> Self {
        self.params.min_points = v;
        self
    }
    pub fn min_angle_bins(mut self, v: usize) -> Self {
        self.params.min_angle_bins = v;
        self
    }
    pub fn density_ratio_min(mut self, v: f64) -> Self {
        self.params.density_ratio_min = v;
        self
    }
    pub fn density_ratio_max(mut self, v: f64) -> Self {
        self.params.density_ratio_max = v;
        self
    }
    pub fn vth_floor_kms(mut self, v: f64) -> Self {
        self.params.vth_floor_kms = v;
        self
    }
    pub fn vth_guess_kms(mut self, v: f64) -> Self {
        self.params.vth_guess_kms = v;
        self
    }
    pub fn lsq_max_iter(mut self, v: usize) -> Self {
        self.params.lsq_max_iter = v;
        self
    }
    pub fn lsq_eps(mut self, v: f64) -> Self {
        self.params.lsq_eps = v;
        self
    }

    // ---- Numeric helpers for PartialOrd (handle NaN as invalid) ----

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff a <= b and comparable (i.e., not NaN).
    #[inline]
    fn le(a: f64, b: f64) -> bool {
        matches!(a.partial_cmp(&b), Some(Less) | Some(Equal))
    }

    /// Finalize the builder and produce a [`FitParams`] instance.
    ///
    /// Validation rules
    /// -----------------
    /// * `mag_tolerance_s > 0`, `max_sigma_ratio > 0`, `lsq_eps > 0`.
    /// * `min_points >= 7` – the bi-Maxwellian model has 6 free parameters.
    /// * `min_angle_bins >= 1`, `lsq_max_iter >= 1`.
    /// * `0 < density_ratio_min <= density_ratio_max`.
    /// * `vth_floor_kms > 0`.
    /// * `10 <= vth_guess_kms <= 100` – the historical validity window for
    ///   thermal-speed guesses.
    ///
    /// Return
    /// ----------
    /// * `Ok(FitParams)` when all values are valid.
    /// * `Err(CorefitError::InvalidFitParameter)` otherwise.
    pub fn build(self) -> Result<FitParams, CorefitError> {
        let p = &self.params;

        if !Self::gt0(p.mag_tolerance_s) {
            return Err(CorefitError::InvalidFitParameter(
                "mag_tolerance_s must be > 0".into(),
            ));
        }
        if !Self::gt0(p.max_sigma_ratio) {
            return Err(CorefitError::InvalidFitParameter(
                "max_sigma_ratio must be > 0".into(),
            ));
        }
        if p.min_points < 7 {
            return Err(CorefitError::InvalidFitParameter(
                "min_points must be >= 7 (6 model parameters)".into(),
            ));
        }
        if p.min_angle_bins == 0 {
            return Err(CorefitError::InvalidFitParameter(
                "min_angle_bins must be >= 1".into(),
            ));
        }
        let ok_min = Self::gt0(p.density_ratio_min);
        let ok_max = Self::gt0(p.density_ratio_max);
        let ok_order = Self::le(p.density_ratio_min, p.density_ratio_max);
        if !(ok_min && ok_max && ok_order) {
            return Err(CorefitError::InvalidFitParameter(
                "require 0 < density_ratio_min <= density_ratio_max".into(),
            ));
        }
        if !Self::gt0(p.vth_floor_kms) {
            return Err(CorefitError::InvalidFitParameter(
                "vth_floor_kms must be > 0".into(),
            ));
        }
        if !(Self::le(10.0, p.vth_guess_kms) && Self::le(p.vth_guess_kms, 100.0)) {
            return Err(CorefitError::InvalidFitParameter(
                "vth_guess_kms must lie in [10, 100]".into(),
            ));
        }
        if p.lsq_max_iter == 0 {
            return Err(CorefitError::InvalidFitParameter(
                "lsq_max_iter must be >= 1".into(),
            ));
        }
        if !Self::gt0(p.lsq_eps) {
            return Err(CorefitError::InvalidFitParameter(
                "lsq_eps must be > 0".into(),
            ));
        }

        Ok(self.params)
    }
}

impl fmt::Display for FitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 40; // width reserved for "name = value"
            writeln!(f, "Proton Core Fit Parameters")?;
            writeln!(f, "--------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Field association]")?;
            line!(
                "mag_tolerance_s   = {:.1} s",
                self.mag_tolerance_s,
                "Max scan-to-field time distance"
            )?;
            line!(
                "max_sigma_ratio   = {:.2}",
                self.max_sigma_ratio,
                "Field dispersion over strength"
            )?;

            writeln!(f, "\n[Scan rejection]")?;
            line!(
                "min_points        = {}",
                self.min_points,
                "Minimum usable bins"
            )?;
            line!(
                "min_angle_bins    = {}",
                self.min_angle_bins,
                "Minimum azimuth/elevation sectors"
            )?;

            writeln!(f, "\n[Plausibility]")?;
            line!(
                "density_ratio_min = {:.2}",
                self.density_ratio_min,
                "Amplitude floor vs peak density"
            )?;
            line!(
                "density_ratio_max = {:.2}",
                self.density_ratio_max,
                "Amplitude cap vs peak density"
            )?;
            line!(
                "vth_floor_kms     = {:.1} km/s",
                self.vth_floor_kms,
                "Smallest credible thermal speed"
            )?;

            writeln!(f, "\n[Least squares]")?;
            line!(
                "vth_guess_kms     = {:.1} km/s",
                self.vth_guess_kms,
                "Initial thermal-speed guess"
            )?;
            line!(
                "lsq_max_iter      = {}",
                self.lsq_max_iter,
                "Iteration budget"
            )?;
            line!(
                "lsq_eps           = {:.1e}",
                self.lsq_eps,
                "Relative convergence tolerance"
            )?;

            Ok(())
        } else {
            write!(
                f,
                "FitParams(tol={:.1}s, sigma_ratio={:.2}, min_points={}, min_angles={}, density∈[{:.2},{:.1}]×peak, vth_floor={:.1}km/s, guess={:.1}km/s, lsq={}it/{:.0e})",
                self.mag_tolerance_s,
                self.max_sigma_ratio,
                self.min_points,
                self.min_angle_bins,
                self.density_ratio_min,
                self.density_ratio_max,
                self.vth_floor_kms,
                self.vth_guess_kms,
                self.lsq_max_iter,
                self.lsq_eps,
            )
        }
    }
}

#[cfg(test)]
mod fitting_params_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_build() {
        let params = FitParams::builder().build().unwrap();
        assert_eq!(params.min_points, 7);
        assert_relative_eq!(params.mag_tolerance_s, 20.0);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(FitParams::builder().mag_tolerance_s(0.0).build().is_err());
        assert!(FitParams::builder()
            .mag_tolerance_s(f64::NAN)
            .build()
            .is_err());
        assert!(FitParams::builder().min_points(5).build().is_err());
        assert!(FitParams::builder()
            .density_ratio_min(2.0)
            .density_ratio_max(1.0)
            .build()
            .is_err());
        assert!(FitParams::builder().vth_guess_kms(5.0).build().is_err());
        assert!(FitParams::builder().vth_guess_kms(150.0).build().is_err());
        assert!(FitParams::builder().lsq_max_iter(0).build().is_err());
        assert!(FitParams::builder().lsq_eps(-1.0).build().is_err());
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(FitFailure::VelocityOutOfBounds.code(), 4);
        assert_eq!(FitFailure::TooFewPoints(3, 7).code(), 5);
        assert_eq!(FitFailure::NoConvergence.code(), 6);
        assert_eq!(FitFailure::MultiplePopulations.code(), 9);
        assert_eq!(FitFailure::PeakNotCaptured.code(), 10);
        assert_eq!(FitFailure::UnrealisticDensity(1e-9).code(), 11);
        assert_eq!(FitFailure::TooFewAngles(2, 3).code(), 12);
        assert_eq!(FitFailure::UnrealisticTemperature(1.0).code(), 13);
        assert_eq!(FitStatus::Converged.code(), 1);
        assert_eq!(FitStatus::UnstableField.code(), 3);
    }

    #[test]
    fn test_vth_kelvin_round_trip() {
        let t = vth_to_kelvin(40.0);
        // 40 km/s corresponds to roughly 1e5 K protons.
        assert!(t > 9.0e4 && t < 1.1e5);
        assert_relative_eq!(kelvin_to_vth(t), 40.0, max_relative = 1e-12);
    }

    #[test]
    fn test_field_sample_stability() {
        let sample = FieldSample {
            b: Vector3::new(3.0, 4.0, 0.0),
            sigma: 1.0,
            cadence: MagCadence::FourHertz,
        };
        assert!(!sample.is_unstable(0.5));
        assert!(sample.is_unstable(0.1));
    }
}
