//! # Bi-Maxwellian core fitting
//!
//! The production [`ScanFitter`]: a six-parameter bi-Maxwellian fitted to
//! one distribution scan with a damped least-squares iteration, evaluated
//! in the magnetic-field-aligned frame.
//!
//! ## Model
//!
//! With `R` the rotation taking the spacecraft frame to the field-aligned
//! frame and `v' = R v`, every velocity bin is modeled as
//!
//! ```text
//! f(v') = A * exp(-[ ((vx'-ux)/w_perp)^2
//!                  + ((vy'-uy)/w_perp)^2
//!                  + ((vz'-uz)/w_par)^2 ])
//! ```
//!
//! The free parameters are the amplitude `A` (s^3 m^-6), the thermal speeds
//! `w_perp` and `w_par` (km/s) and the field-aligned bulk velocity
//! `(ux, uy, uz)` (km/s). The model is even in both thermal speeds, so
//! their absolute values are reported.
//!
//! ## Derived quantities
//!
//! The velocity-space integral of the model gives the number density
//! `n = A * pi^1.5 * w_perp^2 * w_par` (thermal speeds in m/s, converted to
//! cm^-3). Temperatures follow the most-probable-speed convention, and the
//! bulk velocity is rotated back to the spacecraft frame with the
//! aberration correction for the spacecraft's own motion applied.
//!
//! ## Rejection order
//!
//! Scans are rejected before fitting for negative counts, too few bins,
//! too few angular sectors, or a peak at the lowest measured energy step.
//! Fitted solutions are rejected afterwards for an implausible amplitude,
//! thermal speeds below the physical floor, or a bulk velocity outside the
//! measured velocity range, in that order. Rows fitted against a field
//! tagged unstable skip the amplitude and thermal-speed gates because those
//! quantities are withheld as NaN anyway.

use std::f64::consts::PI;

use nalgebra::{Matrix6, Vector3, Vector6};

use crate::fitting::field_frame::field_aligned_rotation;
use crate::fitting::{
    vth_to_kelvin, CoreFit, FieldSample, FitFailure, FitParams, FitStatus, ScanFitter,
};
use crate::records::IonScan;

/// Initial damping factor of the Levenberg-Marquardt iteration.
const LAMBDA_INIT: f64 = 1e-3;
/// Damping factor beyond which the step search gives up.
const LAMBDA_MAX: f64 = 1e12;
/// Floor keeping the damping factor from underflowing to zero.
const LAMBDA_MIN: f64 = 1e-12;

/// Stateless production fitter.
///
/// All tunables live in [`FitParams`]; the same fitter value serves any
/// number of scans and days.
#[derive(Debug, Default, Clone, Copy)]
pub struct BiMaxwellianFitter;

impl ScanFitter for BiMaxwellianFitter {
    fn fit_scan(
        &self,
        scan: &IonScan,
        field: &FieldSample,
        params: &FitParams,
    ) -> Result<CoreFit, FitFailure> {
        // --- Pre-fit gates on the raw scan
        if scan.bins.iter().any(|b| b.counts < 0) {
            return Err(FitFailure::MultiplePopulations);
        }
        if scan.bins.len() < params.min_points {
            return Err(FitFailure::TooFewPoints(scan.bins.len(), params.min_points));
        }
        let az_bins = scan.azimuth_bin_count();
        let el_bins = scan.elevation_bin_count();
        if az_bins < params.min_angle_bins || el_bins < params.min_angle_bins {
            return Err(FitFailure::TooFewAngles(
                az_bins.min(el_bins),
                params.min_angle_bins,
            ));
        }
        let Some(peak) = scan.peak_bin() else {
            return Err(FitFailure::TooFewPoints(0, params.min_points));
        };
        let lowest_step = scan.bins.iter().map(|b| b.e_step).min().unwrap_or(0);
        if peak.e_step == lowest_step {
            return Err(FitFailure::PeakNotCaptured);
        }
        let peak_pdf = peak.pdf;

        // --- Bin velocities in the field-aligned frame
        let rot = field_aligned_rotation(&field.b);
        let vels: Vec<Vector3<f64>> = scan.bins.iter().map(|b| rot * b.v).collect();
        let pdf: Vec<f64> = scan.bins.iter().map(|b| b.pdf).collect();

        // --- Initial guesses: peak amplitude, density-weighted bulk
        //     velocity, configured thermal speed
        let weight_sum: f64 = pdf.iter().sum();
        if !(weight_sum > 0.0) {
            // A scan with no positive density cannot seed the solver.
            return Err(FitFailure::NoConvergence);
        }
        let mut bulk0: Vector3<f64> = Vector3::zeros();
        for (v, w) in vels.iter().zip(&pdf) {
            bulk0 += v * *w;
        }
        bulk0 /= weight_sum;
        let start = Vector6::new(
            peak_pdf,
            params.vth_guess_kms,
            params.vth_guess_kms,
            bulk0.x,
            bulk0.y,
            bulk0.z,
        );

        let solution =
            levenberg_marquardt(&vels, &pdf, start, params).ok_or(FitFailure::NoConvergence)?;
        let amplitude = solution[0];
        // The model is even in both thermal speeds.
        let vth_perp = solution[1].abs();
        let vth_par = solution[2].abs();
        let bulk_fa = Vector3::new(solution[3], solution[4], solution[5]);

        // --- Post-fit plausibility, skipped when the field is too variable
        //     to trust the anisotropy split
        let unstable = field.is_unstable(params.max_sigma_ratio);
        if !unstable {
            if amplitude < params.density_ratio_min * peak_pdf
                || amplitude > params.density_ratio_max * peak_pdf
            {
                return Err(FitFailure::UnrealisticDensity(amplitude));
            }
            if vth_perp < params.vth_floor_kms || vth_par < params.vth_floor_kms {
                return Err(FitFailure::UnrealisticTemperature(vth_perp.min(vth_par)));
            }
        }

        // --- Bulk velocity back in the spacecraft frame, checked against
        //     the velocity range the instrument actually measured
        let bulk_sc = rot.transpose() * bulk_fa;
        for axis in 0..3 {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for bin in &scan.bins {
                lo = lo.min(bin.v[axis]);
                hi = hi.max(bin.v[axis]);
            }
            if bulk_sc[axis] < lo || bulk_sc[axis] > hi {
                return Err(FitFailure::VelocityOutOfBounds);
            }
        }
        let slowest = scan
            .bins
            .iter()
            .map(|b| b.speed())
            .fold(f64::INFINITY, f64::min);
        if bulk_sc.norm() < slowest {
            return Err(FitFailure::VelocityOutOfBounds);
        }

        // --- Plasma parameters from the fitted model
        let n_p = amplitude * PI.powf(1.5) * (vth_perp * 1e3).powi(2) * (vth_par * 1e3) * 1e-6;
        let t_par = vth_to_kelvin(vth_par);
        let t_perp = vth_to_kelvin(vth_perp);

        // Aberration correction for the spacecraft's radial and tangential
        // motion; the normal component is unaffected.
        let v_p = Vector3::new(bulk_sc.x + scan.vr, bulk_sc.y + scan.vt, bulk_sc.z);

        let (status, n_p, vth_par, vth_perp, t_par, t_perp) = if unstable {
            let nan = f64::NAN;
            (FitStatus::UnstableField, nan, nan, nan, nan, nan)
        } else {
            (FitStatus::Converged, n_p, vth_par, vth_perp, t_par, t_perp)
        };

        Ok(CoreFit {
            epoch: scan.epoch,
            status,
            ion_instrument: scan.instrument,
            b_cadence: field.cadence,
            b: field.b,
            sigma_b: field.sigma,
            n_p,
            v_p,
            vth_par,
            vth_perp,
            t_par,
            t_perp,
            r_sun: scan.r_sun,
            clat: scan.clat,
            clong: scan.clong,
        })
    }
}

/// Model phase-space density at one field-aligned velocity.
#[inline]
fn model(p: &Vector6<f64>, v: &Vector3<f64>) -> f64 {
    let dx = (v.x - p[3]) / p[1];
    let dy = (v.y - p[4]) / p[1];
    let dz = (v.z - p[5]) / p[2];
    p[0] * (-(dx * dx + dy * dy + dz * dz)).exp()
}

/// Partial derivatives of the model with respect to the six parameters.
#[inline]
fn jacobian_row(p: &Vector6<f64>, v: &Vector3<f64>) -> Vector6<f64> {
    let inv_perp = 1.0 / p[1];
    let inv_par = 1.0 / p[2];
    let dx = (v.x - p[3]) * inv_perp;
    let dy = (v.y - p[4]) * inv_perp;
    let dz = (v.z - p[5]) * inv_par;
    let shape = (-(dx * dx + dy * dy + dz * dz)).exp();
    let scaled = p[0] * shape;
    Vector6::new(
        shape,
        2.0 * scaled * (dx * dx + dy * dy) * inv_perp,
        2.0 * scaled * dz * dz * inv_par,
        2.0 * scaled * dx * inv_perp,
        2.0 * scaled * dy * inv_perp,
        2.0 * scaled * dz * inv_par,
    )
}

/// Sum of squared residuals of the model against the measured densities.
fn sum_sq(p: &Vector6<f64>, vels: &[Vector3<f64>], pdf: &[f64]) -> f64 {
    vels.iter()
        .zip(pdf)
        .map(|(v, &observed)| {
            let r = observed - model(p, v);
            r * r
        })
        .sum()
}

/// Levenberg-Marquardt minimization of the bi-Maxwellian residuals.
///
/// Normal equations are rebuilt from the analytic Jacobian after every
/// accepted step. The damping scales the diagonal of `JᵀJ` rather than
/// adding an absolute term, which keeps it meaningful across the twelve
/// orders of magnitude separating the amplitude from the velocity
/// parameters.
///
/// Arguments
/// -----------------
/// * `vels`: bin velocities in the field-aligned frame, km/s.
/// * `pdf`: measured phase-space densities, one per velocity.
/// * `start`: initial parameter vector `[A, w_perp, w_par, ux, uy, uz]`.
/// * `params`: iteration budget and convergence tolerance.
///
/// Return
/// ----------
/// * `Some(parameters)` on convergence, `None` when the iteration budget
///   runs out or the step search stalls away from a minimum.
fn levenberg_marquardt(
    vels: &[Vector3<f64>],
    pdf: &[f64],
    start: Vector6<f64>,
    params: &FitParams,
) -> Option<Vector6<f64>> {
    let mut p = start;
    let mut cost = sum_sq(&p, vels, pdf);
    if !cost.is_finite() {
        return None;
    }
    let mut lambda = LAMBDA_INIT;

    for _ in 0..params.lsq_max_iter {
        // --- Normal equations at the current parameters
        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();
        for (v, &observed) in vels.iter().zip(pdf) {
            let row = jacobian_row(&p, v);
            jtj += row * row.transpose();
            jtr += row * (observed - model(&p, v));
        }

        // --- Raise the damping until a step lowers the cost
        let mut accepted = false;
        while lambda <= LAMBDA_MAX {
            let mut damped = jtj;
            for k in 0..6 {
                damped[(k, k)] = jtj[(k, k)] * (1.0 + lambda);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let step = chol.solve(&jtr);
            let candidate = p + step;
            let new_cost = sum_sq(&candidate, vels, pdf);
            if new_cost.is_finite() && new_cost < cost {
                let rel_step = step.norm() / p.norm().max(f64::EPSILON);
                let rel_drop = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);
                p = candidate;
                cost = new_cost;
                lambda = (lambda * 0.1).max(LAMBDA_MIN);
                accepted = true;
                if rel_step <= params.lsq_eps || rel_drop <= params.lsq_eps {
                    return Some(p);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // No damping level improves the cost. At a minimum the undamped
            // step is negligible relative to the parameters; anything larger
            // means the solver is stuck.
            let implied_step = jtr.norm() / (jtj.norm() * p.norm()).max(f64::MIN_POSITIVE);
            return (implied_step <= params.lsq_eps.sqrt()).then_some(p);
        }
    }

    None
}

#[cfg(test)]
mod bi_maxwellian_test {
    use super::*;
    use crate::constants::Probe;
    use crate::records::{MagCadence, VelocityBin};
    use crate::time::day_start;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const GRID_OFFSETS: [f64; 7] = [-96.0, -64.0, -32.0, 0.0, 32.0, 64.0, 96.0];

    /// Scan sampled from an exact bi-Maxwellian around `bulk_sc`, on a
    /// velocity grid centered at `center` (both in the spacecraft frame).
    #[allow(clippy::too_many_arguments)]
    fn synthetic_scan(
        center: Vector3<f64>,
        bulk_sc: Vector3<f64>,
        amplitude: f64,
        vth_perp: f64,
        vth_par: f64,
        b: Vector3<f64>,
        vr: f64,
        vt: f64,
    ) -> IonScan {
        let rot = field_aligned_rotation(&b);
        let bulk_fa = rot * bulk_sc;
        let mut bins = Vec::new();
        for (ix, dx) in GRID_OFFSETS.iter().enumerate() {
            for (iy, dy) in GRID_OFFSETS.iter().enumerate() {
                for dz in GRID_OFFSETS.iter() {
                    let v = center + Vector3::new(*dx, *dy, *dz);
                    let v_fa = rot * v;
                    let g = Vector3::new(
                        (v_fa.x - bulk_fa.x) / vth_perp,
                        (v_fa.y - bulk_fa.y) / vth_perp,
                        (v_fa.z - bulk_fa.z) / vth_par,
                    );
                    bins.push(VelocityBin {
                        az: ix as u16,
                        el: iy as u16,
                        e_step: ((v.norm() - 250.0) / 30.0).max(0.0) as u16,
                        v,
                        counts: 100,
                        pdf: amplitude * (-g.norm_squared()).exp(),
                    });
                }
            }
        }
        IonScan {
            probe: Probe::Helios1,
            epoch: day_start(1976, 92).unwrap(),
            instrument: 1,
            r_sun: 0.41,
            clong: 117.5,
            clat: -3.2,
            vr,
            vt,
            bins,
        }
    }

    fn stable_field(b: Vector3<f64>) -> FieldSample {
        FieldSample {
            b,
            sigma: 0.05,
            cadence: MagCadence::FourHertz,
        }
    }

    #[test]
    fn test_recovers_synthetic_parameters() {
        let bulk = Vector3::new(-400.0, 20.0, 5.0);
        let b = Vector3::new(3.0, -2.0, 6.0);
        let scan = synthetic_scan(bulk, bulk, 3e-8, 28.0, 35.0, b, 30.0, 10.0);
        let params = FitParams::default();

        let row = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &params)
            .unwrap();

        assert_eq!(row.status, FitStatus::Converged);
        assert_eq!(row.ion_instrument, 1);
        assert_eq!(row.b_cadence, MagCadence::FourHertz);
        assert_relative_eq!(row.vth_perp, 28.0, max_relative = 1e-6);
        assert_relative_eq!(row.vth_par, 35.0, max_relative = 1e-6);

        // Bulk velocity with the aberration correction applied.
        assert_relative_eq!(row.v_p.x, -400.0 + 30.0, epsilon = 1e-3);
        assert_relative_eq!(row.v_p.y, 20.0 + 10.0, epsilon = 1e-3);
        assert_relative_eq!(row.v_p.z, 5.0, epsilon = 1e-3);

        let expected_n = 3e-8 * PI.powf(1.5) * 28.0e3_f64.powi(2) * 35.0e3 * 1e-6;
        assert_relative_eq!(row.n_p, expected_n, max_relative = 1e-6);
        assert_relative_eq!(row.t_par, vth_to_kelvin(row.vth_par), max_relative = 1e-12);
        assert_relative_eq!(row.t_perp, vth_to_kelvin(row.vth_perp), max_relative = 1e-12);

        // Scan header quantities pass through untouched.
        assert_relative_eq!(row.r_sun, 0.41);
        assert_relative_eq!(row.clat, -3.2);
        assert_relative_eq!(row.clong, 117.5);
        assert_relative_eq!(row.sigma_b, 0.05);
    }

    #[test]
    fn test_recovers_from_noisy_densities() {
        let bulk = Vector3::new(-380.0, 15.0, -8.0);
        let b = Vector3::new(2.0, 4.0, 3.0);
        let mut scan = synthetic_scan(bulk, bulk, 2e-8, 25.0, 40.0, b, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(42);
        for bin in &mut scan.bins {
            bin.pdf *= 1.0 + 0.01 * rng.gen_range(-1.0..1.0);
        }

        let row = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap();

        assert_relative_eq!(row.vth_perp, 25.0, max_relative = 0.05);
        assert_relative_eq!(row.vth_par, 40.0, max_relative = 0.05);
        assert_relative_eq!(row.v_p.x, -380.0, max_relative = 0.01);
    }

    #[test]
    fn test_unstable_field_masks_plasma_quantities() {
        let bulk = Vector3::new(-420.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 7.0);
        let scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 20.0, 5.0);
        let field = FieldSample {
            b,
            sigma: 5.0,
            cadence: MagCadence::SixSecond,
        };

        let row = BiMaxwellianFitter
            .fit_scan(&scan, &field, &FitParams::default())
            .unwrap();

        assert_eq!(row.status, FitStatus::UnstableField);
        assert_eq!(row.b_cadence, MagCadence::SixSecond);
        assert!(row.n_p.is_nan());
        assert!(row.vth_par.is_nan() && row.vth_perp.is_nan());
        assert!(row.t_par.is_nan() && row.t_perp.is_nan());
        // The bulk velocity survives the masking.
        assert_relative_eq!(row.v_p.x, -400.0, epsilon = 1e-3);
        assert_relative_eq!(row.sigma_b, 5.0);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let mut scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 0.0, 0.0);
        scan.bins[10].counts = -4;

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::MultiplePopulations);
        assert_eq!(err.code(), 9);
    }

    #[test]
    fn test_small_scan_rejected() {
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let mut scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 0.0, 0.0);
        scan.bins.truncate(5);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::TooFewPoints(5, 7));
        assert_eq!(err.code(), 5);
    }

    #[test]
    fn test_single_elevation_row_rejected() {
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let mut scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 0.0, 0.0);
        scan.bins.retain(|bin| bin.el == 3);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::TooFewAngles(1, 3));
        assert_eq!(err.code(), 12);
    }

    #[test]
    fn test_peak_at_lowest_energy_step_rejected() {
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let mut scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 0.0, 0.0);
        let lowest = scan.bins.iter().map(|b| b.e_step).min().unwrap();
        let idx = scan.bins.iter().position(|b| b.e_step == lowest).unwrap();
        // Far above every other bin, so the peak sits at the lowest step.
        scan.bins[idx].pdf = 1e-6;

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::PeakNotCaptured);
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_bulk_outside_measured_range_rejected() {
        // The true bulk sits 14 km/s beyond the fastest measured bin, close
        // enough that the amplitude stays plausible but outside the range.
        let center = Vector3::new(-400.0, 20.0, 5.0);
        let bulk = Vector3::new(-510.0, 20.0, 5.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let scan = synthetic_scan(center, bulk, 3e-8, 35.0, 35.0, b, 0.0, 0.0);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::VelocityOutOfBounds);
        assert_eq!(err.code(), 4);
    }

    #[test]
    fn test_density_window_rejects_implausible_amplitude() {
        // Window pinned above 1: an exact fit (ratio 1) must fail it.
        let params = FitParams::builder().density_ratio_min(2.0).build().unwrap();
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let scan = synthetic_scan(bulk, bulk, 3e-8, 30.0, 30.0, b, 0.0, 0.0);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &params)
            .unwrap_err();
        assert!(matches!(err, FitFailure::UnrealisticDensity(_)));
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_thermal_floor_rejects_cold_fit() {
        let params = FitParams::builder().vth_floor_kms(50.0).build().unwrap();
        let bulk = Vector3::new(-400.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 5.0);
        let scan = synthetic_scan(bulk, bulk, 3e-8, 28.0, 35.0, b, 0.0, 0.0);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &params)
            .unwrap_err();
        assert!(matches!(err, FitFailure::UnrealisticTemperature(_)));
        assert_eq!(err.code(), 13);
    }

    #[test]
    fn test_exhausted_budget_is_no_convergence() {
        let params = FitParams::builder().lsq_max_iter(1).build().unwrap();
        let bulk = Vector3::new(-400.0, 20.0, 5.0);
        let b = Vector3::new(3.0, -2.0, 6.0);
        let scan = synthetic_scan(bulk, bulk, 3e-8, 28.0, 35.0, b, 0.0, 0.0);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &params)
            .unwrap_err();
        assert_eq!(err, FitFailure::NoConvergence);
        assert_eq!(err.code(), 6);
    }

    #[test]
    fn test_zero_density_scan_is_no_convergence() {
        let bins = (0..8)
            .map(|i| VelocityBin {
                az: i as u16,
                el: i as u16,
                e_step: i as u16 + 1,
                v: Vector3::new(-300.0 - 10.0 * f64::from(i), 0.0, 0.0),
                counts: 5,
                pdf: 0.0,
            })
            .collect();
        let scan = IonScan {
            probe: Probe::Helios2,
            epoch: day_start(1976, 92).unwrap(),
            instrument: 2,
            r_sun: 0.3,
            clong: 10.0,
            clat: 0.0,
            vr: 0.0,
            vt: 0.0,
            bins,
        };
        let b = Vector3::new(0.0, 0.0, 5.0);

        let err = BiMaxwellianFitter
            .fit_scan(&scan, &stable_field(b), &FitParams::default())
            .unwrap_err();
        assert_eq!(err, FitFailure::NoConvergence);
    }
}
