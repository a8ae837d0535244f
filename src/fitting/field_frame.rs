//! # Field-aligned coordinate frame
//!
//! Rotation between the spacecraft frame and the magnetic-field-aligned
//! frame in which the bi-Maxwellian model is separable. The rotated frame
//! puts the field direction on the third axis, so `w_par` acts along `z'`
//! and `w_perp` in the `x'y'` plane. The dispersion statistic published as
//! `sigma_b` lives here as well.

use nalgebra::{Matrix3, Vector3};

use crate::records::MagRecord;

/// Field strengths below this are treated as no measurable field.
const MIN_FIELD_NORM: f64 = 1e-12;

/// Rotation matrix from the spacecraft frame to the field-aligned frame.
///
/// The rows are an orthonormal right-handed triad `(e1, e2, b_hat)` with
/// `e1 = normalize(z × b_hat)`, so `R * b == (0, 0, |b|)`. Velocities
/// rotate forward with `R * v` and back with `R.transpose() * v'`.
///
/// Arguments
/// -----------------
/// * `b`: magnetic-field vector in the spacecraft frame.
///
/// Return
/// ----------
/// * The rotation matrix, or the identity when the field vanishes or is
///   not finite. A field along `±z` uses `e1 = x` to keep the triad
///   well defined.
pub fn field_aligned_rotation(b: &Vector3<f64>) -> Matrix3<f64> {
    let norm = b.norm();
    if !norm.is_finite() || norm < MIN_FIELD_NORM {
        return Matrix3::identity();
    }
    let b_hat = b / norm;

    let cross = Vector3::z().cross(&b_hat);
    let e1 = if cross.norm() < MIN_FIELD_NORM {
        Vector3::x()
    } else {
        cross / cross.norm()
    };
    let e2 = b_hat.cross(&e1);

    Matrix3::from_rows(&[e1.transpose(), e2.transpose(), b_hat.transpose()])
}

/// Field variability over a window of measurements, published as `sigma_b`.
///
/// Computed as the norm of the component-wise population standard
/// deviation. A window holding fewer than two vectors has zero dispersion.
pub fn window_dispersion(records: &[MagRecord]) -> f64 {
    if records.len() < 2 {
        return 0.0;
    }
    let n = records.len() as f64;
    let mean: Vector3<f64> = records.iter().map(|r| r.b).sum::<Vector3<f64>>() / n;
    let var: Vector3<f64> = records
        .iter()
        .map(|r| {
            let d = r.b - mean;
            d.component_mul(&d)
        })
        .sum::<Vector3<f64>>()
        / n;
    (var.x + var.y + var.z).sqrt()
}
