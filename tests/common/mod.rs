#![allow(dead_code)]

use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::Vector3;

use corefit::dataset::TableRow;

/// Fresh scratch directory for one test, wiped up front so reruns start
/// clean.
pub fn scratch_dir(name: &str) -> Utf8PathBuf {
    let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .expect("temp dir is not UTF-8")
        .join(format!("corefit-test-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Write one file, creating parent directories.
pub fn write_file(path: &Utf8Path, content: &str) {
    let parent = path.parent().expect("file path has a parent");
    std::fs::create_dir_all(parent).expect("create parent dir");
    std::fs::write(path, content).expect("write test file");
}

const GRID_OFFSETS: [f64; 7] = [-96.0, -64.0, -32.0, 0.0, 32.0, 64.0, 96.0];

/// Scan file body sampled from an exact bi-Maxwellian around `bulk`, on a
/// 7x7x7 velocity grid centered there.
///
/// The distribution is built for a magnetic field along +z, so the
/// perpendicular plane is x-y and the written densities agree with any
/// field-aligned frame whose field points along z.
pub fn scan_body(
    bulk: Vector3<f64>,
    amplitude: f64,
    vth_perp: f64,
    vth_par: f64,
    vr: f64,
    vt: f64,
) -> String {
    let mut body = String::from("instrument 1\nr_sun 0.4173\nclong 152.30\nclat -3.10\n");
    writeln!(body, "vr {vr}").unwrap();
    writeln!(body, "vt {vt}").unwrap();
    body.push_str("az el e vx vy vz counts pdf\n");
    for (ix, dx) in GRID_OFFSETS.iter().enumerate() {
        for (iy, dy) in GRID_OFFSETS.iter().enumerate() {
            for dz in GRID_OFFSETS.iter() {
                let v = bulk + Vector3::new(*dx, *dy, *dz);
                let g = (dx / vth_perp).powi(2) + (dy / vth_perp).powi(2) + (dz / vth_par).powi(2);
                let e_step = ((v.norm() - 250.0) / 30.0).max(0.0) as u16;
                writeln!(
                    body,
                    "{ix} {iy} {e_step} {} {} {} 100 {:e}",
                    v.x,
                    v.y,
                    v.z,
                    amplitude * (-g).exp()
                )
                .unwrap();
            }
        }
    }
    body
}

/// Field file body: one `sec bx by bz` row per entry.
pub fn mag_body(rows: &[(f64, Vector3<f64>)]) -> String {
    let mut body = String::new();
    for (sec, b) in rows {
        writeln!(body, "{sec} {} {} {}", b.x, b.y, b.z).unwrap();
    }
    body
}

/// Bitwise float comparison so NaN columns compare equal across a
/// write/read cycle.
pub fn rows_equal(a: &TableRow, b: &TableRow) -> bool {
    fn feq(x: f64, y: f64) -> bool {
        x.to_bits() == y.to_bits()
    }
    a.status == b.status
        && a.ion_instrument == b.ion_instrument
        && a.b_instrument == b.b_instrument
        && feq(a.time_mjd, b.time_mjd)
        && feq(a.bx, b.bx)
        && feq(a.by, b.by)
        && feq(a.bz, b.bz)
        && feq(a.sigma_b, b.sigma_b)
        && feq(a.n_p, b.n_p)
        && feq(a.vp_x, b.vp_x)
        && feq(a.vp_y, b.vp_y)
        && feq(a.vp_z, b.vp_z)
        && feq(a.tp_par, b.tp_par)
        && feq(a.tp_perp, b.tp_perp)
        && feq(a.vth_p_par, b.vth_p_par)
        && feq(a.vth_p_perp, b.vth_p_perp)
        && feq(a.r_sun, b.r_sun)
        && feq(a.clat, b.clat)
        && feq(a.clong, b.clong)
}
