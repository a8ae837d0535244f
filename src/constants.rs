//! # Constants and type definitions for corefit
//!
//! This module centralizes the **physical constants**, **unit conventions**, and **common type
//! definitions** used throughout the `corefit` library. It also defines the identifiers used to
//! address one day of mission data.
//!
//! ## Overview
//!
//! - Physical constants for plasma parameter derivation
//! - Core type aliases used across the crate
//! - Spacecraft identifiers ([`Probe`])
//! - The per-day addressing key ([`DayKey`])
//!
//! These definitions are used by all main modules, including the record loaders, the fit
//! driver, and the dataset writer.

use std::fmt;
use std::str::FromStr;

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// Proton rest mass in kilograms (CODATA 2014)
pub const M_PROTON: f64 = 1.672_621_9e-27;

/// Boltzmann constant in joules per kelvin (CODATA 2014)
pub const K_BOLTZMANN: f64 = 1.380_648_52e-23;

/// Number of seconds in a day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Nominal spacing between consecutive 3D distribution scans, in seconds.
///
/// One full energy sweep of the ion analyzers takes close to this long, so a
/// field vector further than about half a cadence from a scan belongs to a
/// different measurement.
pub const SCAN_CADENCE_S: f64 = 40.5;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Velocity in kilometers per second
pub type Kms = f64;
/// Magnetic field strength in nanotesla
pub type NanoTesla = f64;
/// Temperature in kelvin
pub type Kelvin = f64;
/// Number density in particles per cubic centimeter
pub type PerCm3 = f64;
/// Heliocentric distance in astronomical units
pub type Au = f64;

/// Modified Julian Date (days)
pub type MJD = f64;

// -------------------------------------------------------------------------------------------------
// Identifiers
// -------------------------------------------------------------------------------------------------

/// One of the two Helios spacecraft.
///
/// The probe number selects the `helios1/` or `helios2/` branch of the data
/// tree and the `h1`/`h2` prefix of every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Probe {
    Helios1,
    Helios2,
}

impl Probe {
    /// Spacecraft number as used in file and directory names (1 or 2).
    pub fn number(&self) -> u8 {
        match self {
            Probe::Helios1 => 1,
            Probe::Helios2 => 2,
        }
    }

    /// Both probes, in mission order.
    pub fn all() -> [Probe; 2] {
        [Probe::Helios1, Probe::Helios2]
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "helios{}", self.number())
    }
}

impl FromStr for Probe {
    type Err = String;

    /// Accepts `1`, `2`, `helios1` or `helios2` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "helios1" => Ok(Probe::Helios1),
            "2" | "helios2" => Ok(Probe::Helios2),
            other => Err(format!("unknown probe '{other}' (expected 1 or 2)")),
        }
    }
}

/// Identifier of one day of mission data: spacecraft, year and day of year.
///
/// All batch processing is keyed by `DayKey`: input discovery, per-day fit
/// outcomes and output table paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey {
    pub probe: Probe,
    pub year: i32,
    pub doy: u16,
}

impl DayKey {
    pub fn new(probe: Probe, year: i32, doy: u16) -> Self {
        Self { probe, year, doy }
    }

    /// Two-digit year as used in file names (`1976` → `76`).
    pub fn short_year(&self) -> i32 {
        self.year % 100
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{} {}-{:03}", self.probe.number(), self.year, self.doy)
    }
}
