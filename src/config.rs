//! # Runtime configuration
//!
//! YAML configuration file describing where the Helios archive lives and
//! where fitted tables are written, plus optional overrides for the fit
//! thresholds.
//!
//! ## Resolution order
//!
//! 1. An explicit path (the `--config` command-line flag).
//! 2. The `COREFIT_CONFIG` environment variable.
//! 3. `$XDG_CONFIG_HOME/corefit/config.yml`, falling back to
//!    `$HOME/.config/corefit/config.yml`.
//!
//! After the file is parsed, `COREFIT_DATA_DIR` and `COREFIT_OUTPUT_DIR`
//! override the corresponding fields when set, so batch jobs can retarget
//! directories without editing the file.
//!
//! ## Example file
//!
//! ```yaml
//! data_dir: /data/helios
//! output_dir: /data/helios/corefit
//! fit:
//!   mag_tolerance_s: 10.0
//!   max_sigma_ratio: 0.3
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Deserialize;

use crate::corefit_errors::CorefitError;
use crate::fitting::{FitParams, FitParamsBuilder};

/// Optional overrides for [`FitParams`] read from the `fit:` section.
///
/// Absent keys keep their defaults; present keys go through the same
/// validation as programmatic builder calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FitOverrides {
    pub mag_tolerance_s: Option<f64>,
    pub max_sigma_ratio: Option<f64>,
    pub min_points: Option<usize>,
    pub min_angle_bins: Option<usize>,
    pub density_ratio_min: Option<f64>,
    pub density_ratio_max: Option<f64>,
    pub vth_floor_kms: Option<f64>,
    pub vth_guess_kms: Option<f64>,
    pub lsq_max_iter: Option<usize>,
    pub lsq_eps: Option<f64>,
}

impl FitOverrides {
    /// Apply the present keys on top of a builder.
    fn apply(&self, mut builder: FitParamsBuilder) -> FitParamsBuilder {
        if let Some(v) = self.mag_tolerance_s {
            builder = builder.mag_tolerance_s(v);
        }
        if let Some(v) = self.max_sigma_ratio {
            builder = builder.max_sigma_ratio(v);
        }
        if let Some(v) = self.min_points {
            builder = builder.min_points(v);
        }
        if let Some(v) = self.min_angle_bins {
            builder = builder.min_angle_bins(v);
        }
        if let Some(v) = self.density_ratio_min {
            builder = builder.density_ratio_min(v);
        }
        if let Some(v) = self.density_ratio_max {
            builder = builder.density_ratio_max(v);
        }
        if let Some(v) = self.vth_floor_kms {
            builder = builder.vth_floor_kms(v);
        }
        if let Some(v) = self.vth_guess_kms {
            builder = builder.vth_guess_kms(v);
        }
        if let Some(v) = self.lsq_max_iter {
            builder = builder.lsq_max_iter(v);
        }
        if let Some(v) = self.lsq_eps {
            builder = builder.lsq_eps(v);
        }
        builder
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the Helios archive tree (`helios1/`, `helios2/` below it).
    pub data_dir: Utf8PathBuf,
    /// Root under which fitted tables are written.
    pub output_dir: Utf8PathBuf,
    /// Optional fit threshold overrides.
    #[serde(default)]
    pub fit: FitOverrides,
}

impl Config {
    /// Read and parse one configuration file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, CorefitError> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    /// Resolve the configuration using the documented precedence, then
    /// apply environment overrides.
    ///
    /// Arguments
    /// -----------------
    /// * `explicit`: path given on the command line, highest precedence.
    ///
    /// Return
    /// ----------
    /// * The parsed [`Config`], or [`CorefitError::InvalidConfig`] when no
    ///   candidate file exists.
    pub fn locate(explicit: Option<&Utf8Path>) -> Result<Self, CorefitError> {
        let path = match explicit {
            Some(p) => p.to_owned(),
            None => match std::env::var("COREFIT_CONFIG") {
                Ok(env_path) if !env_path.is_empty() => Utf8PathBuf::from(env_path),
                _ => default_config_path().ok_or_else(|| {
                    CorefitError::InvalidConfig(
                        "no configuration found: pass --config, set COREFIT_CONFIG, \
                         or create ~/.config/corefit/config.yml"
                            .into(),
                    )
                })?,
            },
        };
        if !path.is_file() {
            return Err(CorefitError::InvalidConfig(format!(
                "configuration file {path} does not exist"
            )));
        }
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overwrite directories from `COREFIT_DATA_DIR` / `COREFIT_OUTPUT_DIR`.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("COREFIT_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Utf8PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("COREFIT_OUTPUT_DIR") {
            if !dir.is_empty() {
                self.output_dir = Utf8PathBuf::from(dir);
            }
        }
    }

    /// Check directories before any day is processed.
    ///
    /// A missing data directory or an uncreatable output directory aborts
    /// the whole batch up front rather than failing every day in turn.
    pub fn validate(&self) -> Result<(), CorefitError> {
        if !self.data_dir.is_dir() {
            return Err(CorefitError::InvalidConfig(format!(
                "data_dir {} is not a directory",
                self.data_dir
            )));
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CorefitError::InvalidConfig(format!(
                "cannot create output_dir {}: {e}",
                self.output_dir
            ))
        })?;
        Ok(())
    }

    /// Check the output tree before a convert pass.
    ///
    /// Conversion only reads finalized tables, so unlike [`Config::validate`]
    /// it never creates directories: an absent tree means there is nothing
    /// to convert.
    pub fn validate_output(&self) -> Result<(), CorefitError> {
        if !self.output_dir.is_dir() {
            return Err(CorefitError::InvalidConfig(format!(
                "output_dir {} is not a directory",
                self.output_dir
            )));
        }
        Ok(())
    }

    /// Final [`FitParams`], defaults overlaid with the `fit:` section.
    pub fn fit_params(&self) -> Result<FitParams, CorefitError> {
        self.fit.apply(FitParams::builder()).build()
    }
}

/// `<config dir>/corefit/config.yml` (`$XDG_CONFIG_HOME`, or the
/// `$HOME/.config` fallback, on Linux).
fn default_config_path() -> Option<Utf8PathBuf> {
    let base = BaseDirs::new()?;
    let config_dir = Utf8Path::from_path(base.config_dir())?;
    Some(config_dir.join("corefit").join("config.yml"))
}
