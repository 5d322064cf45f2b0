use crate::detector::{DEFAULT_MIN_NEIGHBORS, DEFAULT_MIN_SIZE, DEFAULT_SCALE_FACTOR};
use crate::lbph::LbphParams;
use crate::patch::DEFAULT_PATCH_SIZE;
use crate::recognizer::DEFAULT_CONFIDENCE_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SAMPLES_PER_PERSON: usize = 200;
pub const DEFAULT_MAX_FRAME_FAILURES: usize = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration: defaults, then an optional TOML file, then
/// `GLIMPSE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for samples, the model pair and the default cascade.
    pub data_dir: PathBuf,
    /// Enrollment target sample count.
    pub samples_per_person: usize,
    /// Maximum chi-square distance still counted as a match.
    pub confidence_threshold: f64,
    pub detector_scale_factor: f32,
    pub detector_min_neighbors: u32,
    /// Smallest window edge the detector evaluates, in pixels.
    pub detector_min_size: u32,
    /// Haar cascade JSON; defaults to `<data_dir>/cascade.json`.
    pub cascade_path: Option<PathBuf>,
    /// Canonical face patch edge length.
    pub patch_size: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Consecutive frame-source failures tolerated before giving up.
    pub max_frame_failures: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            samples_per_person: DEFAULT_SAMPLES_PER_PERSON,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            detector_scale_factor: DEFAULT_SCALE_FACTOR,
            detector_min_neighbors: DEFAULT_MIN_NEIGHBORS,
            detector_min_size: DEFAULT_MIN_SIZE,
            cascade_path: None,
            patch_size: DEFAULT_PATCH_SIZE,
            grid_x: LbphParams::default().grid_x,
            grid_y: LbphParams::default().grid_y,
            max_frame_failures: DEFAULT_MAX_FRAME_FAILURES,
        }
    }
}

impl Config {
    /// Defaults overlaid with `GLIMPSE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Read a TOML file (missing keys keep their defaults), then apply the
    /// environment on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.with_env())
    }

    fn with_env(self) -> Self {
        Self {
            data_dir: std::env::var("GLIMPSE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(self.data_dir),
            samples_per_person: env_parse("GLIMPSE_SAMPLES_PER_PERSON", self.samples_per_person),
            confidence_threshold: env_parse("GLIMPSE_CONFIDENCE_THRESHOLD", self.confidence_threshold),
            detector_scale_factor: env_parse("GLIMPSE_DETECTOR_SCALE_FACTOR", self.detector_scale_factor),
            detector_min_neighbors: env_parse("GLIMPSE_DETECTOR_MIN_NEIGHBORS", self.detector_min_neighbors),
            detector_min_size: env_parse("GLIMPSE_DETECTOR_MIN_SIZE", self.detector_min_size),
            cascade_path: std::env::var("GLIMPSE_CASCADE_PATH")
                .map(PathBuf::from)
                .ok()
                .or(self.cascade_path),
            patch_size: env_parse("GLIMPSE_PATCH_SIZE", self.patch_size),
            grid_x: env_parse("GLIMPSE_GRID_X", self.grid_x),
            grid_y: env_parse("GLIMPSE_GRID_Y", self.grid_y),
            max_frame_failures: env_parse("GLIMPSE_MAX_FRAME_FAILURES", self.max_frame_failures),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, reason: String| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { key, reason })
        };

        if self.samples_per_person == 0 {
            return invalid("samples_per_person", "must be at least 1".into());
        }
        if self.confidence_threshold.is_nan() || self.confidence_threshold < 0.0 {
            return invalid(
                "confidence_threshold",
                format!("must be a non-negative number, got {}", self.confidence_threshold),
            );
        }
        if self.detector_scale_factor.is_nan() || self.detector_scale_factor <= 1.0 {
            return invalid(
                "detector_scale_factor",
                format!("must be > 1.0, got {}", self.detector_scale_factor),
            );
        }
        if self.detector_min_neighbors < 1 {
            return invalid("detector_min_neighbors", "must be at least 1".into());
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return invalid("grid_x/grid_y", "must be at least 1".into());
        }
        let min_patch = self.lbph_params().min_patch_size();
        if !self.lbph_params().fits(self.patch_size) {
            return invalid(
                "patch_size",
                format!("must be at least {min_patch} for a {}x{} grid", self.grid_x, self.grid_y),
            );
        }
        Ok(())
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.data_dir.join("samples")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("model")
    }

    pub fn cascade_path(&self) -> PathBuf {
        self.cascade_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cascade.json"))
    }

    pub fn lbph_params(&self) -> LbphParams {
        LbphParams {
            grid_x: self.grid_x,
            grid_y: self.grid_y,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("glimpse")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
