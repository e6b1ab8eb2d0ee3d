//! Enrollment tuning: sampler limits, aggregation parameters, and the
//! quality rubric weights. All fields default to the canonical values, so a
//! TOML file only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Weights and normalization scales of the composite quality score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub blur_weight: f32,
    /// Laplacian variance at which the blur metric saturates.
    pub blur_scale: f32,
    pub brightness_weight: f32,
    /// Mean intensity that scores full brightness marks.
    pub brightness_midpoint: f32,
    pub contrast_weight: f32,
    /// Intensity standard deviation at which the contrast metric saturates.
    pub contrast_scale: f32,
    pub size_weight: f32,
    /// Box area in pixels at which the size metric saturates.
    pub size_scale: f32,
    pub centered_weight: f32,
    /// Allowed center offset as a fraction of frame width/height.
    pub center_tolerance: f32,
    pub angle_weight: f32,
    /// Horizontal nose offset in pixels at which the angle metric reaches 0.
    pub angle_scale: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            blur_weight: 30.0,
            blur_scale: 100.0,
            brightness_weight: 20.0,
            brightness_midpoint: 128.0,
            contrast_weight: 15.0,
            contrast_scale: 50.0,
            size_weight: 20.0,
            size_scale: 40_000.0,
            centered_weight: 10.0,
            center_tolerance: 0.25,
            angle_weight: 5.0,
            angle_scale: 100.0,
        }
    }
}

/// Parameters of one enrollment session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Session completes once this many samples are accepted.
    pub max_samples: usize,
    /// Fewer accepted samples than this fails the enrollment.
    pub min_samples: usize,
    /// Composite score a candidate must reach to be accepted.
    pub min_quality: f32,
    /// Accepted samples per pose before advancing to the next pose.
    pub samples_per_pose: usize,
    /// Time the pose instruction is shown before samples are accepted.
    pub pose_delay_ms: u64,
    /// Number of best-quality samples passed to the outlier filter.
    pub top_k: usize,
    /// Cosine-similarity margin below the group mean that marks an outlier.
    pub outlier_margin: f32,
    pub weights: QualityWeights,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            max_samples: 15,
            min_samples: 8,
            min_quality: 70.0,
            samples_per_pose: 3,
            pose_delay_ms: 3_000,
            top_k: 12,
            outlier_margin: 0.15,
            weights: QualityWeights::default(),
        }
    }
}

impl EnrollmentConfig {
    pub fn pose_delay(&self) -> Duration {
        Duration::from_millis(self.pose_delay_ms)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&src)?;
        tracing::debug!(path = %path.display(), ?config, "loaded enrollment config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_samples == 0 {
            return Err(ConfigError::Invalid("max_samples must be positive".into()));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Invalid("min_samples must be positive".into()));
        }
        if self.min_samples > self.max_samples {
            return Err(ConfigError::Invalid(format!(
                "min_samples ({}) exceeds max_samples ({})",
                self.min_samples, self.max_samples
            )));
        }
        if self.samples_per_pose == 0 {
            return Err(ConfigError::Invalid("samples_per_pose must be positive".into()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".into()));
        }
        if !self.min_quality.is_finite() || self.min_quality < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "min_quality must be a non-negative number, got {}",
                self.min_quality
            )));
        }
        if !(0.0..=2.0).contains(&self.outlier_margin) {
            return Err(ConfigError::Invalid(format!(
                "outlier_margin must lie in [0, 2], got {}",
                self.outlier_margin
            )));
        }

        let w = &self.weights;
        for (name, scale) in [
            ("blur_scale", w.blur_scale),
            ("brightness_midpoint", w.brightness_midpoint),
            ("contrast_scale", w.contrast_scale),
            ("size_scale", w.size_scale),
            ("angle_scale", w.angle_scale),
        ] {
            if scale.is_nan() || scale <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {scale}")));
            }
        }
        Ok(())
    }
}
