use hadir_core::{ConfigError, EnrollmentConfig};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite identity database.
    pub db_path: PathBuf,
    /// Optional TOML file with enrollment tuning.
    pub config_path: Option<PathBuf>,
    /// Overrides applied on top of the TOML file (or defaults).
    pub min_quality: Option<f32>,
    pub max_samples: Option<usize>,
    pub min_samples: Option<usize>,
    pub pose_delay_ms: Option<u64>,
}

impl Config {
    /// Load configuration from `HADIR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hadir");

        let db_path = var("HADIR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("embeddings.db"));

        Self {
            db_path,
            config_path: var("HADIR_CONFIG").map(PathBuf::from),
            min_quality: parse_var(&var, "HADIR_MIN_QUALITY"),
            max_samples: parse_var(&var, "HADIR_MAX_SAMPLES"),
            min_samples: parse_var(&var, "HADIR_MIN_SAMPLES"),
            pose_delay_ms: parse_var(&var, "HADIR_POSE_DELAY_MS"),
        }
    }

    /// Enrollment parameters: TOML file if configured, then env overrides.
    pub fn enrollment(&self) -> Result<EnrollmentConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => EnrollmentConfig::load(path)?,
            None => EnrollmentConfig::default(),
        };
        if let Some(v) = self.min_quality {
            config.min_quality = v;
        }
        if let Some(v) = self.max_samples {
            config.max_samples = v;
        }
        if let Some(v) = self.min_samples {
            config.min_samples = v;
        }
        if let Some(v) = self.pose_delay_ms {
            config.pose_delay_ms = v;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parsed value of `key`; unset or unparsable values are ignored.
fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
