use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::warn;

use crate::cache::CacheBackend;
use crate::pricing::PricingTable;
use crate::recorder::{DayBoundary, RecorderSettings, DEFAULT_RETENTION_SECS};

fn default_enabled() -> bool {
    true
}

fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default)]
    pub day_boundary: DayBoundary,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pricing: PricingTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_secs: DEFAULT_RETENTION_SECS,
            day_boundary: DayBoundary::default(),
            cache: CacheConfig::default(),
            pricing: PricingTable::default(),
        }
    }
}

impl Config {
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            enabled: self.enabled,
            retention: Duration::from_secs(self.retention_secs),
            day_boundary: self.day_boundary,
        }
    }

    /// `AICOST_ENABLED=0|false|off` disables recording regardless of the file.
    fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("AICOST_ENABLED") {
            self.enabled = parse_flag(&v).unwrap_or(self.enabled);
        }
        self
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "aicost").map(|d| d.config_dir().join("config.toml"))
}

pub fn parse_config(data: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(data)
}

/// Read the config file at `path` (or the default location). A missing
/// file yields defaults; an invalid one is reported and ignored.
pub fn load_config(path: Option<&Path>) -> Config {
    let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(p) => p,
        None => return Config::default().apply_env(),
    };

    let Ok(data) = fs::read_to_string(&path) else {
        return Config::default().apply_env();
    };

    let config = match parse_config(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Config::default()
        }
    };
    config.apply_env()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::PricingResolver;

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse_config("").unwrap();
        assert!(c.enabled);
        assert_eq!(c.retention_secs, 7_776_000);
        assert_eq!(c.day_boundary, DayBoundary::Utc);
        assert_eq!(c.cache.backend, CacheBackend::File);
        assert!(c.pricing.is_empty());
    }

    #[test]
    fn full_file() {
        let c = parse_config(
            r#"
            enabled = false
            retention_secs = 86400
            day_boundary = "local"

            [cache]
            backend = "memory"

            [pricing.openai.gpt-4o-mini]
            input_per_1k = 0.00015
            output_per_1k = 0.0006
            "#,
        )
        .unwrap();
        assert!(!c.enabled);
        assert_eq!(c.recorder_settings().retention, Duration::from_secs(86400));
        assert_eq!(c.day_boundary, DayBoundary::Local);
        assert_eq!(c.cache.backend, CacheBackend::Memory);
        assert!(c.pricing.resolve("openai", "gpt-4o-mini").is_some());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = load_config(Some(&dir.path().join("nope.toml")));
        assert_eq!(c.retention_secs, DEFAULT_RETENTION_SECS);
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag(" FALSE "), Some(false));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("maybe"), None);
    }
}
