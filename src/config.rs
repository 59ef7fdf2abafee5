use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ScoringWeights;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

/// Snapshot file locations
#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_properties_path")]
    pub properties_path: PathBuf,
    #[serde(default = "default_demands_path")]
    pub demands_path: PathBuf,
    /// Durable match snapshot; matches live in memory only when unset
    pub matches_path: Option<PathBuf>,
    /// Reload period for the property and demand snapshots, 0 disables
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            properties_path: default_properties_path(),
            demands_path: default_demands_path(),
            matches_path: None,
            refresh_secs: default_refresh_secs(),
        }
    }
}

fn default_properties_path() -> PathBuf { PathBuf::from("data/properties.json") }
fn default_demands_path() -> PathBuf { PathBuf::from("data/demands.json") }
fn default_refresh_secs() -> u64 { 300 }

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            auto_start: default_auto_start(),
            min_score: default_min_score(),
        }
    }
}

fn default_interval_minutes() -> u64 { crate::core::scheduler::DEFAULT_INTERVAL_MINUTES }
fn default_auto_start() -> bool { true }
fn default_min_score() -> u8 { crate::core::matcher::DEFAULT_MIN_SCORE }

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSettings {
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default = "default_near_miss_tolerance")]
    pub near_miss_tolerance: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            weights: WeightsConfig::default(),
            near_miss_tolerance: default_near_miss_tolerance(),
        }
    }
}

fn default_near_miss_tolerance() -> f64 { crate::core::scoring::DEFAULT_NEAR_MISS_TOLERANCE }

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_location_weight")]
    pub location: f64,
    #[serde(default = "default_budget_weight")]
    pub budget: f64,
    #[serde(default = "default_property_type_weight")]
    pub property_type: f64,
    #[serde(default = "default_bedrooms_weight")]
    pub bedrooms: f64,
    #[serde(default = "default_surface_weight")]
    pub surface: f64,
    #[serde(default = "default_amenities_weight")]
    pub amenities: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            location: default_location_weight(),
            budget: default_budget_weight(),
            property_type: default_property_type_weight(),
            bedrooms: default_bedrooms_weight(),
            surface: default_surface_weight(),
            amenities: default_amenities_weight(),
        }
    }
}

impl From<&WeightsConfig> for ScoringWeights {
    fn from(w: &WeightsConfig) -> Self {
        Self {
            location: w.location,
            budget: w.budget,
            property_type: w.property_type,
            bedrooms: w.bedrooms,
            surface: w.surface,
            amenities: w.amenities,
        }
    }
}

fn default_location_weight() -> f64 { 0.30 }
fn default_budget_weight() -> f64 { 0.30 }
fn default_property_type_weight() -> f64 { 0.15 }
fn default_bedrooms_weight() -> f64 { 0.10 }
fn default_surface_weight() -> f64 { 0.05 }
fn default_amenities_weight() -> f64 { 0.10 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with IMMO__)
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., IMMO__MATCHING__INTERVAL_MINUTES -> matching.interval_minutes
            .add_source(env_source())
            .build()?;

        settings = substitute_env_vars(settings)?;

        settings.try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?;

        substitute_env_vars(settings)?.try_deserialize()
    }

    pub fn scoring_weights(&self) -> ScoringWeights {
        ScoringWeights::from(&self.scoring.weights)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("IMMO")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Apply the plain data-location variables on top of the layered config
fn substitute_env_vars(settings: Config) -> Result<Config, ConfigError> {
    use std::env;

    let mut builder = Config::builder().add_source(settings);

    for (var, key) in [
        ("PROPERTIES_PATH", "data.properties_path"),
        ("DEMANDS_PATH", "data.demands_path"),
        ("MATCHES_PATH", "data.matches_path"),
    ] {
        if let Ok(value) = env::var(var) {
            if !value.trim().is_empty() {
                builder = builder.set_override(key, value)?;
            }
        }
    }

    builder.build()
}
