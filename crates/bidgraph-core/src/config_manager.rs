use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::propagation::BreakerLimits;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for the assessment engine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    /// Event substrate: breaker thresholds and debounce windows
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Assessment tolerances and retry budgets
    #[serde(default)]
    pub assessment: AssessmentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationConfig {
    /// Listener invocations allowed per (topic, requester) before the breaker trips
    #[serde(default = "default_trigger_threshold")]
    pub trigger_threshold: u32,

    /// Lower threshold for bid-class topics, which fan out to every line item
    #[serde(default = "default_bid_trigger_threshold")]
    pub bid_trigger_threshold: u32,

    /// Delay applied to every "recompute me when a dependency changed" edge
    #[serde(default = "default_dependency_delay_ms")]
    pub dependency_delay_ms: u64,

    /// Quiet period before the bid announces it has settled
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Upper bound on deliveries processed by one drain
    #[serde(default = "default_max_drain_steps")]
    pub max_drain_steps: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: default_trigger_threshold(),
            bid_trigger_threshold: default_bid_trigger_threshold(),
            dependency_delay_ms: default_dependency_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            max_drain_steps: default_max_drain_steps(),
        }
    }
}

impl PropagationConfig {
    pub fn breaker_limits(&self) -> BreakerLimits {
        BreakerLimits {
            ordinary: self.trigger_threshold,
            bid_class: self.bid_trigger_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentConfig {
    /// Reassessment attempts before non-convergence is reported
    #[serde(default = "default_max_reassess_attempts")]
    pub max_reassess_attempts: u32,

    /// Decimal places used to decide whether a value moved
    #[serde(default = "default_compare_decimals")]
    pub compare_decimals: u32,

    /// Fractional widening applied to each prediction model's bounds window
    #[serde(default = "default_prediction_bounds_tolerance")]
    pub prediction_bounds_tolerance: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            max_reassess_attempts: default_max_reassess_attempts(),
            compare_decimals: default_compare_decimals(),
            prediction_bounds_tolerance: default_prediction_bounds_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_trigger_threshold() -> u32 {
    25
}
fn default_bid_trigger_threshold() -> u32 {
    10
}
fn default_dependency_delay_ms() -> u64 {
    5
}
fn default_settle_delay_ms() -> u64 {
    150
}
fn default_max_drain_steps() -> usize {
    100_000
}
fn default_max_reassess_attempts() -> u32 {
    10
}
fn default_compare_decimals() -> u32 {
    crate::types::COMPARE_DECIMALS
}
fn default_prediction_bounds_tolerance() -> f64 {
    0.15
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with defaults, file discovery and env overrides
pub struct ConfigManager {
    config: EngineConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (BIDGRAPH_*)
    /// 2. Config file (explicit path, ./.bidgraph.toml, ~/.bidgraph/config.toml)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, config_path) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!("Loaded engine configuration from {}", path.display()),
            None => info!("No config file found, using engine defaults"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    /// Search order:
    /// 1. ./.bidgraph.toml
    /// 2. ~/.bidgraph/config.toml
    /// 3. defaults
    fn load_config_file() -> Result<(EngineConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".bidgraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bidgraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((EngineConfig::default(), None))
    }

    pub fn read_toml_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = parsed("BIDGRAPH_TRIGGER_THRESHOLD") {
            config.propagation.trigger_threshold = v;
        }
        if let Some(v) = parsed("BIDGRAPH_BID_TRIGGER_THRESHOLD") {
            config.propagation.bid_trigger_threshold = v;
        }
        if let Some(v) = parsed("BIDGRAPH_DEPENDENCY_DELAY_MS") {
            config.propagation.dependency_delay_ms = v;
        }
        if let Some(v) = parsed("BIDGRAPH_SETTLE_DELAY_MS") {
            config.propagation.settle_delay_ms = v;
        }
        if let Some(v) = parsed("BIDGRAPH_MAX_REASSESS_ATTEMPTS") {
            config.assessment.max_reassess_attempts = v;
        }

        // Logging
        if let Ok(level) = std::env::var("BIDGRAPH_LOG") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("BIDGRAPH_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
        let p = &config.propagation;
        if p.trigger_threshold == 0 || p.bid_trigger_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "trigger thresholds must be greater than zero".to_string(),
            ));
        }
        if p.bid_trigger_threshold > p.trigger_threshold {
            return Err(ConfigError::ValidationError(format!(
                "bid_trigger_threshold ({}) must not exceed trigger_threshold ({})",
                p.bid_trigger_threshold, p.trigger_threshold
            )));
        }
        if p.settle_delay_ms <= p.dependency_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "settle_delay_ms ({}) must be longer than dependency_delay_ms ({})",
                p.settle_delay_ms, p.dependency_delay_ms
            )));
        }
        if p.max_drain_steps == 0 {
            return Err(ConfigError::ValidationError(
                "max_drain_steps must be greater than zero".to_string(),
            ));
        }

        let a = &config.assessment;
        if a.max_reassess_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_reassess_attempts must be greater than zero".to_string(),
            ));
        }
        if !(1..=12).contains(&a.compare_decimals) {
            return Err(ConfigError::ValidationError(format!(
                "compare_decimals must be 1..=12, got {}",
                a.compare_decimals
            )));
        }
        if !(0.0..=1.0).contains(&a.prediction_bounds_tolerance) {
            return Err(ConfigError::ValidationError(format!(
                "prediction_bounds_tolerance must be within 0..=1, got {}",
                a.prediction_bounds_tolerance
            )));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_config(self) -> EngineConfig {
        self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = EngineConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
