//! Configuration module for engine settings and rule definitions
//!
//! Configuration is a YAML file with a `settings` block and a list of pattern
//! `rules`. A missing file means the built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::rules::{PatternRuleConfig, RuleError, RuleSet};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "RULECHECK_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub settings: Settings,

    /// Pattern rule definitions, evaluated in this order
    #[serde(default = "default_rules")]
    pub rules: Vec<PatternRuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            rules: default_rules(),
        }
    }
}

impl Config {
    /// Compile the configured rules
    pub fn build_rules(&self) -> Result<RuleSet, ConfigError> {
        Ok(RuleSet::from_patterns(&self.rules)?)
    }
}

fn default_rules() -> Vec<PatternRuleConfig> {
    vec![PatternRuleConfig::uppercase_word()]
}

/// General engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Source tag stamped on every diagnostic; code actions only answer
    /// diagnostics carrying this tag
    #[serde(default = "default_source")]
    pub source: String,

    /// Evaluation budget per rule and run
    #[serde(default = "default_rule_timeout_ms")]
    pub rule_timeout_ms: u64,

    /// Offer no fix for diagnostics computed against an older version
    #[serde(default)]
    pub reject_stale_code_actions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: default_source(),
            rule_timeout_ms: default_rule_timeout_ms(),
            reject_stale_code_actions: false,
        }
    }
}

impl Settings {
    pub fn rule_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_timeout_ms)
    }
}

fn default_source() -> String {
    "rulecheck".to_string()
}

fn default_rule_timeout_ms() -> u64 {
    5000
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&content)
}

/// Parse configuration from YAML string
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut seen_ids = std::collections::HashSet::new();
    for rule in &config.rules {
        if !seen_ids.insert(&rule.id) {
            return Err(ConfigError::Invalid(format!("Duplicate rule ID: {}", rule.id)));
        }
    }

    if config.settings.source.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "Source tag must not be empty".to_string(),
        ));
    }

    if config.settings.rule_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "Rule timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Where the configuration file is looked up
pub fn config_path() -> Option<PathBuf> {
    config_path_with_env(std::env::var(CONFIG_ENV).ok(), dirs::home_dir())
}

fn config_path_with_env(explicit: Option<String>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".rulecheck").join("config.yaml")))
}

/// Load the configuration file if there is one, falling back to defaults
/// when it is missing or unusable.
pub fn load_or_default() -> Config {
    let Some(path) = config_path() else {
        tracing::info!("No config location available, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file at {}, using defaults", path.display());
        return Config::default();
    }

    match load_config(&path) {
        Ok(config) => {
            tracing::info!(
                "Loaded {} rules from {}",
                config.rules.len(),
                path.display()
            );
            config
        }
        Err(e) => {
            tracing::error!("Ignoring config {}: {}", path.display(), e);
            Config::default()
        }
    }
}
