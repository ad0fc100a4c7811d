//! Configuration loading and management
//!
//! Handles parsing of `.epc.toml` configuration files. Configuration is
//! always passed explicitly into constructors; there is no process-wide
//! global.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Config file name looked up at the project root
pub const CONFIG_FILE: &str = ".epc.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Similarity thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Similarity dimension weights
    #[serde(default)]
    pub weights: WeightConfig,

    /// Feature lock behavior
    #[serde(default)]
    pub lock: LockConfig,

    /// Issue tracker pacing
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            weights: WeightConfig::default(),
            lock: LockConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `<root>/.epc.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(Error::InvalidConfig(format!(
                "similarity weights must sum to 1.0, got {sum}"
            )));
        }
        for (name, value) in [
            ("thresholds.keep", self.thresholds.keep),
            ("thresholds.content", self.thresholds.content),
            ("thresholds.title", self.thresholds.title),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Similarity thresholds
///
/// The defaults are empirical constants inherited from the original tooling;
/// they are exposed here rather than hardcoded because their derivation is
/// undocumented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Composite score at or above which a matched record is kept as-is
    #[serde(default = "default_keep_threshold")]
    pub keep: f64,

    /// Content similarity at or above which records are considered a match
    #[serde(default = "default_content_threshold")]
    pub content: f64,

    /// Title similarity at or above which records are considered a match
    #[serde(default = "default_title_threshold")]
    pub title: f64,
}

fn default_keep_threshold() -> f64 {
    0.85
}

fn default_content_threshold() -> f64 {
    0.75
}

fn default_title_threshold() -> f64 {
    0.70
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            keep: default_keep_threshold(),
            content: default_content_threshold(),
            title: default_title_threshold(),
        }
    }
}

/// Weights for the five similarity dimensions; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default = "default_title_weight")]
    pub title: f64,

    #[serde(default = "default_features_weight")]
    pub features: f64,

    #[serde(default = "default_workflow_weight")]
    pub workflow: f64,

    #[serde(default = "default_deps_weight")]
    pub deps: f64,

    #[serde(default = "default_specs_weight")]
    pub specs: f64,
}

fn default_title_weight() -> f64 {
    0.30
}

fn default_features_weight() -> f64 {
    0.20
}

fn default_workflow_weight() -> f64 {
    0.20
}

fn default_deps_weight() -> f64 {
    0.15
}

fn default_specs_weight() -> f64 {
    0.15
}

impl WeightConfig {
    pub fn sum(&self) -> f64 {
        self.title + self.features + self.workflow + self.deps + self.specs
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            title: default_title_weight(),
            features: default_features_weight(),
            workflow: default_workflow_weight(),
            deps: default_deps_weight(),
            specs: default_specs_weight(),
        }
    }
}

/// Feature lock behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long to poll for a contended lock before giving up
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    /// Poll interval while waiting
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// Age after which a lock from a dead process may be reclaimed
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
}

fn default_wait_ms() -> u64 {
    10_000
}

fn default_poll_ms() -> u64 {
    250
}

fn default_stale_secs() -> u64 {
    300
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_wait_ms(),
            poll_ms: default_poll_ms(),
            stale_secs: default_stale_secs(),
        }
    }
}

/// Issue tracker pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum interval between tracker calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    500
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}
