//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a partial file (or none at all) yields the
//! stock game. The fee, bet unit and payout multiplier are constants in
//! `types` and deliberately not configurable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::storage::DEFAULT_STATE_FILE;
use crate::types::{DEFAULT_HISTORY_CAPACITY, DEFAULT_INITIAL_BALANCE};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub game: GameConfig,
    pub pacing: PacingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    /// Balance on first run and after a reset.
    pub initial_balance: u64,
    /// Upper bound for a single test run.
    pub max_test_rounds: u32,
    pub history_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            max_test_rounds: 100,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Delays between rounds, in milliseconds. Pacing never changes the order
/// or the arithmetic of rounds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacingConfig {
    pub test_interval_ms: u64,
    pub normal_interval_ms: u64,
    pub speed_interval_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            test_interval_ms: 500,
            normal_interval_ms: 800,
            speed_interval_ms: 200,
        }
    }
}

impl PacingConfig {
    /// No delays at all (tests, scripted runs).
    pub fn immediate() -> Self {
        Self {
            test_interval_ms: 0,
            normal_interval_ms: 0,
            speed_interval_ms: 0,
        }
    }

    pub fn test_interval(&self) -> Duration {
        Duration::from_millis(self.test_interval_ms)
    }

    /// Delay between batch rounds for the chosen profile.
    pub fn batch_interval(&self, speed_mode: bool) -> Duration {
        if speed_mode {
            Duration::from_millis(self.speed_interval_ms)
        } else {
            Duration::from_millis(self.normal_interval_ms)
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// When false, state lives in memory only for the process lifetime.
    pub enabled: bool,
    pub state_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_file: DEFAULT_STATE_FILE.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load configuration, falling back to defaults when the file is absent.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }
}
