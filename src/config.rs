//! Configuration management
//!
//! Loads the JSON configuration file. The `pipeline` section is kept as raw
//! JSON and resolved into a [`PipelineConfig`] (profile defaults plus
//! overrides) on demand, so CLI flags can patch it first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::{PipelineConfig, Profile};
use crate::Symbol;

/// Environment variable overriding the market-data base URL
pub const BINANCE_URL_ENV: &str = "OTE_BINANCE_URL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub live: LiveConfig,
    /// Profile name plus any per-threshold overrides
    #[serde(default = "default_pipeline")]
    pub pipeline: serde_json::Value,
}

fn default_pipeline() -> serde_json::Value {
    serde_json::json!({ "profile": "strict" })
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trading: TradingConfig::default(),
            data: DataConfig::default(),
            live: LiveConfig::default(),
            pipeline: default_pipeline(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // .env is optional
        dotenv::dotenv().ok();
        if let Ok(url) = std::env::var(BINANCE_URL_ENV) {
            config.data.binance_url = url;
        }

        Ok(config)
    }

    /// Resolve the pipeline section into a validated parameter set
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_value(&self.pipeline).context("Invalid pipeline section")
    }

    /// Same overrides applied on top of another profile's defaults
    pub fn pipeline_config_for(&self, profile: Profile) -> Result<PipelineConfig> {
        let mut section = self.pipeline.clone();
        if let Some(obj) = section.as_object_mut() {
            obj.insert("profile".to_string(), serde_json::json!(profile));
        } else {
            section = serde_json::json!({ "profile": profile });
        }
        PipelineConfig::from_value(&section)
            .with_context(|| format!("Invalid pipeline section for profile {}", profile))
    }

    /// Set the profile name in the pipeline section
    pub fn set_profile(&mut self, profile: Profile) {
        match self.pipeline.as_object_mut() {
            Some(obj) => {
                obj.insert("profile".to_string(), serde_json::json!(profile));
            }
            None => self.pipeline = serde_json::json!({ "profile": profile }),
        }
    }
}

/// Instruments and timeframes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    /// Decision timeframe
    pub fast_timeframe: String,
    /// Trend-context timeframe
    pub slow_timeframe: String,
    /// Bars requested per fetch in live mode
    pub fast_limit: usize,
    pub slow_limit: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            fast_timeframe: "15m".to_string(),
            slow_timeframe: "1h".to_string(),
            fast_limit: 500,
            slow_limit: 300,
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Where bars come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Csv,
    Binance,
}

impl std::str::FromStr for DataSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(DataSource::Csv),
            "binance" => Ok(DataSource::Binance),
            _ => anyhow::bail!("Unknown data source: {}. Valid options: csv, binance", s),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Csv => write!(f, "csv"),
            DataSource::Binance => write!(f, "binance"),
        }
    }
}

/// Data directories and source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    #[serde(default)]
    pub source: DataSource,
    #[serde(default = "default_binance_url")]
    pub binance_url: String,
}

fn default_binance_url() -> String {
    "https://api.binance.com/api/v3".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            source: DataSource::Csv,
            binance_url: default_binance_url(),
        }
    }
}

/// Live/paper loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Seconds between successful cycles
    pub interval_secs: u64,
    /// Seconds before retrying a failed cycle
    pub retry_secs: u64,
    #[serde(default)]
    pub paper: bool,
    /// Signal journal file, relative paths resolve against `results_dir`
    #[serde(default = "default_journal")]
    pub journal: PathBuf,
}

fn default_journal() -> PathBuf {
    PathBuf::from("signals.csv")
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            interval_secs: 900,
            retry_secs: 60,
            paper: false,
            journal: default_journal(),
        }
    }
}
