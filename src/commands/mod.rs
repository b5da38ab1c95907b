//! CLI subcommands

pub mod backtest;
pub mod compare;
pub mod download;
pub mod live;

use anyhow::Result;
use ote_breakout::Config;

/// Load the config file and apply the `--symbols` override
pub(crate) fn load_config(config_path: &str, symbols: Option<String>) -> Result<Config> {
    let mut config = Config::from_file(config_path)?;
    tracing::info!("Loaded configuration from: {}", config_path);

    if let Some(list) = symbols {
        config.trading.symbols = split_list(&list);
        tracing::info!("Overriding symbols to: {:?}", config.trading.symbols);
    }
    Ok(config)
}

/// Comma-separated CLI list
pub(crate) fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
