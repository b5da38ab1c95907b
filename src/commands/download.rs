//! Download command - fetch fast and slow series from Binance into CSV files

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use ote_breakout::binance::{klines_to_candles, BinanceClient};
use ote_breakout::data::{csv_path, save_csv};
use ote_breakout::{Config, Symbol};

use super::split_list;

pub fn run(
    config_path: String,
    symbols: Option<String>,
    timeframes: Option<String>,
    days: u32,
    output: Option<String>,
) -> Result<()> {
    // a missing config file falls back to defaults, download needs none of it
    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default configuration: {:#}", e);
            Config::default()
        }
    };

    let symbols = symbols
        .map(|s| split_list(&s))
        .unwrap_or_else(|| config.trading.symbols.clone());
    let timeframes = timeframes.map(|s| split_list(&s)).unwrap_or_else(|| {
        vec![
            config.trading.fast_timeframe.clone(),
            config.trading.slow_timeframe.clone(),
        ]
    });
    let output = output
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data.data_dir.clone());

    info!("Starting data download from {}", config.data.binance_url);
    let client = BinanceClient::new(config.data.binance_url.clone())?;

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOADING HISTORICAL DATA FROM BINANCE");
    println!("{}", "=".repeat(60));
    println!("  Symbols:    {:?}", symbols);
    println!("  Timeframes: {:?}", timeframes);
    println!("  Days:       {}", days);
    println!("  Output:     {}", output.display());
    println!("{}\n", "=".repeat(60));

    let mut total_candles = 0;
    let mut success_count = 0;
    let mut total_downloads = 0;

    for symbol in symbols.iter().map(Symbol::new) {
        println!("\n{}:", symbol);
        for interval in &timeframes {
            total_downloads += 1;

            let result = client
                .fetch_full_history(symbol.as_str(), interval, days)
                .map(|klines| klines_to_candles(symbol.as_str(), klines))
                .and_then(|candles| {
                    save_csv(csv_path(&output, &symbol, interval), &candles)?;
                    Ok(candles.len())
                });

            match result {
                Ok(n) => {
                    println!("  {} {}: {} candles", symbol, interval, n);
                    total_candles += n;
                    success_count += 1;
                }
                Err(e) => {
                    warn!("Download failed for {} {}: {:#}", symbol, interval, e);
                    println!("  {} {}: failed ({})", symbol, interval, e);
                }
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOAD COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Successful: {}/{}", success_count, total_downloads);
    println!("  Total candles: {}", total_candles);
    println!("{}", "=".repeat(60));

    Ok(())
}
