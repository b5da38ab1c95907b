//! OTE breakout signals - main entry point
//!
//! This binary provides four subcommands:
//! - backtest: Run the pipeline over stored bars
//! - compare: A/B comparison of parameter profiles
//! - live: Periodic signal loop (optionally paper trading)
//! - download: Download historical bars from Binance

use anyhow::Result;
use clap::{Parser, Subcommand};
use ote_breakout::Profile;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

const DEFAULT_CONFIG: &str = "configs/default.json";

#[derive(Parser, Debug)]
#[command(name = "ote-breakout")]
#[command(about = "Multi-timeframe breakout signals with OTE retracement entries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backtest one profile over stored bars
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Profile name (strict|loose), overrides config file
        #[arg(short, long)]
        profile: Option<Profile>,

        /// Symbols to test (comma-separated), overrides config file
        #[arg(short, long)]
        symbols: Option<String>,
    },

    /// Compare profiles across every symbol
    Compare {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Profiles to compare (comma-separated). Default: all
        #[arg(short, long)]
        profiles: Option<String>,

        /// Symbols to test (comma-separated), overrides config file
        #[arg(short, long)]
        symbols: Option<String>,
    },

    /// Run the periodic signal loop
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Paper trading mode (simulated positions)
        #[arg(long)]
        paper: bool,

        /// Cycle interval in seconds, overrides config file
        #[arg(long)]
        interval: Option<u64>,

        /// Profile name (strict|loose), overrides config file
        #[arg(short, long)]
        profile: Option<Profile>,

        /// Symbols (comma-separated), overrides config file
        #[arg(short, long)]
        symbols: Option<String>,
    },

    /// Download historical bars from Binance
    Download {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Symbols to download (comma-separated). Default: config symbols
        #[arg(short, long)]
        symbols: Option<String>,

        /// Timeframes (comma-separated). Default: config fast and slow timeframes
        #[arg(short, long)]
        timeframes: Option<String>,

        /// Number of days of history to fetch
        #[arg(short, long, default_value = "90")]
        days: u32,

        /// Output directory. Default: config data_dir
        #[arg(short, long)]
        output: Option<String>,
    },
}

const LOG_DIR: &str = "logs";

/// Dependencies whose debug output drowns the pipeline's own
const QUIET_TARGETS: [&str; 5] = ["hyper", "hyper_util", "reqwest", "rustls", "h2"];

/// Log destination of one invocation
struct LogTarget {
    command: &'static str,
    /// Profile (or profile list) the run is about, part of the file name
    tag: Option<String>,
    /// `compare` draws a progress bar, so it logs to the file only
    console: bool,
}

impl LogTarget {
    fn for_command(command: &Commands) -> Self {
        let (command, tag, console) = match command {
            Commands::Backtest { profile, .. } => {
                ("backtest", profile.map(|p| p.as_str().to_string()), true)
            }
            Commands::Compare { profiles, .. } => {
                ("compare", profiles.as_ref().map(|p| p.replace(',', "-")), false)
            }
            Commands::Live { profile, paper, .. } => {
                let mut tag = profile.map(|p| p.as_str().to_string());
                if *paper {
                    tag = Some(tag.map_or("paper".to_string(), |t| format!("{t}-paper")));
                }
                ("live", tag, true)
            }
            Commands::Download { .. } => ("download", None, true),
        };
        Self {
            command,
            tag,
            console,
        }
    }

    /// `{command}[_{tag}]_{local time}.log`
    fn file_name(&self) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        match &self.tag {
            Some(tag) => format!("{}_{}_{}.log", self.command, tag, stamp),
            None => format!("{}_{}.log", self.command, stamp),
        }
    }
}

/// Install the global subscriber. The returned guard flushes the file writer on drop.
fn init_tracing(target: &LogTarget, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(LOG_DIR)?;

    let directives = QUIET_TARGETS.iter().fold(
        if verbose { "debug" } else { "info" }.to_string(),
        |acc, t| format!("{acc},{t}=warn"),
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let file_name = target.file_name();
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(LOG_DIR, &file_name));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);
    let console_layer = target
        .console
        .then(|| fmt::layer().with_file(true).with_line_number(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Writing log to {}", PathBuf::from(LOG_DIR).join(file_name).display());
    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_tracing(&LogTarget::for_command(&cli.command), cli.verbose)?;

    match cli.command {
        Commands::Backtest {
            config,
            profile,
            symbols,
        } => commands::backtest::run(config, profile, symbols),

        Commands::Compare {
            config,
            profiles,
            symbols,
        } => commands::compare::run(config, profiles, symbols),

        Commands::Live {
            config,
            paper,
            interval,
            profile,
            symbols,
        } => commands::live::run(config, paper, interval, profile, symbols),

        Commands::Download {
            config,
            symbols,
            timeframes,
            days,
            output,
        } => commands::download::run(config, symbols, timeframes, days, output),
    }
}
