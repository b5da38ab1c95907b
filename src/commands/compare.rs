//! A/B comparison of named profiles

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use ote_breakout::backtest::{compare, compare_jobs};
use ote_breakout::data::CsvBarSource;
use ote_breakout::journal::Journal;
use ote_breakout::{PipelineConfig, Profile};
use tracing::info;

use super::backtest::print_summaries;
use super::{load_config, split_list};

pub fn run(config_path: String, profiles: Option<String>, symbols: Option<String>) -> Result<()> {
    let config = load_config(&config_path, symbols)?;

    let profiles: Vec<Profile> = match profiles {
        Some(list) => split_list(&list)
            .iter()
            .map(|p| p.parse::<Profile>())
            .collect::<Result<_, _>>()?,
        None => Profile::ALL.to_vec(),
    };
    let configs: Vec<PipelineConfig> = profiles
        .iter()
        .map(|p| config.pipeline_config_for(*p))
        .collect::<Result<_>>()?;

    let t = &config.trading;
    let jobs = compare_jobs(&t.symbols(), &configs);
    info!(
        "Comparing profiles {:?} over {} symbols ({} runs)",
        profiles,
        t.symbols.len(),
        jobs.len()
    );

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")?
            .progress_chars("█░ "),
    );
    pb.set_message("running...");

    let source = CsvBarSource::new(&config.data.data_dir);
    let summaries = compare(
        &jobs,
        &t.fast_timeframe,
        &t.slow_timeframe,
        |symbol| {
            let fast = source.load(symbol, &t.fast_timeframe)?;
            let slow = source.load(symbol, &t.slow_timeframe)?;
            Ok((fast, slow))
        },
        Some(&pb),
    );
    pb.finish_with_message("done");

    let journal = Journal::new(config.data.results_dir.join("compare_summary.csv"));
    let written = journal.append(&summaries)?;
    info!("Appended {} summaries to {}", written, journal.path().display());

    print_summaries("PROFILE COMPARISON", &summaries);
    if summaries.len() < jobs.len() {
        println!(
            "{} of {} runs skipped, see the log file",
            jobs.len() - summaries.len(),
            jobs.len()
        );
    }

    Ok(())
}
