use covclimb_core::config::CovclimbConfig;
use covclimb_core::executor::CommandExecutor;
use covclimb_core::fuzzer::Fuzzer;
use covclimb_core::monitor::ConsoleMonitor;
use covclimb_core::mutator::ReplaceByteMutator;
use covclimb_core::observer::SancovObserver;

use clap::{CommandFactory, Parser};
use log::info;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Instrumented target program; it receives each input on stdin.
    #[clap(value_parser)]
    target: Vec<PathBuf>,
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Seed for a reproducible session.
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    input_len: Option<usize>,
    /// Give up on a byte after this many attempts without new coverage.
    #[clap(long)]
    max_attempts: Option<u64>,
    #[clap(long)]
    timeout_ms: Option<u64>,
}

fn load_config(cli: &Cli) -> Result<CovclimbConfig, anyhow::Error> {
    match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            CovclimbConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                CovclimbConfig::load_from_file(&default_config_path)
            } else {
                Ok(CovclimbConfig::default())
            }
        }
    }
}

/// Command line values win over the config file.
fn apply_overrides(config: &mut CovclimbConfig, cli: &Cli, target: &str) {
    if config.executor.command.is_empty() {
        config.executor.command.push(target.to_string());
    } else {
        config.executor.command[0] = target.to_string();
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = Some(seed);
    }
    if let Some(input_len) = cli.input_len {
        config.fuzzer.input_len = input_len;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.fuzzer.max_attempts_per_position = Some(max_attempts);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.executor.timeout_ms = Some(timeout_ms);
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let target = match cli.target.as_slice() {
        [target] => target.to_string_lossy().into_owned(),
        _ => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, &cli, &target);
    info!("Effective configuration: {config:#?}");

    let mut rng = match config.fuzzer.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };

    let executor = CommandExecutor::new(config.command_executor_config());
    let observer =
        SancovObserver::with_extension(config.trace_dir(), config.trace.extension.clone());
    let mut fuzzer = Fuzzer::new(
        executor,
        observer,
        ReplaceByteMutator,
        config.search_settings(),
    );

    let start_time = Instant::now();
    let summary = fuzzer.run(&mut rng, &mut ConsoleMonitor::new())?;

    info!(
        "Session finished in {:.2?}: {} traces, {} executions, input md5 {}",
        start_time.elapsed(),
        summary.total_coverage,
        summary.executions,
        summary.input_md5
    );
    if !summary.abandoned_positions.is_empty() {
        info!("Positions left unchanged: {:?}", summary.abandoned_positions);
    }
    Ok(())
}
