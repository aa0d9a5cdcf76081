use policy_harness_core::config::HarnessConfig;
use policy_harness_core::corpus::{Corpus, CorpusError, SeedCorpus};
use policy_harness_core::executor::{Executor, InProcessExecutor};
use policy_harness_core::harness::{Disposition, Harness, IterationReport};
use policy_harness_core::input::Input;
use policy_harness_core::logging::init_tracing;
use policy_harness_core::loopback::LoopbackPolicy;
use policy_harness_core::mutator::{LineMutator, Mutator};
use policy_harness_core::oracle::{CrashOracle, Oracle};
use policy_harness_core::plugin::OpenStatus;

use clap::Parser;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

const MAX_CORPUS_ENTRIES: usize = 10_000;
const MAX_ENTRY_LEN: usize = 4096;
const DEFAULT_SEED: &[u8] = b"user=root\nuid=0\ngid=0\ncwd=/\ntty=/dev/pts/0\nhost=localhost\n";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long)]
    iterations: Option<u64>,
    /// RNG seed for mutation
    #[clap(short, long)]
    seed: Option<u64>,
    /// Run each input once and print its report instead of fuzzing
    #[clap(long)]
    replay: bool,
    /// Directory crashing inputs are written to, named by their MD5
    #[clap(long, value_parser)]
    artifacts_dir: Option<PathBuf>,
    /// Seed files or directories
    #[clap(value_parser)]
    inputs: Vec<PathBuf>,
}

/// Outcome counts across a run.
#[derive(Debug, Default)]
struct Tally {
    driven: u64,
    abandoned: u64,
    open_success: u64,
    open_failure: u64,
    open_fatal: u64,
    default_command: u64,
}

impl Tally {
    fn record(&mut self, report: &IterationReport) {
        if report.disposition != Disposition::Driven {
            self.abandoned += 1;
            return;
        }
        self.driven += 1;
        match report.open {
            Some(OpenStatus::Success) => self.open_success += 1,
            Some(OpenStatus::Failure) => self.open_failure += 1,
            Some(OpenStatus::Fatal(_)) => self.open_fatal += 1,
            None => {}
        }
        if report.default_command_used {
            self.default_command += 1;
        }
    }
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, anyhow::Error> {
    let config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                HarnessConfig::load_from_file(&default_config_path)?
            } else {
                HarnessConfig::default()
            }
        }
    };
    Ok(config)
}

fn save_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf, anyhow::Error> {
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("Failed to create artifacts dir {:?}: {}", dir, e))?;
    let path = dir.join(format!("crash-{name}"));
    std::fs::write(&path, data)
        .map_err(|e| anyhow::anyhow!("Failed to write artifact {:?}: {}", path, e))?;
    Ok(path)
}

fn replay(config: &HarnessConfig, inputs: &[PathBuf]) -> Result<(), anyhow::Error> {
    if inputs.is_empty() {
        anyhow::bail!("--replay needs at least one input path");
    }
    let mut corpus: SeedCorpus<Vec<u8>> = SeedCorpus::new();
    corpus.load_initial_seeds(inputs)?;

    let mut harness = Harness::new(LoopbackPolicy::new(), config);
    for id in 0..corpus.len() {
        let Some(data) = corpus.get(id) else { continue };
        let report = harness.run_one(data);
        println!(
            "{} ({} records): {report:#?}",
            corpus.origin(id).unwrap_or("input"),
            data.record_count()
        );
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    init_tracing(&config.logging.filter);

    if let Some(iterations) = cli.iterations {
        config.fuzzer.max_iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = seed;
    }
    config.fuzzer.seed_paths.extend(cli.inputs.iter().cloned());
    debug!(?config, "effective configuration");

    if cli.replay {
        return replay(&config, &cli.inputs);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.fuzzer.seed);
    let mut mutator = LineMutator::new();
    let oracle = CrashOracle::new();

    let mut corpus: SeedCorpus<Vec<u8>> = SeedCorpus::new();
    let loaded = corpus.load_initial_seeds(&config.fuzzer.seed_paths)?;
    info!(loaded, "seed corpus loaded");
    if corpus.is_empty() {
        corpus.add(DEFAULT_SEED.to_vec(), "Default Initial Seed".to_string());
    }

    let mut harness = Harness::new(LoopbackPolicy::new(), &config);
    let mut tally = Tally::default();
    let mut executor = InProcessExecutor::new(|data: &[u8]| {
        let report = harness.run_one(data);
        tally.record(&report);
    });

    let max_iterations = config.fuzzer.max_iterations;
    println!(
        "Starting fuzz loop for {} iterations with {} initial corpus items...",
        max_iterations,
        corpus.len()
    );
    let start_time = Instant::now();
    let mut executions: u64 = 0;
    let mut solutions_found = 0;

    for i in 0..max_iterations {
        let base_input = corpus
            .random_select(&mut rng)
            .map(|(_, input)| input.clone())
            .ok_or(CorpusError::CorpusIsEmpty)?;
        let mutated_input = mutator.mutate(
            Some(&base_input),
            &mut rng,
            Some(&corpus as &dyn Corpus<Vec<u8>>),
        )?;
        executions += 1;

        let status = executor.execute_sync(&mutated_input);
        if let Some(bug_report) = oracle.examine(&mutated_input, &status) {
            println!("\n!!! BUG FOUND (Execution {executions}) !!!");
            println!("  Description: {}", bug_report.description);
            println!("  Hash: {}", bug_report.input_hash);
            if let Some(dir) = &cli.artifacts_dir {
                let path = save_artifact(dir, &bug_report.input_hash, &bug_report.input)?;
                println!("  Saved: {path:?}");
            }
            corpus.add(
                bug_report.input,
                format!("Crash: {}", bug_report.description),
            );
            solutions_found += 1;
        } else if mutated_input.len() <= MAX_ENTRY_LEN && corpus.len() < MAX_CORPUS_ENTRIES {
            corpus.add(mutated_input, format!("Mutation of iteration {i}"));
        }

        if i > 0 && i % (max_iterations / 100).max(1) == 0 {
            let elapsed = start_time.elapsed().as_secs_f32();
            let exec_per_sec = if elapsed > 0.0 {
                executions as f32 / elapsed
            } else {
                0.0
            };
            print!(
                "\rIter: {}/{}, Corpus: {}, Solutions: {}, Execs/sec: {:.2}   ",
                i,
                max_iterations,
                corpus.len(),
                solutions_found,
                exec_per_sec
            );
            std::io::stdout().flush()?;
        }
    }
    let harness_time = Executor::<Vec<u8>>::elapsed(&executor);
    drop(executor);

    println!(
        "\nFuzz loop finished in {:.2?} ({harness_time:.2?} in harness).",
        start_time.elapsed()
    );
    println!(
        "Total Executions: {}, Corpus Size: {}, Solutions Found: {}",
        executions,
        corpus.len(),
        solutions_found
    );
    println!(
        "Driven: {}, Abandoned: {}, Open success/failure/fatal: {}/{}/{}, Default command: {}",
        tally.driven,
        tally.abandoned,
        tally.open_success,
        tally.open_failure,
        tally.open_fatal,
        tally.default_command
    );
    println!("Plugin calls: {:?}", harness.plugin().stats());

    Ok(())
}
