use gridlock::attacks::AttackKind;
use gridlock::scenario::{ScenarioConfig, ScenarioRunner};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Level, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the baseline/attack matrix for a scenario file
    Run {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(short, long, default_value = "results")]
        out: PathBuf,
        /// Override the scenario's seed count
        #[arg(long)]
        seeds: Option<u32>,
        /// Wall-clock budget in seconds for the whole matrix
        #[arg(long)]
        max_runtime: Option<u64>,
    },

    /// Parse and validate a scenario file without running anything
    Validate {
        #[arg(short, long)]
        scenario: PathBuf,
    },

    List,
}

fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            out,
            seeds,
            max_runtime,
        } => {
            let mut config = ScenarioConfig::load(&scenario)?;
            if let Some(count) = seeds {
                config.simulation.seeds = None;
                config.simulation.seed_count = count;
            }

            info!("Gridlock: {}", config.name);
            info!("Attack under test: {}", config.attack.kind());

            let mut runner = ScenarioRunner::new(config, out);
            if let Some(secs) = max_runtime {
                runner = runner.with_deadline(Duration::from_secs(secs));
            }

            let summary = runner.run()?;
            info!("Results saved to: {}", summary.out_dir.display());
            if summary.failed > 0 {
                anyhow::bail!("{} of {} runs failed", summary.failed, summary.completed + summary.failed);
            }
        }

        Commands::Validate { scenario } => {
            let config = ScenarioConfig::load(&scenario)?;
            info!("Scenario '{}' is valid", config.name);
            info!("Attack: {}", config.attack.kind());
            for mode in config.modes()? {
                info!("  mode: {}", mode);
            }
        }

        Commands::List => {
            println!("\nAvailable attack policies");

            for kind in AttackKind::all() {
                println!("  - {}", kind);
            }

            println!("\nUsage: cargo run -- run --scenario scenarios/<name>.json");
            println!("Example: cargo run -- run --scenario scenarios/rsu_spoofing.json\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}
