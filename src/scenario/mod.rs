pub mod config;
pub use config::{AttackConfig, RunMode, ScenarioConfig};

use crate::attacks::ActiveAttack;
use crate::metrics::{MetricsCollector, logger};
use crate::session::{SimSession, TrafficSession};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::thread_rng;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Highest usable engine seed, inherited from the external engine's limit.
pub const MAX_SEED: u64 = 23423;

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: u32,
    pub failed: u32,
    pub out_dir: PathBuf,
}

/// Drives the seed x mode matrix: one fresh session and one fresh attack
/// state per run, three CSV streams per run, nothing shared across runs.
pub struct ScenarioRunner {
    config: ScenarioConfig,
    out_root: PathBuf,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl ScenarioRunner {
    pub fn new(config: ScenarioConfig, out_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            out_root: out_root.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wall-clock budget for the whole matrix; once exceeded, in-progress and
    /// remaining runs are cancelled.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Token for cancelling the matrix from outside the runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let deadline_at = self.deadline.map(|d| started + d);
        let modes = self.config.modes()?;
        let seeds = self.pick_seeds();

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let out_dir = self
            .out_root
            .join(format!("{}_{}", self.config.name, timestamp));
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;

        info!(scenario = %self.config.name, ?seeds, "starting run matrix");
        info!(
            modes = %modes.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(", "),
            "modes"
        );

        let mut summary = RunSummary {
            out_dir: out_dir.clone(),
            ..Default::default()
        };

        'matrix: for mode in &modes {
            for seed in &seeds {
                if self.cancel.is_cancelled() {
                    warn!("run matrix cancelled");
                    break 'matrix;
                }

                info!(%mode, seed, "=== run start ===");
                // A failed run poisons only itself; the rest of the matrix
                // still gets executed.
                match self.run_one(*mode, *seed, &out_dir, deadline_at) {
                    Ok(()) => {
                        summary.completed += 1;
                        info!(%mode, seed, "run complete");
                    }
                    Err(err) => {
                        summary.failed += 1;
                        error!(%mode, seed, error = %err, "run failed, continuing");
                    }
                }
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            elapsed_s = started.elapsed().as_secs_f64(),
            "matrix finished"
        );
        Ok(summary)
    }

    fn pick_seeds(&self) -> Vec<u64> {
        if let Some(seeds) = &self.config.simulation.seeds {
            return seeds.clone();
        }
        // seed_count <= MAX_SEED is enforced at config validation
        let count = self.config.simulation.seed_count as usize;
        rand::seq::index::sample(&mut thread_rng(), MAX_SEED as usize, count)
            .into_iter()
            .map(|i| i as u64 + 1)
            .collect()
    }

    fn run_one(
        &self,
        mode: RunMode,
        seed: u64,
        out_dir: &Path,
        deadline_at: Option<Instant>,
    ) -> Result<()> {
        let mut session = SimSession::open(seed, self.config.session_config())?;

        // The session must be released on every exit path; a leaked session
        // exhausts the engine's capacity over a long matrix.
        let drive_result = self.drive(&mut session, mode, seed, deadline_at);
        let close_result = session.close();

        let metrics = drive_result?;
        close_result?;

        logger::persist_run(out_dir, &mode.to_string(), seed, &metrics)?;
        Ok(())
    }

    fn drive(
        &self,
        session: &mut dyn TrafficSession,
        mode: RunMode,
        seed: u64,
        deadline_at: Option<Instant>,
    ) -> Result<MetricsCollector> {
        let sim = &self.config.simulation;
        let total_steps = (sim.end_time / sim.step_length).ceil() as u64;

        // Only inject when the mode names the configured attack; any other
        // mode runs as plain observation.
        let mut attack: Option<ActiveAttack> = match mode {
            RunMode::Attack(kind) if kind == self.config.attack.kind() => {
                Some(self.config.attack.build()?)
            }
            _ => None,
        };

        let mut metrics = MetricsCollector::new(
            self.config.detectors.iter().map(|d| d.id.clone()).collect(),
            self.config.detector_poll_steps(),
            self.config.metrics.ebrake_threshold,
            mode.to_string(),
            seed,
        );

        let pb = ProgressBar::new(total_steps);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} steps {msg}")?
                .progress_chars("█▓░"),
        );

        while session.time() < sim.end_time {
            // The deadline cuts into a run in progress, not just between runs.
            if let Some(at) = deadline_at {
                if Instant::now() > at {
                    warn!(%mode, seed, "deadline exceeded, cancelling");
                    self.cancel.cancel();
                }
            }
            if self.cancel.is_cancelled() {
                warn!(%mode, seed, "step loop cancelled");
                break;
            }
            session.advance()?;
            if let Some(attack) = attack.as_mut() {
                attack.step(session)?;
            }
            metrics.sample(session)?;
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(metrics)
    }
}
