use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fflab_core::{ContextKind, ContextSpec, ForceFieldSpec};
use fflab_experiment::{
    ExperimentConfig, ExperimentStateMachine, FieldDefinition, Flow, HapticDevice,
    JsonLinesStore, LogPresenter, MinimumJerkMove, PlannedTrial, ShutdownReason, TrialList,
    TrialListBuilder, TrialPlan,
};
use fflab_timing::{Clock, ManualClock, MonotonicClock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::sim::SimulatedRig;

#[derive(Parser, Debug)]
#[command(name = "fflab", version, about = "Force-field reaching experiment controller")]
pub struct Args {
    /// Session configuration (JSON). Defaults are used when absent.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Trial plan (JSON). A synthetic plan is generated when absent.
    #[arg(long, value_name = "PATH")]
    pub plan: Option<PathBuf>,

    /// Trial rows are written here, frames next to it.
    #[arg(long, value_name = "PATH", default_value = "data/session.jsonl")]
    pub data: PathBuf,

    /// Seed for delay sampling and the simulated subject.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Pace the loop on the wall clock instead of simulated time.
    #[arg(long)]
    pub realtime: bool,

    /// Override the servo rate (Hz).
    #[arg(long)]
    pub control_hz: Option<f64>,

    /// Override the display rate (Hz).
    #[arg(long)]
    pub idle_hz: Option<f64>,

    /// Stop the session after this many seconds of loop time.
    #[arg(long)]
    pub max_seconds: Option<f64>,

    /// Trials in the generated plan.
    #[arg(long, default_value_t = 24)]
    pub synthetic_trials: usize,

    /// Used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

pub struct App {
    args: Args,
    config: ExperimentConfig,
    trials: TrialList,
    seed: u64,
    interrupted: Arc<AtomicBool>,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => ExperimentConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ExperimentConfig::default(),
        };
        if let Some(hz) = args.control_hz {
            config.control_rate_hz = hz;
        }
        if let Some(hz) = args.idle_hz {
            config.idle_rate_hz = hz;
        }
        config.validate().context("invalid configuration")?;

        let plan = match &args.plan {
            Some(path) => TrialPlan::from_file(path)
                .with_context(|| format!("loading trial plan {}", path.display()))?,
            None => synthetic_plan(args.synthetic_trials),
        };

        let seed = args.seed.unwrap_or_else(|| rand::rng().random());
        let trials = TrialListBuilder::new(&config)
            .plan(plan)
            .build(&mut StdRng::seed_from_u64(seed))
            .context("cannot build trial list")?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("cannot install Ctrl-C handler")?;

        Ok(Self {
            args,
            config,
            trials,
            seed,
            interrupted,
        })
    }

    pub fn run(self) -> Result<()> {
        println!("=== FORCE FIELD LAB ===");
        println!("Platform: {}", std::env::consts::OS);
        println!("Trials: {}", self.trials.trials().len());
        println!("Seed: {}", self.seed);
        println!("Data: {}", self.args.data.display());
        println!("Press Ctrl-C to stop.\n");

        let flow = if self.args.realtime {
            self.drive(MonotonicClock::new())?
        } else {
            self.drive(ManualClock::new())?
        };

        match flow {
            Flow::Shutdown(ShutdownReason::Unsafe) => bail!("robot reported an unsafe state"),
            Flow::Shutdown(ShutdownReason::StoreFailed) => {
                bail!("could not save data to {}", self.args.data.display())
            }
            Flow::Finished => println!("\nExperiment completed."),
            Flow::Continue => println!("\nExperiment stopped early."),
        }
        Ok(())
    }

    /// Runs one control tick per servo period and an idle tick every
    /// display period until the machine finishes or the operator stops it.
    fn drive<C: Clock>(&self, clock: C) -> Result<Flow> {
        let config = &self.config;
        let period = Duration::from_secs_f64(1.0 / config.control_rate_hz);
        let idle_every = (config.control_rate_hz / config.idle_rate_hz).round().max(1.0) as u64;
        let limit = self.args.max_seconds.map(Duration::from_secs_f64);

        let home = self
            .trials
            .trials()
            .first()
            .map(|t| t.geometry.start)
            .unwrap_or_default();
        let mut rig = SimulatedRig::new(
            StdRng::seed_from_u64(self.seed.wrapping_add(1)),
            config.control_rate_hz,
            home,
        )
        .with_force_sensor(config.robot_ft);

        let mut machine = ExperimentStateMachine::new(
            config.clone(),
            clock.clone(),
            self.trials.clone(),
            JsonLinesStore::new(&self.args.data),
            LogPresenter::new(),
            MinimumJerkMove::new(),
        )?;
        machine
            .open_device(&mut rig)
            .context("cannot start the simulated rig")?;
        if config.robot_ft {
            reset_bias(&mut rig)?;
        }

        let mut next = clock.now();
        let mut tick: u64 = 0;
        let flow = loop {
            rig.observe(machine.state(), machine.current_trial());
            let sample = rig.read_sample();
            let load = rig.read_force_torque();
            let force = machine.on_control_tick(sample, load);
            rig.apply_force(force);

            tick += 1;
            if tick % idle_every == 0 {
                let flow = machine.on_idle_tick(rig.status());
                if flow.is_done() {
                    break flow;
                }
                if self.interrupted.load(Ordering::SeqCst) {
                    warn!("interrupted by operator");
                    break Flow::Continue;
                }
                if limit.is_some_and(|l| clock.now() >= l) {
                    warn!(seconds = clock.now().as_secs_f64(), "run time limit reached");
                    break Flow::Continue;
                }
            }

            next += period;
            clock.sleep(next.saturating_sub(clock.now()));
        };

        machine.shutdown(&mut rig);
        info!(
            state = %machine.state(),
            trials = machine.trial_index() + 1,
            "controller stopped"
        );
        Ok(flow)
    }
}

/// Blocks on the operator before zeroing the handle sensor.
fn reset_bias<D: HapticDevice>(device: &mut D) -> Result<()> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        println!("Press Enter to reset the force/torque bias.");
        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .context("reading operator input")?;
    }
    device
        .reset_sensor_bias()
        .context("cannot reset force/torque bias")?;
    info!("force/torque bias reset");
    Ok(())
}

/// Null-field baseline, then a viscous curl field with a channel trial
/// every fifth trial.
fn synthetic_plan(trials: usize) -> TrialPlan {
    let context = ContextSpec::new(ContextKind::StaticOn);
    let fields = vec![
        FieldDefinition {
            field: ForceFieldSpec::none(),
            context,
        },
        FieldDefinition {
            field: ForceFieldSpec::viscous(0.15, 90.0),
            context,
        },
        FieldDefinition {
            field: ForceFieldSpec::channel(-30.0, -0.05),
            context,
        },
    ];
    let baseline = trials / 3;
    let trials = (0..trials)
        .map(|i| {
            let field_index = match i {
                i if i < baseline => 0,
                i if (i - baseline) % 5 == 4 => 2,
                _ => 1,
            };
            PlannedTrial {
                phase: u32::from(i >= baseline),
                field_index,
            }
        })
        .collect();
    TrialPlan { fields, trials }
}

impl Drop for App {
    fn drop(&mut self) {
        println!("Controller resources released");
    }
}
