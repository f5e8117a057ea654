// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — trains a model on gridded pose examples
//   2. `evaluate` — scores an examples file with a checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "posegrid-train",
    version,
    about = "Train and evaluate 3D-grid CNNs for pose classification and affinity regression."
)]
pub struct Cli {
    /// The subcommand to run (train or evaluate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on '{}'", args.trainfile.display());
    let out_dir = args.out_dir.clone();

    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Results in '{}'.", out_dir.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let (epoch, metrics) = EvaluateUseCase::new(args.into()).execute()?;

    println!("Checkpoint epoch {epoch}");
    for (name, value) in metrics.iter() {
        println!("    {name}: {value:.5}");
    }
    Ok(())
}
