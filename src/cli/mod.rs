// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — trains a backbone + margin head, evaluating
//                   on LFW / AgeDB-30 / CFP-FP along the way
//   2. `gen-list` — writes a train list from identity folders
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenListArgs, TrainArgs};

use crate::infra::logging;

#[derive(Parser, Debug)]
#[command(
    name = "facetrain",
    version = "0.1.0",
    about = "Train face-recognition backbones with margin heads and track verification accuracy."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::GenList(args) => run_gen_list(args),
        }
    }
}

/// The log sink is installed by the use case once the run
/// directory exists, so nothing is logged before that.
fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};

    let config = TrainConfig::try_from(args)?;
    let report = TrainUseCase::new(config).execute()?;

    println!(
        "Training complete. {} checkpoint(s) saved. Best: {}",
        report.checkpoints.len(),
        report.best.summary()
    );
    Ok(())
}

fn run_gen_list(args: GenListArgs) -> Result<()> {
    use crate::application::list_use_case::GenerateListUseCase;

    logging::init_console()?;
    let (identities, images) = GenerateListUseCase::new(args.root, &args.output).execute()?;
    println!("Wrote {images} lines for {identities} identities to '{}'", args.output.display());
    Ok(())
}
