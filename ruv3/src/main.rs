mod run_ruv;
mod run_simulate;

use clap::{Parser, Subcommand};
use log::info;
use run_ruv::*;
use run_simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "RUV-III",
    long_about = "Removing unwanted variation with replicates and negative controls.\n\
		  Expression matrices are tab-separated, observations (cells) in rows\n\
		  and features (genes) in columns; `.gz` files are handled transparently."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Simulate batch-affected expression",
        long_about = "Simulate Gaussian log-expression with cell-type signal,\n\
		      batch-driven unwanted factors, and a block of negative-control\n\
		      genes that carry no cell-type signal.\n"
    )]
    Simulate(SimulateArgs),

    #[command(
        about = "Remove unwanted variation",
        long_about = "Run RUV-III in three stages: \n\
		      (1) Standardize each gene against a batch-only model\n\
		      (2) Estimate unwanted factors from negative controls once\n\
		      (3) Correct for each candidate k and score it by silhouettes.\n"
    )]
    Run(RunArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
        Commands::Run(args) => {
            run_ruv(args)?;
        }
    }

    info!("Done");
    Ok(())
}
