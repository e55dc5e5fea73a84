pub mod bundle;
pub mod config;
pub mod heldby;
pub mod load_config;
pub mod parse;
pub mod pipeline;
pub mod record;
pub mod register;
pub mod replica;
pub mod sink;
pub mod transform;
pub mod ynaming;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use load_config::load_config;
use pipeline::{Deadline, Pipeline};

#[derive(Parser)]
#[clap(
    name = "ctd-pipeline",
    version,
    about = "Transform catalogue XML exports into batched JSON delivery archives"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full transformation and delivery pipeline for one input file
    Run {
        /// Path to the catalogue XML export
        #[clap(long)]
        input: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Optional wall-clock budget in seconds; the run checkpoints and
        /// exits cleanly when it is about to be exceeded
        #[clap(long)]
        time_budget_secs: Option<u64>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Run {
            input,
            config,
            time_budget_secs,
        } => {
            let config = load_config(config)?;
            let deadline = match time_budget_secs {
                Some(secs) => Deadline::after(Duration::from_secs(secs)),
                None => Deadline::none(),
            };
            let pipeline = Pipeline::from_config(config);
            println!("Pipeline starting...");
            match pipeline.run(&input, deadline).await {
                Ok(report) => {
                    println!("Pipeline complete.\nReport:");
                    println!("{:#?}", report);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Pipeline run failed: {}", e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    };

    let exit_span = tracing::info_span!("exit");
    exit_span.in_scope(|| {
        tracing::info!("run finished");
    });

    result
}
