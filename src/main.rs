//! Headless command-line front-end for the sequence engine.
//!
//! Lists, inspects, and runs persisted sequences without a GUI. Instrument
//! tasks only execute when a driver layer registers live instruments; this
//! binary starts with an empty registry, so stored targets resolve to `None`
//! and instrument tasks fail at dispatch.

use anyhow::Result;
use clap::{Parser, Subcommand};
use labseq::config::Settings;
use labseq::executor::SequenceEvent;
use labseq::instrument::InstrumentRegistry;
use labseq::store::{SequenceStore, StoreConfig};
use log::info;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "labseq", about = "Experiment sequence runner", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "labseq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List persisted sequences.
    List,
    /// Show the tasks of one sequence.
    Show {
        /// Sequence name.
        name: String,
    },
    /// Run one sequence to completion, printing lifecycle events.
    Run {
        /// Sequence name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)?;

    env_logger::Builder::new()
        .parse_filters(&settings.application.log_level)
        .init();

    let registry = InstrumentRegistry::new();
    let mut store = SequenceStore::new(StoreConfig::from_settings(&settings));
    let loaded = store.load(&registry)?;
    info!("loaded {} sequences from {}", loaded, settings.sequences.dir.display());

    match cli.command {
        Command::List => {
            let mut names = store.names();
            names.sort();
            for name in names {
                println!("{name}");
            }
        }
        Command::Show { name } => {
            let shared = store
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("no sequence named '{name}'"))?;
            let seq = shared
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (index, task) in seq.tasks.iter().enumerate() {
                println!("{index:3}  {:?}  {}", task.kind, task.name);
            }
            if let Some(schedule) = seq.schedule {
                println!(
                    "scheduled: {} ({:?})",
                    schedule.next_run, schedule.recurrence
                );
            }
        }
        Command::Run { name } => {
            let mut events = store.subscribe();
            store.run(&name).await?;
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    // A slow printer only misses old events; keep draining.
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                match event {
                    SequenceEvent::TaskStarted { index, .. } => {
                        println!("task {index} started");
                    }
                    SequenceEvent::TaskCompleted { index, result, .. } => {
                        println!("task {index} completed: {result}");
                    }
                    SequenceEvent::TaskError { index, message, .. } => {
                        println!("task {index} failed: {message}");
                    }
                    SequenceEvent::SequencePaused { .. } => {}
                    SequenceEvent::SequenceCompleted { sequence } => {
                        println!("sequence '{sequence}' completed");
                        break;
                    }
                    SequenceEvent::SequenceStopped { sequence } => {
                        println!("sequence '{sequence}' stopped");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
