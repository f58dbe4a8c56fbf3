use anyhow::{Context, Result};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod emissions;
mod error;
mod forcing;
mod grid;
mod hydromodel;
mod io;
mod model;
mod monitoring;
mod pipeline;
mod segments;

use cli::{Command, get_args};
use pipeline::{build, read_build_file, update};

fn main() -> Result<()> {
    let args = get_args();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let started = Instant::now();
    let (root, model) = match args.command {
        Command::Build { root, config } => {
            let file = read_build_file(&config)
                .with_context(|| format!("Failed to read build file: {:?}", config))?;
            info!(root = %root.display(), steps = file.steps.len(), "building model");
            let model = build(&root, file)?;
            (root, model)
        }
        Command::Update { root, config } => {
            let file = read_build_file(&config)
                .with_context(|| format!("Failed to read update file: {:?}", config))?;
            info!(root = %root.display(), steps = file.steps.len(), "updating model");
            let model = update(&root, file)?;
            (root, model)
        }
    };

    info!(
        root = %root.display(),
        segments = model.segments.as_ref().map(|s| s.nrofseg()).unwrap_or(0),
        exchanges = model.pointer.as_ref().map(|p| p.nrofexch()).unwrap_or(0),
        elapsed = ?started.elapsed(),
        "done"
    );
    Ok(())
}
