//! Thin CLI demonstration binary over the `driftmirror` library: wraps the
//! [`mirrorset`] lifecycle (init / start / finish / cancel / receive) with
//! no logic of its own beyond argument parsing and human-readable output.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use driftmirror::mirrorset::{self, LocalMirrorSet};

#[derive(Parser)]
#[command(name = "drift", version, about = "Journal-based file tree mirroring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new mirror set.
    Init {
        /// Directory holding the set's `.lmirror/` metadata
        base: PathBuf,
        /// Set name
        name: String,
        /// Directory to mirror
        content_root: PathBuf,
    },
    /// Mark a changeset open, ahead of editing the content tree.
    Start { base: PathBuf, name: String },
    /// Scan for changes since the last snapshot and write a new journal.
    Finish { base: PathBuf, name: String },
    /// Abandon an open changeset without scanning.
    Cancel { base: PathBuf, name: String },
    /// Receive new journals (and their content) from another local set.
    Receive {
        /// This set's base directory
        base: PathBuf,
        name: String,
        /// The set to receive from
        source_base: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("{} {e:#}", "error:".red().bold());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { base, name, content_root } => {
            mirrorset::initialise(&base, &name, &content_root)
                .with_context(|| format!("initialising set {name:?} at {}", base.display()))?;
            println!("{} set {name:?} at {}", "created".green().bold(), base.display());
        },
        Command::Start { base, name } => {
            let set = LocalMirrorSet::open(&base, &name)
                .with_context(|| format!("opening set {name:?} at {}", base.display()))?;
            set.start_change()?;
            println!("{} changeset for {name:?}", "opened".green().bold());
        },
        Command::Finish { base, name } => {
            let set = LocalMirrorSet::open(&base, &name)
                .with_context(|| format!("opening set {name:?} at {}", base.display()))?;
            set.finish_change()?;
            println!("{} changeset for {name:?}", "closed".green().bold());
        },
        Command::Cancel { base, name } => {
            let set = LocalMirrorSet::open(&base, &name)
                .with_context(|| format!("opening set {name:?} at {}", base.display()))?;
            set.cancel_change()?;
            println!("{} changeset for {name:?}", "cancelled".yellow().bold());
        },
        Command::Receive { base, name, source_base } => {
            let dest = LocalMirrorSet::open(&base, &name)
                .with_context(|| format!("opening set {name:?} at {}", base.display()))?;
            let source = LocalMirrorSet::open(&source_base, &name)
                .with_context(|| format!("opening source set {name:?} at {}", source_base.display()))?;
            dest.receive(&source)?;
            println!("{} {name:?} from {}", "received".green().bold(), source_base.display());
        },
    }
    Ok(())
}
