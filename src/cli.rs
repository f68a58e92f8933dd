use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::journal::EventType;
use crate::resolve::PathMapping;

/// File organizer with an append-only audit trail and verified undo.
#[derive(Parser)]
#[command(name = "tidytrail", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// TOML config file with an [audit] table.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Audit log directory. Overrides the config file.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for organize manifests.
    Schema,
    /// Execute an organize manifest under a new audited run.
    Organize(OrganizeArgs),
    /// Inspect recorded runs.
    Runs(RunsArgs),
    /// Reverse a recorded run, verifying every file first.
    Undo(UndoArgs),
}

#[derive(Args)]
pub struct OrganizeArgs {
    #[arg(skip)]
    pub global: GlobalArgs,

    /// Path to manifest JSON file.
    #[arg(long, required = true)]
    pub manifest: PathBuf,

    /// Show what would be done without recording or moving anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct RunsArgs {
    #[arg(skip)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: RunsCommand,

    /// Output structured JSON to stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum RunsCommand {
    /// List all runs, oldest first.
    List,
    /// Show one run and its events.
    Show {
        /// Run id or unique prefix.
        id: String,
        /// Only show events of this type (repeatable).
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<EventType>,
    },
    /// Show the most recent run.
    Latest,
    /// Write a run and its events to a JSON file.
    Export {
        /// Run id or unique prefix.
        id: String,
        #[arg(long, required = true)]
        out: PathBuf,
    },
}

#[derive(Args)]
pub struct UndoArgs {
    #[arg(skip)]
    pub global: GlobalArgs,

    /// Run id or unique prefix. Defaults to the latest organize run.
    pub run: Option<String>,

    /// Rewrite recorded path prefixes, OLD=NEW (repeatable, first match wins).
    #[arg(long = "map", value_name = "OLD=NEW")]
    pub mappings: Vec<PathMapping>,

    /// Report what undo would do without touching anything.
    #[arg(long)]
    pub preview: bool,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,
}
