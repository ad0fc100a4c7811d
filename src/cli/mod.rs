//! Command-line interface for epc
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;

mod complete;
mod decompose;
mod reset;
mod start;
mod status;
mod sync;

/// epc - Epic decomposition and task scheduling
///
/// Reconciles task records against an epic document and schedules ready
/// tasks in dependency order, one at a time.
#[derive(Parser, Debug)]
#[command(name = "epc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root holding the .epc directory (defaults to current directory)
    #[arg(long, global = true, env = "EPC_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decompose an epic document into task records for a feature
    Decompose {
        /// Path to the epic markdown document
        epic: PathBuf,

        /// Feature name the tasks belong to
        #[arg(long)]
        feature: String,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-reconcile an existing feature against its epic document
    Sync {
        /// Path to the epic markdown document
        epic: PathBuf,

        /// Feature name to reconcile
        #[arg(long)]
        feature: String,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Select the next ready task and hand it off for execution
    Start {
        /// Feature name to schedule
        #[arg(long)]
        feature: String,

        /// Resume the task an interrupted run was working on
        #[arg(long)]
        resume: bool,

        /// Show the selection without pinning it in the stored state
        #[arg(long)]
        dry_run: bool,
    },

    /// Mark a task completed and report newly unblocked tasks
    Complete {
        /// Task id to mark completed
        task: u32,

        /// Feature name the task belongs to
        #[arg(long)]
        feature: String,
    },

    /// Show task states and scheduling progress for a feature
    Status {
        /// Feature name to inspect
        #[arg(long)]
        feature: String,
    },

    /// Discard the stored execution state for a feature
    Reset {
        /// Feature name to reset
        #[arg(long)]
        feature: String,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let root = match self.root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let output = crate::output::OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Decompose {
                epic,
                feature,
                dry_run,
            } => decompose::run(decompose::DecomposeOptions {
                root,
                epic,
                feature,
                dry_run,
                output,
            }),
            Commands::Sync {
                epic,
                feature,
                dry_run,
            } => sync::run(sync::SyncOptions {
                root,
                epic,
                feature,
                dry_run,
                output,
            }),
            Commands::Start {
                feature,
                resume,
                dry_run,
            } => start::run(start::StartOptions {
                root,
                feature,
                resume,
                dry_run,
                output,
            }),
            Commands::Complete { task, feature } => complete::run(complete::CompleteOptions {
                root,
                feature,
                task,
                output,
            }),
            Commands::Status { feature } => status::run(status::StatusOptions {
                root,
                feature,
                output,
            }),
            Commands::Reset { feature } => reset::run(reset::ResetOptions {
                root,
                feature,
                output,
            }),
        }
    }
}
