//! Command-line interface.

pub mod commands;
pub mod display;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-agent work orchestrator.
#[derive(Debug, Parser)]
#[command(name = "drover", version, about)]
pub struct Cli {
    /// Path to a config file (defaults to drover.yaml in the working dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the orchestrator until a governor end state or a signal
    Run {
        /// Override the configured agent count
        #[arg(long)]
        agents: Option<usize>,
        /// Objective definition file; enables objective mode
        #[arg(long)]
        objective: Option<PathBuf>,
    },
    /// Task queue operations
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Show queue statistics
    Status,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Enqueue a task
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        /// Required skill; repeatable
        #[arg(long = "skill")]
        skills: Vec<String>,
        /// Dependency task id; repeatable
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Estimated minutes
        #[arg(long)]
        estimate: Option<u32>,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task
    Show { id: String },
}
