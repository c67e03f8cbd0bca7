//! CLI argument parsing and command dispatch

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "swapbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an experiment locally, one simulated process per configured instance
    Run {
        /// Path to the experiment configuration file
        #[arg(short, long)]
        config: String,
    },
    /// Validate an experiment configuration file
    Validate {
        /// Path to the experiment configuration file
        #[arg(short, long)]
        config: String,
    },
}
