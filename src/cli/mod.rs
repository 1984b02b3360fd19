//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "grounded",
    version,
    about = "Citation-grounded question answering over an indexed corpus",
    long_about = "Grounded answers questions from a pre-indexed document corpus. It fuses dense, \
                  sparse and token-level retrieval, reranks the candidates, generates through a \
                  prioritized list of LLM providers with circuit-breaker failover, and attaches \
                  sentence-level citations to the answer."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/grounded/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question from a JSON-lines corpus
    Answer {
        /// Question to answer
        query: String,

        /// Corpus file: one document record per line
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,

        /// Number of passages to keep after reranking
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Overall deadline, e.g. "10s" or "2500ms"
        #[arg(short, long)]
        deadline: Option<String>,

        /// Show the answer in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Probe every configured provider and show circuit health
    Providers {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
