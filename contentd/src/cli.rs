//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskstore::{Priority, TaskMode};

/// contentd - AI content-creation task orchestrator
#[derive(Parser)]
#[command(
    name = "contentd",
    about = "AI content-creation task orchestrator",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Create a content task
    Create {
        /// Article topic
        #[arg(long)]
        topic: String,

        /// What the article must cover
        #[arg(long)]
        requirements: String,

        /// Target audience description
        #[arg(long)]
        audience: Option<String>,

        /// Comma-separated keywords the article must mention
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Writing tone
        #[arg(long)]
        tone: Option<String>,

        /// Minimum word count
        #[arg(long)]
        min_words: Option<usize>,

        /// Maximum word count
        #[arg(long)]
        max_words: Option<usize>,

        /// Execution mode
        #[arg(long, default_value = "sync")]
        mode: TaskMode,

        /// Queue priority for async tasks
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Image size as WIDTHxHEIGHT
        #[arg(long)]
        image_size: Option<String>,

        /// Dedup key: repeat submissions map to one task
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Show a task's lifecycle status
    Status {
        #[arg(long)]
        task_id: String,
    },

    /// Print a task's results
    Result {
        #[arg(long)]
        task_id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a pending task
    Cancel {
        #[arg(long)]
        task_id: String,
    },

    /// Run the worker pool and HTTP API
    Serve {
        /// Bind address, overrides config
        #[arg(long)]
        bind: Option<String>,
    },

    /// Probe the configured service adapters
    Health,
}

/// Output format for result commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
