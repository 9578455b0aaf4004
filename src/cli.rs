//! Command-line front end built on clap.
//!
//! Modes are mutually exclusive flags (`--scan`, `--watch`, `--cleanup`,
//! `--list`, `--reset`); with none given the pipeline runs in watch mode.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

/// srintake: service-request intake pipeline.
#[derive(Debug, Parser)]
#[command(name = "srintake", version, about)]
#[command(group(
    ArgGroup::new("mode")
        .args(["scan", "watch", "cleanup", "list", "reset"])
        .multiple(false)
))]
pub struct Cli {
    /// Process the inbox once and exit.
    #[arg(long)]
    pub scan: bool,

    /// Scan repeatedly, sleeping SECONDS between passes (default from config, 30).
    #[arg(long, value_name = "SECONDS", num_args = 0..=1)]
    pub watch: Option<Option<u64>>,

    /// Delete archive entries older than the retention period (30 days).
    #[arg(long)]
    pub cleanup: bool,

    /// Print processed SR numbers, sorted, with a count.
    #[arg(long)]
    pub list: bool,

    /// Forget a processed SR number so it can be processed again.
    #[arg(long, value_name = "SR_NUMBER")]
    pub reset: Option<String>,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = crate::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// The single operation selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Scan,
    /// Interval override in seconds, if given.
    Watch(Option<u64>),
    Cleanup,
    List,
    Reset(String),
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.scan {
            Mode::Scan
        } else if self.cleanup {
            Mode::Cleanup
        } else if self.list {
            Mode::List
        } else if let Some(sr) = &self.reset {
            Mode::Reset(sr.clone())
        } else {
            Mode::Watch(self.watch.flatten())
        }
    }
}
