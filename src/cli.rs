use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Poll the Yokohama facility reservation site for vacant slots.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log formatter to use
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    /// Configuration file (defaults to `shisetsu.toml` when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search through the site's HTTP endpoints
    Search(SearchArgs),
    /// Search by driving a real browser over WebDriver
    #[cfg(feature = "browser")]
    Browse(SearchArgs),
    /// Compare two slot CSV files
    Diff {
        previous: PathBuf,
        current: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// First date to search (defaults to today in Asia/Tokyo)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last date to search (defaults to `--from` plus `--days`)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Length of the date window when `--to` is not given
    #[arg(long)]
    pub days: Option<u32>,

    /// Run only the named task; repeatable
    #[arg(long = "task")]
    pub tasks: Vec<String>,

    /// Directory the timestamped run directory is created in
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Compact human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
