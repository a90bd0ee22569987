use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bucket::Granularity;

#[derive(Parser)]
#[command(name = "archive-rollup")]
#[command(about = "Tiered daily/monthly/yearly consolidation of scraped archive segments", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Manifest file (overrides MANIFEST)
    #[arg(long, global = true)]
    pub(crate) manifest: Option<PathBuf>,

    /// Directory holding segment files (overrides ROLLUP_WORK_DIR)
    #[arg(long, global = true)]
    pub(crate) work_dir: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Publish the newest daily segment, then run monthly and yearly consolidation.
    Run,

    /// Publish the newest daily segment as a release.
    Publish,

    /// Promote daily segments into a monthly archive when due.
    Monthly,

    /// Promote monthly archives into a yearly archive when due.
    Yearly,

    /// Show the manifest tiers and pending cleanup.
    Status,

    /// Print the calendar label of a raw YYYYMMDDHHMMSS timestamp.
    Label {
        raw: String,
        #[arg(short, long, value_enum, default_value_t = Granularity::Day)]
        granularity: Granularity,
    },
}

impl Command {
    /// Subcommands that talk to external tools and need them on PATH.
    pub(crate) fn needs_tools(&self) -> bool {
        matches!(self, Self::Run | Self::Publish | Self::Monthly | Self::Yearly)
    }
}
