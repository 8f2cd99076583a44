//! Command line definition.

use crate::tracing::{LogLevel, LogFormat};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Exit code for success
pub const EXIT_OK: i32 = 0;
/// Exit code for a failed run or skipped packages
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for SIGINT (128 + signal number 2)
pub const EXIT_SIGINT: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "bottler")]
#[command(about = "Build, merge and publish relocatable binary packages")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(short, long, global = true, help = "Log progress (same as --log-level info)")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "pretty",
        value_enum
    )]
    pub log_format: LogFormat,

    #[arg(long, global = true, help = "Configuration file (default: ./bottler.toml if present)")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// The effective log level after `--verbose`.
    #[must_use]
    pub fn effective_level(&self) -> LogLevel {
        match self.log_level {
            LogLevel::Warn | LogLevel::Error if self.verbose => LogLevel::Info,
            level => level,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Bottle installed packages, or merge bottle JSON with --merge")]
    Bottle(BottleArgs),
    #[command(about = "Publish bottles described by bottle JSON to the registry")]
    Upload(UploadArgs),
}

#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct BottleArgs {
    #[arg(
        required = true,
        help = "Package descriptor files, or bottle JSON files with --merge"
    )]
    pub targets: Vec<PathBuf>,

    #[arg(long, help = "Write bottle information to a JSON file")]
    pub json: bool,

    #[arg(long, help = "Merge bottle JSON files into one bottle block")]
    pub merge: bool,

    #[arg(long, requires = "merge", help = "Write the merged block into the package definition")]
    pub write: bool,

    #[arg(long, help = "Do not commit the rewritten definition")]
    pub no_commit: bool,

    #[arg(long, help = "Keep the published root URL, prefix and rebuild")]
    pub keep_old: bool,

    #[arg(long, conflicts_with = "keep_old", help = "Always use rebuild 0")]
    pub no_rebuild: bool,

    #[arg(long, help = "Do not relocate; the bottle is poured as-is")]
    pub skip_relocation: bool,

    #[arg(long, help = "Bottle packages without a tap as core packages")]
    pub force_core_tap: bool,

    #[arg(long, help = "Keep the install receipt out of the archive")]
    pub only_json_tab: bool,

    #[arg(long, value_name = "URL", help = "Download root URL for the bottles")]
    pub root_url: Option<String>,

    #[arg(long, value_name = "STRATEGY", help = "Download strategy for the root URL")]
    pub root_url_using: Option<String>,

    #[arg(long, value_name = "NAME <EMAIL>", help = "Committer for --write commits")]
    pub committer: Option<String>,

    #[arg(long, default_value = ".", help = "Directory bottles and JSON are written to and read from")]
    pub output_dir: PathBuf,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UploadArgs {
    #[arg(required = true, help = "Bottle JSON files")]
    pub files: Vec<PathBuf>,

    #[arg(long, help = "Add platforms to the published image instead of replacing it")]
    pub keep_old: bool,

    #[arg(short = 'n', long, help = "Print the registry commands instead of running them")]
    pub dry_run: bool,

    #[arg(long, help = "Warn and continue when a registry command fails")]
    pub warn_on_upload_failure: bool,

    #[arg(long, default_value = ".", help = "Directory holding the bottle archives")]
    pub bottle_dir: PathBuf,

    #[arg(long, default_value = ".", help = "Directory image layouts are assembled in")]
    pub work_dir: PathBuf,

    #[arg(long, value_name = "DIR", help = "Directory holding the OCI JSON schemas")]
    pub schema_dir: Option<PathBuf>,
}

#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
