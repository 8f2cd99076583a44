//! Command implementations.
//!
//! Commands write results to the given writer and log everything else.
//! Per-package failures that do not abort the run are counted and turn into
//! [`Status::Incomplete`].

pub mod bottle;
pub mod merge;
pub mod upload;

use crate::cli::{Commands, EXIT_FAILURE, EXIT_OK};
use bottler_core::{BottlerConfig, Interrupt};
use std::io::Write;
use std::path::Path;

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Everything was processed.
    Success,
    /// Some packages were skipped.
    Incomplete,
}

impl Status {
    /// Status for a run that skipped `skipped` packages.
    #[must_use]
    pub const fn from_skipped(skipped: usize) -> Self {
        if skipped == 0 { Self::Success } else { Self::Incomplete }
    }

    /// Process exit code.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => EXIT_OK,
            Self::Incomplete => EXIT_FAILURE,
        }
    }
}

/// Shared state for one invocation.
pub struct Context {
    /// Resolved configuration.
    pub config: BottlerConfig,
    /// Ctrl-C flag.
    pub interrupt: Interrupt,
}

impl Context {
    /// Loads configuration and wires the interrupt flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn load(config_path: Option<&Path>, interrupt: Interrupt) -> miette::Result<Self> {
        Ok(Self {
            config: BottlerConfig::load(config_path)?,
            interrupt,
        })
    }
}

/// Runs `command`.
///
/// # Errors
///
/// Returns the first fatal error.
pub fn execute(command: Commands, ctx: &Context, out: &mut dyn Write) -> miette::Result<Status> {
    match command {
        Commands::Bottle(args) if args.merge => {
            let _span = crate::command_span!("merge").entered();
            merge::execute(&args, ctx, out)
        }
        Commands::Bottle(args) => {
            let _span = crate::command_span!("bottle").entered();
            bottle::execute(&args, ctx, out)
        }
        Commands::Upload(args) => {
            let _span = crate::command_span!("upload").entered();
            upload::execute(&args, ctx, out)
        }
    }
}
