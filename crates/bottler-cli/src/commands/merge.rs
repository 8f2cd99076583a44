//! `bottler bottle --merge`: combine bottle JSON from several machines.

use super::{Context, Status};
use crate::cli::BottleArgs;
use bottler_spec::{Author, BottleJson, GitCommitter, MergeEngine, MergeOptions, MergeOutcome};
use miette::IntoDiagnostic;
use std::io::Write;
use tracing::info;

/// Merge settings for `args`.
#[must_use]
pub fn options(args: &BottleArgs, ctx: &Context) -> MergeOptions {
    MergeOptions {
        write: args.write,
        keep_old: args.keep_old,
        no_commit: args.no_commit,
        root_url_using: args.root_url_using.clone(),
        default_root_url: ctx.config.default_root_url.clone(),
        repository: ctx.config.install_paths().repository,
        artifact_dir: args.output_dir.clone(),
    }
}

/// Merges the JSON files in `args.targets`.
///
/// # Errors
///
/// Returns an error on unreadable files, merge conflicts, `--keep-old`
/// mismatches or failed commits.
pub fn execute(args: &BottleArgs, ctx: &Context, out: &mut dyn Write) -> miette::Result<Status> {
    let committer = args.committer.as_deref().map(Author::parse).transpose()?;
    let documents = args
        .targets
        .iter()
        .map(|path| BottleJson::read(path))
        .collect::<Result<Vec<_>, _>>()?;
    ctx.interrupt.check()?;

    let git = GitCommitter::new(committer);
    let engine = MergeEngine::new(options(args, ctx), &git);
    for (full_name, outcome) in engine.run(documents)? {
        match outcome {
            MergeOutcome::Printed { block } => {
                writeln!(out, "{block}").into_diagnostic()?;
            }
            MergeOutcome::Unchanged { removed } => {
                info!(package = %full_name, removed = removed.len(), "No bottle changes");
            }
            MergeOutcome::Written {
                block,
                change,
                committed,
                removed,
            } => {
                writeln!(out, "{block}").into_diagnostic()?;
                info!(
                    package = %full_name,
                    change = change.as_str(),
                    committed,
                    removed = removed.len(),
                    "Updated bottle block"
                );
            }
        }
    }

    Ok(Status::Success)
}
