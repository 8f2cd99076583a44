//! `bottler bottle`: bottle installed packages.

use super::{Context, Status};
use crate::cli::BottleArgs;
use bottler_core::SystemTool;
use bottler_keg::{BottleOptions, BottleOutcome, Bottler, GitUpstream, PackageDescriptor, archiver_for, host_tag};
use miette::IntoDiagnostic;
use std::io::Write;
use tracing::{info, warn};

/// Bottling options for `args`.
#[must_use]
pub fn options(args: &BottleArgs) -> BottleOptions {
    BottleOptions {
        skip_relocation: args.skip_relocation,
        force_core_tap: args.force_core_tap,
        no_rebuild: args.no_rebuild,
        keep_old: args.keep_old,
        json: args.json,
        only_json_tab: args.only_json_tab,
        root_url: args.root_url.clone(),
        root_url_using: args.root_url_using.clone(),
        output_dir: args.output_dir.clone(),
    }
}

/// Bottles every descriptor in `args.targets`.
///
/// # Errors
///
/// Returns the first fatal bottling error; skipped packages only affect the
/// returned status.
pub fn execute(args: &BottleArgs, ctx: &Context, out: &mut dyn Write) -> miette::Result<Status> {
    let config = &ctx.config;
    let descriptors = args
        .targets
        .iter()
        .map(|path| PackageDescriptor::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    let tag = host_tag(config.tag.as_deref(), &SystemTool::new("sw_vers"))?;
    let archiver = archiver_for(config.archiver)?;
    let upstream = GitUpstream::new();
    let mut bottler = Bottler::new(
        config.install_paths(),
        tag,
        config.default_root_url.clone(),
        archiver.as_ref(),
        &upstream,
        &ctx.interrupt,
    );
    info!(tag = %bottler.tag(), packages = descriptors.len(), "Bottling");

    let options = options(args);
    let mut skipped = 0;
    for descriptor in &descriptors {
        ctx.interrupt.check()?;
        match bottler.bottle(descriptor, &options)? {
            BottleOutcome::Skipped { reason } => {
                warn!(package = descriptor.full_name(), "{reason}");
                skipped += 1;
            }
            BottleOutcome::Bottled(bottle) => {
                writeln!(out, "./{}", bottle.local_filename).into_diagnostic()?;
                writeln!(out, "{}", bottle.block).into_diagnostic()?;
                if let Some(json) = &bottle.json_path {
                    info!(path = %json.display(), "Wrote bottle JSON");
                }
            }
        }
    }

    Ok(Status::from_skipped(skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_options_follow_flags() {
        let args = BottleArgs {
            targets: vec![PathBuf::from("foo.toml")],
            keep_old: true,
            only_json_tab: true,
            root_url: Some("https://ghcr.io/v2/acme/tools".to_string()),
            output_dir: PathBuf::from("out"),
            ..BottleArgs::default()
        };
        let options = options(&args);
        assert!(options.keep_old && options.only_json_tab);
        assert!(!options.no_rebuild && !options.json);
        assert_eq!(options.root_url.as_deref(), Some("https://ghcr.io/v2/acme/tools"));
        assert_eq!(options.output_dir, PathBuf::from("out"));
    }
}
