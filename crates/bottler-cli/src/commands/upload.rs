//! `bottler upload`: publish bottles to the registry.

use super::{Context, Status};
use crate::cli::UploadArgs;
use bottler_core::{DryRun, OnError, SystemTool};
use bottler_oci::{JsonSchemaValidator, PublishOptions, PublishOutcome, Publisher, RegistryTool};
use bottler_spec::{BottleJson, merge_documents};
use miette::IntoDiagnostic;
use std::io::Write;
use tracing::{info, warn};

/// Publishing options for `args`.
#[must_use]
pub fn options(args: &UploadArgs) -> PublishOptions {
    PublishOptions {
        keep_old: args.keep_old,
        dry_run: DryRun::from(args.dry_run),
        on_error: OnError::from(args.warn_on_upload_failure),
        bottle_dir: args.bottle_dir.clone(),
        work_dir: args.work_dir.clone(),
    }
}

/// Publishes every package in the JSON files of `args.files`.
///
/// Fragments of one package from different machines are combined first so
/// each package becomes one multi-platform image.
///
/// # Errors
///
/// Credentials and schemas are checked before anything is written. After
/// that the first fatal publishing error is returned.
pub fn execute(args: &UploadArgs, ctx: &Context, out: &mut dyn Write) -> miette::Result<Status> {
    let registry = &ctx.config.registry;
    let (user, token) = registry.credentials()?;
    let schema_dir = args.schema_dir.clone().unwrap_or_else(|| registry.schema_dir());
    let validator = JsonSchemaValidator::load(&schema_dir)?;

    let documents = args
        .files
        .iter()
        .map(|path| BottleJson::read(path))
        .collect::<Result<Vec<_>, _>>()?;
    let packages = merge_documents(documents, None)?;

    let tool = SystemTool::new(registry.tool.clone());
    let registry_tool = RegistryTool::new(&tool, user, token);
    let publisher = Publisher::new(&registry_tool, &validator, registry.domain.clone(), ctx.config.linux.clone());
    let options = options(args);

    let mut skipped = 0;
    for package in &packages {
        ctx.interrupt.check()?;
        info!(package = %package.full_name, tags = package.entry.bottle.tags.len(), "Publishing");
        match publisher.publish(&package.full_name, &package.entry, &options)? {
            PublishOutcome::Published { package_url, .. } => {
                writeln!(out, "{package_url}").into_diagnostic()?;
            }
            PublishOutcome::Planned { commands, .. } => {
                for command in commands {
                    writeln!(out, "{command}").into_diagnostic()?;
                }
            }
            PublishOutcome::Skipped { reason } => {
                warn!(package = %package.full_name, "{reason}");
                skipped += 1;
            }
        }
    }

    Ok(Status::from_skipped(skipped))
}
