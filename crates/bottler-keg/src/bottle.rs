//! Bottling one installed package.
//!
//! The sequence for a keg is:
//!
//! 1. lock it, delete Python bytecode
//! 2. relocate (held by a [`RelocationGuard`])
//! 3. rewrite or drop the receipt, normalize timestamps
//! 4. archive and compress
//! 5. scan for leftover install locations to pick the cellar
//! 6. restore the keg, render the bottle block and JSON
//!
//! An error or interrupt anywhere after step 2 restores the keg and deletes
//! the partial bottle before it propagates.

use crate::archive::{ArchiveBuilder, Archiver, BuiltArchive, PartialFile};
use crate::descriptor::{PackageDescriptor, TapInfo};
use crate::error::{Error, Result};
use crate::keg::Keg;
use crate::receipt::{RECEIPT_FILE, Receipt, ReceiptCache};
use crate::relocation::{RelocationGuard, RelocationTable, Relocator};
use crate::scan::KegScanner;
use bottler_core::{ExternalTool, InstallPaths, Interrupt, PlatformTag, SystemTool, ToolArg};
use bottler_spec::{
    BottleFilename, BottleInfo, BottleJson, BottleSpecification, CellarMode, Definition, FormulaInfo,
    PackageEntry, ParsedBlock, TagInfo, render_block,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Finds the published version of a package definition.
pub trait UpstreamLookup {
    /// The definition as it is on the tap's default branch, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn published(&self, descriptor: &PackageDescriptor) -> Result<Option<Definition>>;
}

/// Reads `origin/HEAD:<path>` from the tap checkout.
#[derive(Debug, Clone)]
pub struct GitUpstream<T: ExternalTool = SystemTool> {
    git: T,
}

impl GitUpstream<SystemTool> {
    /// Uses `git` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tool(SystemTool::new("git"))
    }
}

impl Default for GitUpstream<SystemTool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ExternalTool> GitUpstream<T> {
    /// Uses the given git tool.
    pub const fn with_tool(git: T) -> Self {
        Self { git }
    }
}

impl<T: ExternalTool> UpstreamLookup for GitUpstream<T> {
    fn published(&self, descriptor: &PackageDescriptor) -> Result<Option<Definition>> {
        let Some(tap) = &descriptor.tap else {
            return Ok(None);
        };
        if !tap.path.is_dir() {
            return Ok(None);
        }
        let relative = descriptor.path_relative_to(&tap.path);
        let args: Vec<ToolArg> = vec!["show".into(), format!("origin/HEAD:{relative}").into()];
        let output = self.git.invoke(&args, Some(&tap.path), &[])?;
        if !output.success {
            debug!(path = %relative, stderr = %output.stderr.trim(), "No upstream definition");
            return Ok(None);
        }
        Ok(Some(Definition::from_content(&descriptor.path, output.stdout)))
    }
}

/// The platform tag of this host: the configured one, `sw_vers` on macOS,
/// `<arch>_linux` elsewhere.
///
/// # Errors
///
/// Returns an error if the configured tag is invalid or `sw_vers` fails.
pub fn host_tag(configured: Option<&str>, sw_vers: &dyn ExternalTool) -> Result<PlatformTag> {
    if let Some(tag) = configured {
        return Ok(PlatformTag::parse(tag)?);
    }
    if cfg!(target_os = "macos") {
        let args: Vec<ToolArg> = vec!["-productVersion".into()];
        let output = sw_vers.run(&args, None, &[])?;
        let arch = if cfg!(target_arch = "aarch64") { "arm64" } else { "x86_64" };
        Ok(PlatformTag::for_macos_version(arch, output.stdout.trim())?)
    } else {
        Ok(PlatformTag::host_linux())
    }
}

/// Per-run bottling flags.
#[derive(Debug, Clone, Default)]
pub struct BottleOptions {
    /// Do not relocate; the bottle is `any_skip_relocation`.
    pub skip_relocation: bool,
    /// Treat packages without a tap as core packages.
    pub force_core_tap: bool,
    /// Always use rebuild 0.
    pub no_rebuild: bool,
    /// Keep the published root URL, prefix and rebuild.
    pub keep_old: bool,
    /// Write the JSON transport document.
    pub json: bool,
    /// Keep the receipt out of the archive.
    pub only_json_tab: bool,
    /// Root URL override.
    pub root_url: Option<String>,
    /// Download strategy for the root URL.
    pub root_url_using: Option<String>,
    /// Where bottles and JSON are written.
    pub output_dir: PathBuf,
}

/// A finished bottle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottledPackage {
    /// `<name>--<version>.<tag>.bottle[.<rebuild>].tar.gz`
    pub local_filename: String,
    /// Archive path.
    pub path: PathBuf,
    /// Archive sha256.
    pub sha256: String,
    /// Where the bottle may be poured.
    pub cellar: CellarMode,
    /// The one-platform specification.
    pub specification: BottleSpecification,
    /// Rendered bottle block.
    pub block: String,
    /// JSON document, when requested.
    pub json_path: Option<PathBuf>,
    /// Files rewritten by relocation.
    pub changed_files: Vec<String>,
}

/// Result of bottling one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BottleOutcome {
    /// The package cannot be bottled; the run continues.
    Skipped {
        /// Why.
        reason: String,
    },
    /// The bottle was written.
    Bottled(Box<BottledPackage>),
}

fn skipped(reason: impl Into<String>) -> Result<BottleOutcome> {
    Ok(BottleOutcome::Skipped { reason: reason.into() })
}

/// Bottles installed packages.
pub struct Bottler<'a> {
    paths: InstallPaths,
    tag: PlatformTag,
    default_root_url: String,
    archiver: &'a dyn Archiver,
    upstream: &'a dyn UpstreamLookup,
    interrupt: &'a Interrupt,
    receipts: ReceiptCache,
}

impl<'a> Bottler<'a> {
    /// A bottler for kegs under `paths`, producing bottles for `tag`.
    #[must_use]
    pub fn new(
        paths: InstallPaths,
        tag: PlatformTag,
        default_root_url: impl Into<String>,
        archiver: &'a dyn Archiver,
        upstream: &'a dyn UpstreamLookup,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            paths,
            tag,
            default_root_url: default_root_url.into(),
            archiver,
            upstream,
            interrupt,
            receipts: ReceiptCache::new(),
        }
    }

    /// The tag bottles are produced for.
    #[must_use]
    pub const fn tag(&self) -> &PlatformTag {
        &self.tag
    }

    /// Bottles one package.
    ///
    /// # Errors
    ///
    /// Returns an error for fatal failures: relocation or archiving errors,
    /// a repository reference in the keg, or a `--keep-old` mismatch.
    /// Packages that simply cannot be bottled yield
    /// [`BottleOutcome::Skipped`].
    pub fn bottle(&mut self, descriptor: &PackageDescriptor, options: &BottleOptions) -> Result<BottleOutcome> {
        let full_name = descriptor.full_name();
        let keg = Keg::new(&self.paths.cellar, &descriptor.name, descriptor.pkg_version());
        if !keg.exists() {
            return skipped(format!("Formula not installed or up-to-date: {full_name}"));
        }
        let tap = match &descriptor.tap {
            Some(tap) => tap.clone(),
            None if options.force_core_tap => self.core_tap(),
            None => return skipped(format!("Formula not from core or any installed taps: {full_name}")),
        };
        if let Some(reason) = &descriptor.bottle_disabled {
            return skipped(format!("Formula has disabled bottle: {full_name}\n{reason}"));
        }
        if !self.receipts.get(keg.path()).is_ok_and(|r| r.built_as_bottle) {
            return skipped(format!("Formula was not installed with --build-bottle: {full_name}"));
        }
        if !descriptor.stable {
            return skipped(format!("Formula has no stable version: {full_name}"));
        }

        let old_block = Definition::read(&descriptor.path)?.bottle_block(&self.default_root_url)?;
        let rebuild = self.rebuild(descriptor, old_block.as_ref(), options)?;
        let filename = BottleFilename::new(&descriptor.name, descriptor.pkg_version(), self.tag.clone(), rebuild);
        let local_filename = filename.to_string();
        let bottle_path = options.output_dir.join(&local_filename);

        info!("Bottling {local_filename}...");
        let _lock = keg.lock(&self.paths.locks_dir)?;
        keg.delete_pyc_files()?;

        let relocator = Relocator::new(RelocationTable::for_paths(&self.paths)?);
        let mut guard = if options.skip_relocation {
            RelocationGuard::without_relocation(keg.path())
        } else {
            RelocationGuard::acquire(&relocator, keg.path(), self.interrupt)?
        };

        self.receipts.invalidate(keg.path());
        let receipt = self.receipts.get(keg.path())?.clone();
        let receipt_path = Receipt::path_in(keg.path());
        guard.preserve(&receipt_path)?;
        let mut tab = receipt.for_bottle(guard.record().changed_file_names());
        if options.only_json_tab {
            if let Some(files) = &mut tab.changed_files {
                files.retain(|f| f != RECEIPT_FILE);
            }
            bottler_core::fs::remove_file_if_exists(&receipt_path)?;
        } else {
            tab.write(keg.path())?;
        }
        self.receipts.invalidate(keg.path());

        keg.normalize_mtimes(tab.source_modified_time)?;
        let archive = ArchiveBuilder::new(self.archiver, self.interrupt).build(
            &self.paths.cellar,
            &keg.relative_path(),
            &descriptor.name,
            &bottle_path,
            tab.source_modified_time,
        )?;
        let bottle_file = PartialFile::new(&archive.path);

        if archive.path.metadata().is_ok_and(|m| m.len() > 1024 * 1024) {
            info!("Detecting if {local_filename} is relocatable...");
        }
        self.interrupt.check()?;
        let scanner = KegScanner::new(&keg, &self.paths.cellar, &self.paths.prefix);
        let uses_go = descriptor.depends_on_go();
        scanner.ensure_no_repository_reference(&self.paths, uses_go)?;
        let cellar = if options.skip_relocation {
            CellarMode::AnySkipRelocation
        } else if scanner.is_relocatable(&self.paths, &descriptor.package_and_runtime_names(), uses_go)? {
            if guard.record().is_empty() {
                CellarMode::AnySkipRelocation
            } else {
                CellarMode::Any
            }
        } else {
            CellarMode::Fixed(self.paths.cellar.to_string_lossy().into_owned())
        };
        let changed_files = tab.changed_files.clone().unwrap_or_default();
        guard.release()?;

        let root_url = options
            .root_url
            .clone()
            .unwrap_or_else(|| self.default_root_url.clone());
        let mut spec = BottleSpecification::new(root_url)
            .with_rebuild(rebuild)
            .with_root_url_using(options.root_url_using.clone());
        spec.prefix = Some(self.default_prefix());
        spec.add_checksum(self.tag.clone(), &archive.sha256, cellar.clone())?;

        if options.keep_old
            && let Some(old) = &old_block
            && !old.spec.is_empty()
        {
            let mismatches = keep_old_changes(old, &spec, &self.default_prefix());
            if !mismatches.is_empty() {
                return Err(Error::KeepOldMismatch { mismatches });
            }
        }

        let block = render_block(&spec, &self.default_root_url);
        let json_path = if options.json {
            let path = options.output_dir.join(filename.json());
            let document = self.document(descriptor, &tap, &spec, &cellar, &filename, &archive, &tab)?;
            info!("Writing {}", path.display());
            document.write(&path)?;
            Some(path)
        } else {
            None
        };
        bottle_file.commit();

        Ok(BottleOutcome::Bottled(Box::new(BottledPackage {
            local_filename,
            path: archive.path,
            sha256: archive.sha256,
            cellar,
            specification: spec,
            block,
            json_path,
            changed_files,
        })))
    }

    fn rebuild(&self, descriptor: &PackageDescriptor, old: Option<&ParsedBlock>, options: &BottleOptions) -> Result<u32> {
        if options.no_rebuild || descriptor.tap.is_none() {
            return Ok(0);
        }
        if options.keep_old {
            return Ok(old.map_or(0, |b| b.spec.rebuild));
        }

        info!("Determining {} bottle rebuild...", descriptor.full_name());
        let Some(upstream) = self.upstream.published(descriptor)? else {
            return Ok(0);
        };
        if upstream.pkg_version().as_deref() != Some(descriptor.pkg_version().as_str()) {
            return Ok(0);
        }
        let published = upstream.bottle_block(&self.default_root_url)?;
        Ok(published.map_or(0, |b| b.spec.rebuild) + 1)
    }

    fn default_prefix(&self) -> String {
        self.tag
            .default_prefix()
            .map_or_else(|| self.paths.prefix.to_string_lossy().into_owned(), str::to_string)
    }

    fn core_tap(&self) -> TapInfo {
        TapInfo {
            name: "homebrew/core".to_string(),
            path: self.paths.library.join("Taps/homebrew/homebrew-core"),
            git_revision: None,
            remote: None,
        }
    }

    fn document(
        &self,
        descriptor: &PackageDescriptor,
        tap: &TapInfo,
        spec: &BottleSpecification,
        cellar: &CellarMode,
        filename: &BottleFilename,
        archive: &BuiltArchive,
        tab: &Receipt,
    ) -> Result<BottleJson> {
        let modified = archive
            .path
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| Error::io_at(&archive.path, e))?;
        let date = chrono::DateTime::<chrono::Local>::from(modified)
            .format("%F")
            .to_string();

        let formula = FormulaInfo {
            name: descriptor.name.clone(),
            pkg_version: descriptor.pkg_version(),
            path: descriptor.path_relative_to(&self.paths.repository),
            tap_git_path: Some(descriptor.path_relative_to(&tap.path)),
            tap_git_revision: tap.git_revision.clone(),
            tap_git_remote: tap.remote.clone(),
            desc: Some(ascii_only(descriptor.desc.as_deref().unwrap_or_default())),
            license: descriptor.license.clone(),
            homepage: descriptor.homepage.clone(),
        };

        let mut tags = BTreeMap::new();
        tags.insert(
            self.tag.clone(),
            TagInfo {
                filename: filename.url_encode(),
                local_filename: filename.to_string(),
                sha256: archive.sha256.clone(),
                cellar: None,
                formulae_brew_sh_path: Some(formulae_path().to_string()),
                tab: tab.to_bottle_tab(),
            },
        );
        let bottle = BottleInfo {
            root_url: spec.root_url.clone(),
            prefix: spec.prefix.clone(),
            cellar: Some(cellar.as_str().to_string()),
            rebuild: spec.rebuild,
            date: Some(date),
            tags,
        };

        Ok(BottleJson::single(
            descriptor.full_name(),
            PackageEntry { formula, bottle },
        ))
    }
}

/// Differences in root URL, prefix and rebuild against a published block.
#[must_use]
pub fn keep_old_changes(old: &ParsedBlock, new: &BottleSpecification, default_prefix: &str) -> Vec<String> {
    let mut mismatches = Vec::new();
    if old.spec.root_url != new.root_url {
        mismatches.push(format!(
            "root_url: old: {:?}, new: {:?}",
            old.spec.root_url, new.root_url
        ));
    }
    let old_prefix = old.spec.prefix.as_deref().unwrap_or(default_prefix);
    let new_prefix = new.prefix.as_deref().unwrap_or(default_prefix);
    if old_prefix != new_prefix {
        mismatches.push(format!("prefix: old: {old_prefix:?}, new: {new_prefix:?}"));
    }
    if old.spec.rebuild != new.rebuild {
        mismatches.push(format!(
            "rebuild: old: {}, new: {}",
            old.spec.rebuild, new.rebuild
        ));
    }
    mismatches
}

fn formulae_path() -> &'static str {
    if cfg!(target_os = "linux") {
        "formula-linux"
    } else {
        "formula"
    }
}

fn ascii_only(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii)
        .collect::<String>()
        .trim()
        .to_string()
}
