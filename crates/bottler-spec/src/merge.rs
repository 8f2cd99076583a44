//! Merging per-platform bottle fragments.
//!
//! Each build machine produces one JSON fragment. Merging:
//!
//! 1. hoists the shared `cellar` into every tag and deep-merges the fragments
//!    per package, rejecting disagreeing duplicates;
//! 2. collapses identical `{cellar, sha256}` pairs across every tag into a
//!    single `all` entry;
//! 3. with `write`, compares against the definition's current bottle block,
//!    checks `keep_old` mismatches before touching anything, then rearranges
//!    artifacts, patches the definition and commits it.

use crate::definition::Definition;
use crate::error::{Error, Result};
use crate::filename::BottleFilename;
use crate::json::{BottleInfo, BottleJson, PackageEntry, TagInfo};
use crate::model::{BottleSpecification, CellarMode, ChecksumEntry};
use crate::text::{ParsedBlock, render_block};
use crate::vcs::{BlockChange, Committer, commit_message};
use bottler_core::PlatformTag;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A package after its fragments were combined.
#[derive(Debug, Clone)]
pub struct MergedBottle {
    /// Full package name.
    pub full_name: String,
    /// Combined entry, cellars hoisted into the tags.
    pub entry: PackageEntry,
    /// Specification for the bottle block.
    pub spec: BottleSpecification,
    /// Whether every tag shares one archive.
    pub all_bottle: bool,
}

/// Combines fragments by package.
///
/// # Errors
///
/// Returns a merge conflict if fragments of one package disagree on version,
/// root URL, rebuild, or on the digest/cellar of a repeated tag.
pub fn merge_documents(documents: Vec<BottleJson>, root_url_using: Option<&str>) -> Result<Vec<MergedBottle>> {
    let mut merged: BTreeMap<String, PackageEntry> = BTreeMap::new();

    for document in documents {
        for (name, mut entry) in document.into_entries() {
            entry.bottle.hoist_cellar();
            match merged.get_mut(&name) {
                Some(existing) => merge_entry(&name, existing, entry)?,
                None => {
                    merged.insert(name, entry);
                }
            }
        }
    }

    merged
        .into_iter()
        .map(|(full_name, entry)| {
            let (spec, all_bottle) = build_specification(&full_name, &entry, root_url_using)?;
            Ok(MergedBottle {
                full_name,
                entry,
                spec,
                all_bottle,
            })
        })
        .collect()
}

fn merge_entry(name: &str, existing: &mut PackageEntry, incoming: PackageEntry) -> Result<()> {
    if existing.formula.pkg_version != incoming.formula.pkg_version {
        return Err(Error::merge_conflict(
            name,
            format!(
                "pkg_version {} vs {}",
                existing.formula.pkg_version, incoming.formula.pkg_version
            ),
        ));
    }
    if existing.bottle.root_url != incoming.bottle.root_url {
        return Err(Error::merge_conflict(
            name,
            format!("root_url {} vs {}", existing.bottle.root_url, incoming.bottle.root_url),
        ));
    }
    if existing.bottle.rebuild != incoming.bottle.rebuild {
        return Err(Error::merge_conflict(
            name,
            format!("rebuild {} vs {}", existing.bottle.rebuild, incoming.bottle.rebuild),
        ));
    }

    for (tag, info) in incoming.bottle.tags {
        match existing.bottle.tags.get(&tag) {
            Some(current) if current.sha256 == info.sha256 && current.cellar == info.cellar => {
                debug!(%name, %tag, "Identical duplicate tag");
            }
            Some(current) => {
                return Err(Error::merge_conflict(
                    name,
                    format!(
                        "{tag}: sha256 {} cellar {:?} vs sha256 {} cellar {:?}",
                        current.sha256, current.cellar, info.sha256, info.cellar
                    ),
                ));
            }
            None => {
                existing.bottle.tags.insert(tag, info);
            }
        }
    }

    existing.formula = incoming.formula;
    if incoming.bottle.prefix.is_some() {
        existing.bottle.prefix = incoming.bottle.prefix;
    }
    if incoming.bottle.date.is_some() {
        existing.bottle.date = incoming.bottle.date;
    }
    Ok(())
}

fn tag_cellar(name: &str, tag: &PlatformTag, info: &TagInfo) -> Result<CellarMode> {
    info.cellar
        .as_deref()
        .map(CellarMode::parse)
        .ok_or_else(|| Error::merge_conflict(name, format!("no cellar recorded for {tag}")))
}

/// Builds the bottle specification for a merged entry.
///
/// Returns the specification and whether it collapsed to a single `all` tag.
///
/// # Errors
///
/// Returns an error if a tag has no cellar or an invalid digest.
pub fn build_specification(
    full_name: &str,
    entry: &PackageEntry,
    root_url_using: Option<&str>,
) -> Result<(BottleSpecification, bool)> {
    let tags = &entry.bottle.tags;
    let distinct: BTreeSet<(Option<&str>, &str)> = tags
        .values()
        .map(|t| (t.cellar.as_deref(), t.sha256.as_str()))
        .collect();
    let all_bottle = tags.len() > 1 && distinct.len() == 1;

    let mut spec = BottleSpecification::new(&entry.bottle.root_url)
        .with_rebuild(entry.bottle.rebuild)
        .with_root_url_using(root_url_using.map(str::to_string));
    spec.prefix.clone_from(&entry.bottle.prefix);

    for (tag, info) in tags {
        let cellar = tag_cellar(full_name, tag, info)?;
        if all_bottle {
            spec.add_checksum(PlatformTag::all(), &info.sha256, cellar)?;
            break;
        }
        spec.add_checksum(tag.clone(), &info.sha256, cellar)?;
    }

    Ok((spec, all_bottle))
}

/// Compares a published bottle block with new values for `keep_old`.
///
/// Returns the mismatch lines and the old checksums to carry over.
#[must_use]
pub fn keep_old_mismatches(old: &ParsedBlock, new: &BottleInfo) -> (Vec<String>, Vec<ChecksumEntry>) {
    let mut mismatches = Vec::new();
    let mut checksums = Vec::new();

    for key in &old.keys {
        let (old_value, new_value) = match key.as_str() {
            "root_url" => (old.spec.root_url.clone(), new.root_url.clone()),
            "prefix" => (
                old.spec.prefix.clone().unwrap_or_default(),
                new.prefix.clone().unwrap_or_default(),
            ),
            "rebuild" => (old.spec.rebuild.to_string(), new.rebuild.to_string()),
            _ => continue,
        };
        if old_value.is_empty() || old_value != new_value {
            mismatches.push(format!("{key}: old: {old_value:?}, new: {new_value:?}"));
        }
    }

    if !old.has_key("sha256") {
        return (mismatches, checksums);
    }

    for old_entry in old.spec.checksums() {
        match new.tags.get(&old_entry.tag) {
            Some(info) if info.sha256 != old_entry.digest => mismatches.push(format!(
                "sha256 {}: old: {:?}, new: {:?}",
                old_entry.tag, old_entry.digest, info.sha256
            )),
            Some(info) if info.cellar.as_deref() != Some(old_entry.cellar.as_str()) => {
                mismatches.push(format!(
                    "cellar {}: old: {:?}, new: {:?}",
                    old_entry.tag,
                    old_entry.cellar.as_str(),
                    info.cellar.as_deref().unwrap_or_default()
                ));
            }
            _ => checksums.push(old_entry.clone()),
        }
    }

    (mismatches, checksums)
}

/// Merge settings.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Rewrite definition files instead of only printing blocks.
    pub write: bool,
    /// Keep published values and fail on differences.
    pub keep_old: bool,
    /// Skip the commit after rewriting.
    pub no_commit: bool,
    /// Download strategy for the `root_url` line.
    pub root_url_using: Option<String>,
    /// Root URL omitted from blocks.
    pub default_root_url: String,
    /// Directory definition paths are relative to.
    pub repository: PathBuf,
    /// Directory holding the bottle archives and JSON fragments.
    pub artifact_dir: PathBuf,
}

/// What happened to one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged block, printed only.
    Printed {
        /// Rendered bottle block.
        block: String,
    },
    /// The definition already matched; redundant artifacts were removed.
    Unchanged {
        /// Files that were deleted.
        removed: Vec<PathBuf>,
    },
    /// The definition was rewritten.
    Written {
        /// Rendered bottle block.
        block: String,
        /// Whether the block was added or replaced.
        change: BlockChange,
        /// Whether a commit was made.
        committed: bool,
        /// Files that were deleted.
        removed: Vec<PathBuf>,
    },
}

/// Runs merges and applies them to definitions.
pub struct MergeEngine<'a> {
    options: MergeOptions,
    committer: &'a dyn Committer,
}

impl<'a> MergeEngine<'a> {
    /// Creates an engine.
    #[must_use]
    pub fn new(options: MergeOptions, committer: &'a dyn Committer) -> Self {
        Self { options, committer }
    }

    /// Merges `documents` and, with `write`, applies each package.
    ///
    /// # Errors
    ///
    /// Returns the first conflict, mismatch or I/O failure.
    pub fn run(&self, documents: Vec<BottleJson>) -> Result<Vec<(String, MergeOutcome)>> {
        let merged = merge_documents(documents, self.options.root_url_using.as_deref())?;
        let mut outcomes = Vec::with_capacity(merged.len());

        for bottle in merged {
            info!(name = %bottle.full_name, tags = bottle.entry.bottle.tags.len(), all = bottle.all_bottle, "Merging bottle");
            let full_name = bottle.full_name.clone();
            let outcome = if self.options.write {
                self.write(bottle)?
            } else {
                MergeOutcome::Printed {
                    block: render_block(&bottle.spec, &self.options.default_root_url),
                }
            };
            outcomes.push((full_name, outcome));
        }

        Ok(outcomes)
    }

    fn write(&self, bottle: MergedBottle) -> Result<MergeOutcome> {
        let MergedBottle {
            full_name,
            entry,
            mut spec,
            all_bottle,
        } = bottle;
        let path = self.options.repository.join(&entry.formula.path);
        let mut definition = Definition::read(&path)?;
        let old = definition.bottle_block(&self.options.default_root_url)?;

        let no_changes = old
            .as_ref()
            .is_some_and(|old| is_unchanged(&definition, &entry, &spec, old));

        // Every check that can fail runs before any file is touched.
        let (carried, change) = match &old {
            None => (Vec::new(), BlockChange::Add),
            Some(old) if self.options.keep_old && !no_changes => {
                let (mismatches, carried) = keep_old_mismatches(old, &entry.bottle);
                if !mismatches.is_empty() {
                    return Err(Error::KeepOldMismatch { mismatches });
                }
                (carried, BlockChange::Update)
            }
            Some(_) => (Vec::new(), BlockChange::Update),
        };
        for checksum in carried {
            spec.merge_checksum(checksum)?;
        }
        let block = render_block(&spec, &self.options.default_root_url);
        if !no_changes {
            match change {
                BlockChange::Update => definition.replace_bottle_block(&block)?,
                BlockChange::Add => definition.add_bottle_block(&block)?,
            }
        }

        let removed = self.rearrange_artifacts(&full_name, &entry, all_bottle, no_changes)?;
        if no_changes {
            info!(name = %full_name, "No bottle changes");
            return Ok(MergeOutcome::Unchanged { removed });
        }
        definition.write()?;

        let committed = if self.options.no_commit {
            false
        } else {
            let message = commit_message(&full_name, change, &entry.formula.pkg_version);
            self.committer.commit(&path, &message)?;
            true
        };

        Ok(MergeOutcome::Written {
            block,
            change,
            committed,
            removed,
        })
    }

    fn rearrange_artifacts(
        &self,
        full_name: &str,
        entry: &PackageEntry,
        all_bottle: bool,
        no_changes: bool,
    ) -> Result<Vec<PathBuf>> {
        let dir = &self.options.artifact_dir;
        let filename_for = |tag: PlatformTag| {
            BottleFilename::new(
                &entry.formula.name,
                &entry.formula.pkg_version,
                tag,
                entry.bottle.rebuild,
            )
        };

        if all_bottle && let Some((first_tag, first)) = entry.bottle.tags.iter().next() {
            let source = filename_for(first_tag.clone());
            let all = filename_for(PlatformTag::all());

            let mut all_tag = first.clone();
            all_tag.filename = all.url_encode();
            all_tag.local_filename = all.to_string();
            let cellar = all_tag.cellar.take();

            let mut all_entry = entry.clone();
            all_entry.bottle.cellar = cellar;
            all_entry.bottle.tags = BTreeMap::from([(PlatformTag::all(), all_tag)]);

            info!(from = %source, to = %all, "Copying bottle");
            copy_file(&dir.join(source.to_string()), &dir.join(all.to_string()))?;
            BottleJson::single(full_name, all_entry).write(&dir.join(all.json()))?;
        }

        let mut removed = Vec::new();
        if all_bottle || no_changes {
            for tag in entry.bottle.tags.keys() {
                let filename = filename_for(tag.clone());
                for path in [dir.join(filename.to_string()), dir.join(filename.json())] {
                    if bottler_core::fs::remove_file_if_exists(&path)? {
                        debug!(path = %path.display(), "Removed");
                        removed.push(path);
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn is_unchanged(definition: &Definition, entry: &PackageEntry, spec: &BottleSpecification, old: &ParsedBlock) -> bool {
    let version_matches = definition
        .pkg_version()
        .is_none_or(|v| v == entry.formula.pkg_version);

    version_matches
        && spec.rebuild == old.spec.rebuild
        && spec.root_url == old.spec.root_url
        && spec.checksums().iter().all(|new| {
            old.spec
                .exact_checksum(&new.tag)
                .is_some_and(|previous| previous.same_artifact(new))
        })
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to).map_err(|e| bottler_core::Error::io_at(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::tests::{SHA_A, fragment};
    use pretty_assertions::assert_eq;

    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_identical_fragments_collapse_to_all() {
        let merged = merge_documents(
            vec![
                fragment("linux-x64", SHA_A, "any", 0),
                fragment("macos-arm64", SHA_A, "any", 0),
            ],
            None,
        )
        .unwrap();

        assert_eq!(merged.len(), 1);
        let bottle = &merged[0];
        assert!(bottle.all_bottle);
        assert_eq!(bottle.spec.len(), 1);
        let entry = bottle.spec.checksums()[0];
        assert!(entry.tag.is_all());
        assert_eq!(entry.digest, SHA_A);
        assert_eq!(entry.cellar, CellarMode::Any);
    }

    #[test]
    fn test_different_digests_keep_tags() {
        let merged = merge_documents(
            vec![
                fragment("arm64_sonoma", SHA_A, "any", 0),
                fragment("x86_64_linux", SHA_B, "any", 0),
            ],
            None,
        )
        .unwrap();
        assert!(!merged[0].all_bottle);
        assert_eq!(merged[0].spec.len(), 2);
    }

    #[test]
    fn test_single_fragment_is_not_all() {
        let merged = merge_documents(vec![fragment("arm64_sonoma", SHA_A, "any", 0)], None).unwrap();
        assert!(!merged[0].all_bottle);
    }

    #[test]
    fn test_same_digest_different_cellar_does_not_collapse() {
        let merged = merge_documents(
            vec![
                fragment("arm64_sonoma", SHA_A, "any", 0),
                fragment("sonoma", SHA_A, "/usr/local/Cellar", 0),
            ],
            None,
        )
        .unwrap();
        assert!(!merged[0].all_bottle);
    }

    #[test]
    fn test_duplicate_tag_identical_is_tolerated() {
        let merged = merge_documents(
            vec![
                fragment("arm64_sonoma", SHA_A, "any", 0),
                fragment("arm64_sonoma", SHA_A, "any", 0),
            ],
            None,
        )
        .unwrap();
        assert_eq!(merged[0].spec.len(), 1);
    }

    #[test]
    fn test_duplicate_tag_conflict() {
        let err = merge_documents(
            vec![
                fragment("arm64_sonoma", SHA_A, "any", 0),
                fragment("arm64_sonoma", SHA_B, "any", 0),
            ],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MergeConflict { .. }));
    }

    #[test]
    fn test_rebuild_conflict() {
        let err = merge_documents(
            vec![
                fragment("arm64_sonoma", SHA_A, "any", 1),
                fragment("x86_64_linux", SHA_B, "any", 2),
            ],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rebuild"));
    }

    #[test]
    fn test_keep_old_mismatches() {
        let old = crate::text::parse_bottle_block(
            &format!(
                "  bottle do\n    rebuild 2\n    sha256 cellar: :any, arm64_sonoma: \"{SHA_A}\"\n    sha256 cellar: :any, ventura: \"{SHA_A}\"\n  end\n"
            ),
            "https://ghcr.io/v2/homebrew/core",
        )
        .unwrap()
        .unwrap();

        let mut doc = fragment("arm64_sonoma", SHA_B, "any", 3)
            .into_entries()
            .remove("foo")
            .unwrap();
        doc.bottle.hoist_cellar();

        let (mismatches, carried) = keep_old_mismatches(&old, &doc.bottle);
        assert_eq!(
            mismatches,
            vec![
                "rebuild: old: \"2\", new: \"3\"".to_string(),
                format!("sha256 arm64_sonoma: old: \"{SHA_A}\", new: \"{SHA_B}\""),
            ]
        );
        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].tag.as_str(), "ventura");
    }
}
