//! Publishing bottles as OCI images.
//!
//! Each package becomes one image tagged with its version: an index whose
//! manifests each carry one platform's bottle as their only layer. With
//! `keep_old` the published index is downloaded first and new platforms are
//! appended to it.

use crate::documents::{
    Annotations, CONFIG_MEDIA_TYPE, CREATED, DOCUMENTATION, Descriptor, INDEX_MEDIA_TYPE, ImageConfig, ImageIndex,
    ImageManifest, LAYER_MEDIA_TYPE, LayoutMarker, MANIFEST_MEDIA_TYPE, Platform, REF_NAME, TITLE, annotations,
};
use crate::error::{Error, Result};
use crate::layout::{INDEX_FILE, ImageLayout, StoredBlob};
use crate::registry::{
    CredentialFlag, Inspection, RegistryTarget, RegistryTool, image_formula_name, image_version_rebuild,
    oci_reference,
};
use crate::schema::{SchemaKind, SchemaValidator};
use bottler_core::{DryRun, LinuxDefaults, OnError, OsFamily, PlatformTag, digest};
use bottler_spec::filename::version_rebuild;
use bottler_spec::{BottleJson, PackageEntry, TagInfo};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Package type annotation value.
pub const PACKAGE_TYPE: &str = "homebrew_bottle";

/// Per-run publishing flags.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Extend the published image instead of replacing it.
    pub keep_old: bool,
    /// Print the registry commands instead of running them.
    pub dry_run: DryRun,
    /// Whether registry failures skip the package or abort.
    pub on_error: OnError,
    /// Where the bottle archives named in the JSON live.
    pub bottle_dir: PathBuf,
    /// Where image layouts are assembled.
    pub work_dir: PathBuf,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            keep_old: false,
            dry_run: DryRun::No,
            on_error: OnError::Fail,
            bottle_dir: PathBuf::from("."),
            work_dir: PathBuf::from("."),
        }
    }
}

/// Result of publishing one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The image was pushed.
    Published {
        /// Image reference.
        image_uri: String,
        /// Package web page.
        package_url: String,
        /// Local image layout.
        layout: PathBuf,
    },
    /// Dry run: the layout was built and these commands would run.
    Planned {
        /// Image reference.
        image_uri: String,
        /// Command lines, credentials replaced by their variable.
        commands: Vec<String>,
        /// Local image layout.
        layout: PathBuf,
    },
    /// A registry error was demoted to a warning.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// Builds image layouts and pushes them with the registry tool.
pub struct Publisher<'a> {
    registry: &'a RegistryTool<'a>,
    validator: &'a dyn SchemaValidator,
    domain: String,
    linux: LinuxDefaults,
}

impl<'a> Publisher<'a> {
    /// A publisher pushing to `domain`.
    #[must_use]
    pub fn new(
        registry: &'a RegistryTool<'a>,
        validator: &'a dyn SchemaValidator,
        domain: impl Into<String>,
        linux: LinuxDefaults,
    ) -> Self {
        Self {
            registry,
            validator,
            domain: domain.into(),
            linux,
        }
    }

    /// Publishes every package in a bottle document.
    ///
    /// # Errors
    ///
    /// Stops at the first package that fails.
    pub fn publish_all(&self, document: &BottleJson, options: &PublishOptions) -> Result<Vec<(String, PublishOutcome)>> {
        document
            .iter()
            .map(|(full_name, entry)| Ok((full_name.clone(), self.publish(full_name, entry, options)?)))
            .collect()
    }

    /// Publishes one package.
    ///
    /// # Errors
    ///
    /// Returns an error if the root URL is not a registry repository, a
    /// document fails validation, a platform is already in the published
    /// index, or a registry command fails while `on_error` is `Fail`.
    pub fn publish(&self, full_name: &str, entry: &PackageEntry, options: &PublishOptions) -> Result<PublishOutcome> {
        let formula = &entry.formula;
        let bottle = &entry.bottle;
        let target = RegistryTarget::from_root_url(&bottle.root_url, &self.domain)?;
        let version = formula.pkg_version.as_str();
        let base_ref = version_rebuild(version, bottle.rebuild, None);
        let image_name = image_formula_name(&formula.name);
        let image_uri = target.image_uri(&image_name, &image_version_rebuild(&base_ref));
        let dry_run = options.dry_run.is_dry_run();
        let mut commands = Vec::new();

        let mut keep_old = options.keep_old;
        if dry_run {
            commands.push(self.registry.command_line(&self.registry.inspect_args(&image_uri)));
        } else {
            match self.registry.inspect(&image_uri)? {
                Inspection::Failed { stderr } => {
                    return demote(
                        options,
                        format!("{image_uri} inspection returned an error, skipping upload!\n{stderr}"),
                        Error::Inspect {
                            image: image_uri.clone(),
                            stderr,
                        },
                    );
                }
                Inspection::Missing if keep_old => {
                    debug!(image = %image_uri, "No published image, uploading fresh");
                    keep_old = false;
                }
                Inspection::Exists if !keep_old => {
                    return demote(
                        options,
                        format!("{image_uri} already exists, skipping upload!"),
                        Error::AlreadyExists {
                            image: image_uri.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        let root = options.work_dir.join(format!("{}--{base_ref}", formula.name));
        let layout = ImageLayout::create(&root)?;
        let existing = if keep_old && !dry_run {
            self.registry.copy(&image_uri, &oci_reference(&root), CredentialFlag::Source)?;
            Some(take_published_index(&layout)?)
        } else {
            if keep_old {
                let download = self
                    .registry
                    .copy_args(&image_uri, &oci_reference(&root), CredentialFlag::Source);
                commands.push(self.registry.command_line(&download));
            }
            self.validate(SchemaKind::Layout, &LayoutMarker::default())?;
            layout.write_marker(&LayoutMarker::default())?;
            None
        };
        layout.ensure_dirs()?;

        let core_tap = !full_name.contains('/');
        let (shared_annotations, mut manifests) = match existing {
            Some(index) => (index.annotations, index.manifests),
            None => (formula_annotations(full_name, entry, &target, core_tap, &base_ref), Vec::new()),
        };

        let mut processed: HashSet<String> = manifests
            .iter()
            .filter_map(|m| m.ref_name().map(str::to_string))
            .collect();

        for (tag, tag_info) in &bottle.tags {
            let tag_ref = version_rebuild(version, bottle.rebuild, Some(tag));
            if !processed.insert(tag_ref.clone()) {
                return Err(Error::DuplicatePlatform {
                    tag: tag.to_string(),
                });
            }
            let documentation = if core_tap {
                let dir = tag_info.formulae_brew_sh_path.as_deref().unwrap_or("formula");
                Some(format!("https://formulae.brew.sh/{dir}/{}", formula.name))
            } else {
                shared_annotations.get(DOCUMENTATION).cloned()
            };
            let manifest = self.platform_manifest(
                &layout,
                options,
                tag,
                tag_info,
                &tag_ref,
                &shared_annotations,
                documentation,
                &format!("{full_name} {tag_ref}"),
                bottle.date.as_deref(),
            )?;
            manifests.push(manifest);
        }

        let index = ImageIndex::new(manifests, shared_annotations);
        let index_blob = self.write_validated(&layout, SchemaKind::Index, &index)?;
        let index_json = ImageIndex::new(
            vec![
                Descriptor::new(INDEX_MEDIA_TYPE, &index_blob.sha256, index_blob.size)
                    .with_annotations(annotations([(REF_NAME, Some(base_ref.as_str()))])),
            ],
            Annotations::new(),
        );
        self.validate(SchemaKind::Index, &index_json)?;
        layout.write_root_json(INDEX_FILE, &index_json)?;

        if dry_run {
            let upload = self
                .registry
                .copy_args(&oci_reference(&root), &image_uri, CredentialFlag::Destination);
            commands.push(self.registry.command_line(&upload));
            return Ok(PublishOutcome::Planned {
                image_uri,
                commands,
                layout: root,
            });
        }

        if let Err(e) = self
            .registry
            .copy(&oci_reference(&root), &image_uri, CredentialFlag::Destination)
        {
            return demote(options, format!("{image_uri} upload failed, skipping!\n{e}"), e);
        }
        let package_url = target.package_url(&image_name);
        info!("Uploaded to {package_url}");
        Ok(PublishOutcome::Published {
            image_uri,
            package_url,
            layout: root,
        })
    }

    fn platform_manifest(
        &self,
        layout: &ImageLayout,
        options: &PublishOptions,
        tag: &PlatformTag,
        tag_info: &TagInfo,
        tag_ref: &str,
        formula_annotations: &Annotations,
        documentation: Option<String>,
        title: &str,
        created: Option<&str>,
    ) -> Result<Descriptor> {
        let local_file = options.bottle_dir.join(&tag_info.local_filename);
        debug!(file = %local_file.display(), "Uploading");
        let layer = layout.copy_blob(&local_file)?;

        let tab = &tag_info.tab;
        let arch = tab
            .arch
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| tag.arch())
            .unwrap_or_default();
        let architecture = match arch {
            "arm64" => "arm64",
            "x86_64" => "amd64",
            other => {
                return Err(Error::UnknownArchitecture {
                    arch: other.to_string(),
                });
            }
        };

        let built_on = tab.built_on.as_ref();
        let os = match built_on.and_then(|b| b.os.as_deref()).filter(|o| !o.is_empty()) {
            Some(name) => bottler_core::platform::oci_os(name).ok_or_else(|| Error::UnknownOs {
                os: name.to_string(),
            })?,
            None if tag.os() == OsFamily::Linux => "linux",
            None => "darwin",
        };
        let mut os_version = built_on
            .and_then(|b| b.os_version.clone())
            .filter(|v| !v.is_empty());
        let mut glibc_version = None;
        let mut cpu_variant = None;
        if os == "darwin" {
            os_version = os_version.or_else(|| tag.os_version());
        } else {
            os_version = Some(
                os_version
                    .map(|v| v.trim_end_matches(" LTS").to_string())
                    .unwrap_or_else(|| self.linux.os_version.clone()),
            );
            glibc_version = Some(
                built_on
                    .and_then(|b| b.glibc_version.clone())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| self.linux.glibc_version.clone()),
            );
            cpu_variant = Some(
                tab.oldest_cpu_family
                    .clone()
                    .unwrap_or_else(|| self.linux.cpu_family.clone()),
            );
        }
        let platform = Platform {
            architecture: architecture.to_string(),
            os: os.to_string(),
            os_version: os_version.filter(|v| !v.is_empty()),
        };

        let tar_sha256 = digest::sha256_gunzipped(&local_file)?;
        let config = ImageConfig::single_layer(platform.clone(), &tar_sha256);
        let config_blob = self.write_validated(layout, SchemaKind::Config, &config)?;

        let descriptor_annotations = annotations([
            (REF_NAME, Some(tag_ref.to_string())),
            ("sh.brew.bottle.cpu.variant", cpu_variant),
            ("sh.brew.bottle.digest", Some(layer.sha256.clone())),
            ("sh.brew.bottle.glibc.version", glibc_version),
            ("sh.brew.tab", Some(serde_json::to_string(tab)?)),
        ]);

        let mut manifest_annotations = formula_annotations.clone();
        manifest_annotations.extend(descriptor_annotations.clone());
        for (key, value) in [
            (CREATED, created.map(str::to_string)),
            (DOCUMENTATION, documentation),
            (TITLE, Some(title.to_string())),
        ] {
            match value.filter(|v| !v.trim().is_empty()) {
                Some(value) => manifest_annotations.insert(key.to_string(), value),
                None => manifest_annotations.remove(key),
            };
        }

        let manifest = ImageManifest {
            schema_version: 2,
            config: Descriptor::new(CONFIG_MEDIA_TYPE, &config_blob.sha256, config_blob.size),
            layers: vec![
                Descriptor::new(LAYER_MEDIA_TYPE, &layer.sha256, layer.size)
                    .with_annotations(annotations([(TITLE, Some(tag_info.local_filename.as_str()))])),
            ],
            annotations: manifest_annotations,
        };
        let manifest_blob = self.write_validated(layout, SchemaKind::Manifest, &manifest)?;

        Ok(
            Descriptor::new(MANIFEST_MEDIA_TYPE, &manifest_blob.sha256, manifest_blob.size)
                .with_platform(platform)
                .with_annotations(descriptor_annotations),
        )
    }

    fn validate<T: Serialize>(&self, kind: SchemaKind, document: &T) -> Result<serde_json::Value> {
        let value = serde_json::to_value(document)?;
        self.validator.validate(kind, &value)?;
        Ok(value)
    }

    fn write_validated<T: Serialize>(&self, layout: &ImageLayout, kind: SchemaKind, document: &T) -> Result<StoredBlob> {
        let value = self.validate(kind, document)?;
        layout.write_json_blob(&value)
    }
}

/// Annotations shared by the index and every manifest.
fn formula_annotations(
    full_name: &str,
    entry: &PackageEntry,
    target: &RegistryTarget,
    core_tap: bool,
    version_rebuild: &str,
) -> Annotations {
    let formula = &entry.formula;
    let revision = formula.tap_git_revision.clone();
    let source = format!(
        "https://github.com/{}/blob/{}/{}",
        target.source_repo(),
        revision.as_deref().filter(|r| !r.is_empty()).unwrap_or("HEAD"),
        formula.tap_git_path.as_deref().unwrap_or_default()
    );
    let documentation = if core_tap {
        Some(format!("https://formulae.brew.sh/formula/{}", formula.name))
    } else {
        formula
            .tap_git_remote
            .clone()
            .filter(|r| r.starts_with("https://github.com/"))
    };

    annotations([
        ("com.github.package.type", Some(PACKAGE_TYPE.to_string())),
        (CREATED, entry.bottle.date.clone()),
        ("org.opencontainers.image.description", formula.desc.clone()),
        (DOCUMENTATION, documentation),
        ("org.opencontainers.image.license", formula.license.clone()),
        (REF_NAME, Some(version_rebuild.to_string())),
        ("org.opencontainers.image.revision", revision),
        ("org.opencontainers.image.source", Some(source)),
        (TITLE, Some(full_name.to_string())),
        ("org.opencontainers.image.url", formula.homepage.clone()),
        ("org.opencontainers.image.vendor", Some(target.org.clone())),
        ("org.opencontainers.image.version", Some(formula.pkg_version.clone())),
    ])
}

/// Downgrades `error` to a skip when registry errors only warn.
fn demote(options: &PublishOptions, reason: String, error: Error) -> Result<PublishOutcome> {
    match options.on_error {
        OnError::Warn => {
            warn!("{reason}");
            Ok(PublishOutcome::Skipped { reason })
        }
        OnError::Fail => Err(error),
    }
}

/// Reads the published index out of a downloaded layout and removes its blob
/// so the rewritten index replaces it.
fn take_published_index(layout: &ImageLayout) -> Result<ImageIndex> {
    let top = layout.read_index()?;
    let Some(first) = top.manifests.first() else {
        return Err(Error::layout(layout.root().join(INDEX_FILE), "no image index in the layout"));
    };
    let (algorithm, hex) = digest::split_digest(&first.digest);
    if algorithm != "sha256" {
        return Err(Error::layout(
            layout.root().join(INDEX_FILE),
            format!("unsupported digest {}", first.digest),
        ));
    }
    digest::validate_sha256(hex)?;
    let index: ImageIndex = layout.read_json_blob(&first.digest)?;
    layout.remove_blob(&first.digest)?;
    debug!(platforms = index.manifests.len(), "Read published image index");
    Ok(index)
}
