//! OCI image documents.
//!
//! Field names follow the image-spec JSON spelling; annotation maps are
//! `BTreeMap`s so documents serialize with sorted keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Config blob media type.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// Manifest media type.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// Index media type.
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// Bottle layer media type.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// `org.opencontainers.image.ref.name`
pub const REF_NAME: &str = "org.opencontainers.image.ref.name";
/// `org.opencontainers.image.title`
pub const TITLE: &str = "org.opencontainers.image.title";
/// `org.opencontainers.image.created`
pub const CREATED: &str = "org.opencontainers.image.created";
/// `org.opencontainers.image.documentation`
pub const DOCUMENTATION: &str = "org.opencontainers.image.documentation";

/// Annotation map.
pub type Annotations = BTreeMap<String, String>;

/// Builds annotations from optional values, dropping blank ones.
#[must_use]
pub fn annotations<K, V>(entries: impl IntoIterator<Item = (K, Option<V>)>) -> Annotations
where
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?.into();
            (!value.trim().is_empty()).then(|| (key.into(), value))
        })
        .collect()
}

/// Target platform of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// OCI architecture (`amd64`, `arm64`).
    pub architecture: String,
    /// OCI OS (`darwin`, `linux`).
    pub os: String,
    /// OS version, e.g. `macOS 14` or `Ubuntu 22.04`.
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

/// Root filesystem of an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Always `layers`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Digests of the uncompressed layers.
    pub diff_ids: Vec<String>,
}

/// Image config blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Platform fields, inlined.
    #[serde(flatten)]
    pub platform: Platform,
    /// Layer diff ids.
    pub rootfs: RootFs,
}

impl ImageConfig {
    /// Config for a single layer whose uncompressed sha256 is `tar_sha256`.
    #[must_use]
    pub fn single_layer(platform: Platform, tar_sha256: &str) -> Self {
        Self {
            platform,
            rootfs: RootFs {
                kind: "layers".to_string(),
                diff_ids: vec![bottler_core::digest::oci_digest(tar_sha256)],
            },
        }
    }
}

/// Reference to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    pub media_type: String,
    /// `sha256:<hex>`.
    pub digest: String,
    /// Byte length.
    pub size: u64,
    /// Platform, on index entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Descriptor {
    /// A descriptor for a blob of `size` bytes with hex digest `sha256`.
    #[must_use]
    pub fn new(media_type: &str, sha256: &str, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: bottler_core::digest::oci_digest(sha256),
            size,
            platform: None,
            annotations: Annotations::new(),
        }
    }

    /// Sets the platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Sets the annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// The hex part of the digest.
    #[must_use]
    pub fn sha256(&self) -> &str {
        bottler_core::digest::split_digest(&self.digest).1
    }

    /// The `ref.name` annotation.
    #[must_use]
    pub fn ref_name(&self) -> Option<&str> {
        self.annotations.get(REF_NAME).map(String::as_str)
    }
}

/// Image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2.
    pub schema_version: u32,
    /// Config blob.
    pub config: Descriptor,
    /// Layer blobs.
    pub layers: Vec<Descriptor>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

/// Image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    /// Always 2.
    pub schema_version: u32,
    /// Manifest or index descriptors.
    pub manifests: Vec<Descriptor>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl ImageIndex {
    /// An index over `manifests`.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>, annotations: Annotations) -> Self {
        Self {
            schema_version: 2,
            manifests,
            annotations,
        }
    }
}

/// The `oci-layout` marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMarker {
    /// Always `1.0.0`.
    pub image_layout_version: String,
}

impl Default for LayoutMarker {
    fn default() -> Self {
        Self {
            image_layout_version: "1.0.0".to_string(),
        }
    }
}
