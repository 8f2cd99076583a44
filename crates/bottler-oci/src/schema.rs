//! Validation of image documents against the OCI image-spec schemas.

use crate::error::{Error, Result};
use jsonschema::{Resource, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// The documents that are validated before being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Image config.
    Config,
    /// Image index and `index.json`.
    Index,
    /// `oci-layout` marker.
    Layout,
    /// Image manifest.
    Manifest,
}

impl SchemaKind {
    /// Every kind.
    pub const ALL: [Self; 4] = [Self::Config, Self::Index, Self::Layout, Self::Manifest];

    /// Schema URI.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Config => "https://opencontainers.org/schema/image/config",
            Self::Index => "https://opencontainers.org/schema/image/index",
            Self::Layout => "https://opencontainers.org/schema/image/layout",
            Self::Manifest => "https://opencontainers.org/schema/image/manifest",
        }
    }

    /// Schema file name in the image-spec repository.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config-schema.json",
            Self::Index => "image-index-schema.json",
            Self::Layout => "image-layout-schema.json",
            Self::Manifest => "image-manifest-schema.json",
        }
    }
}

/// Schema files shared through `$ref`, with the URIs they are known by.
pub const SHARED_SCHEMAS: [(&str, &[&str]); 3] = [
    (
        "content-descriptor.json",
        &["https://opencontainers.org/schema/image/content-descriptor.json"],
    ),
    (
        "defs.json",
        &[
            "https://opencontainers.org/schema/defs.json",
            "https://opencontainers.org/schema/descriptor/defs.json",
            "https://opencontainers.org/schema/image/defs.json",
            "https://opencontainers.org/schema/image/descriptor/defs.json",
            "https://opencontainers.org/schema/image/index/defs.json",
            "https://opencontainers.org/schema/image/manifest/defs.json",
        ],
    ),
    (
        "defs-descriptor.json",
        &[
            "https://opencontainers.org/schema/descriptor.json",
            "https://opencontainers.org/schema/defs-descriptor.json",
            "https://opencontainers.org/schema/descriptor/defs-descriptor.json",
            "https://opencontainers.org/schema/image/defs-descriptor.json",
            "https://opencontainers.org/schema/image/descriptor/defs-descriptor.json",
            "https://opencontainers.org/schema/image/index/defs-descriptor.json",
            "https://opencontainers.org/schema/image/manifest/defs-descriptor.json",
            "https://opencontainers.org/schema/index/defs-descriptor.json",
        ],
    ),
];

/// Checks documents before they are written.
pub trait SchemaValidator {
    /// Validates `document` as `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaValidation`] with every violation and the
    /// document when it does not conform.
    fn validate(&self, kind: SchemaKind, document: &Value) -> Result<()>;
}

/// Validator compiled from schema files in a directory.
pub struct JsonSchemaValidator {
    validators: HashMap<SchemaKind, Validator>,
}

impl JsonSchemaValidator {
    /// Loads and compiles the schemas in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema file is missing, unparsable or does not
    /// compile.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut resources: Vec<(String, Value)> = Vec::new();
        for (file, uris) in SHARED_SCHEMAS {
            let schema = read_schema(&dir.join(file))?;
            for uri in uris {
                resources.push(((*uri).to_string(), schema.clone()));
            }
        }
        let mut documents: Vec<(SchemaKind, PathBuf, Value)> = Vec::new();
        for kind in SchemaKind::ALL {
            let path = dir.join(kind.file_name());
            let schema = read_schema(&path)?;
            resources.push((kind.uri().to_string(), schema.clone()));
            documents.push((kind, path, schema));
        }

        let mut validators = HashMap::new();
        for (kind, path, schema) in documents {
            let mut options = jsonschema::options();
            for (uri, contents) in &resources {
                let resource =
                    Resource::from_contents(contents.clone()).map_err(|e| Error::schema_load(&path, e.to_string()))?;
                options.with_resource(uri.clone(), resource);
            }
            let validator = options
                .build(&schema)
                .map_err(|e| Error::schema_load(&path, e.to_string()))?;
            validators.insert(kind, validator);
        }
        debug!(dir = %dir.display(), "Loaded OCI schemas");
        Ok(Self { validators })
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, kind: SchemaKind, document: &Value) -> Result<()> {
        let Some(validator) = self.validators.get(&kind) else {
            return Err(Error::schema_load(kind.file_name(), "schema not loaded"));
        };
        let errors: Vec<String> = validator
            .iter_errors(document)
            .map(|e| format!("{}: {e}", e.instance_path))
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        error!(schema = kind.uri(), count = errors.len(), "JSON schema validation failed");
        Err(Error::SchemaValidation {
            schema: kind.uri().to_string(),
            errors,
            document: serde_json::to_string_pretty(document)?,
        })
    }
}

fn read_schema(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::schema_load(path, e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| Error::schema_load(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: &Value) {
        std::fs::write(dir.join(name), serde_json::to_string(value).unwrap()).unwrap();
    }

    fn schema_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        write(
            dir,
            "content-descriptor.json",
            &json!({
                "type": "object",
                "required": ["mediaType", "digest", "size"],
                "properties": {"size": {"type": "integer", "minimum": 0}}
            }),
        );
        write(dir, "defs.json", &json!({}));
        write(dir, "defs-descriptor.json", &json!({}));
        write(
            dir,
            "image-manifest-schema.json",
            &json!({
                "type": "object",
                "required": ["schemaVersion", "config", "layers"],
                "properties": {
                    "schemaVersion": {"const": 2},
                    "config": {"$ref": "https://opencontainers.org/schema/image/content-descriptor.json"}
                }
            }),
        );
        write(dir, "config-schema.json", &json!({"type": "object"}));
        write(dir, "image-index-schema.json", &json!({"type": "object", "required": ["manifests"]}));
        write(
            dir,
            "image-layout-schema.json",
            &json!({"type": "object", "required": ["imageLayoutVersion"]}),
        );
        temp
    }

    #[test]
    fn test_valid_document_passes() {
        let dir = schema_dir();
        let validator = JsonSchemaValidator::load(dir.path()).unwrap();
        let manifest = json!({
            "schemaVersion": 2,
            "config": {"mediaType": "x", "digest": "sha256:00", "size": 1},
            "layers": []
        });
        validator.validate(SchemaKind::Manifest, &manifest).unwrap();
        validator
            .validate(SchemaKind::Layout, &json!({"imageLayoutVersion": "1.0.0"}))
            .unwrap();
    }

    #[test]
    fn test_cross_document_reference_enforced() {
        let dir = schema_dir();
        let validator = JsonSchemaValidator::load(dir.path()).unwrap();
        let manifest = json!({
            "schemaVersion": 2,
            "config": {"mediaType": "x", "digest": "sha256:00", "size": -1},
            "layers": []
        });
        let err = validator.validate(SchemaKind::Manifest, &manifest).unwrap_err();
        let Error::SchemaValidation { schema, errors, document } = err else {
            panic!("unexpected error");
        };
        assert_eq!(schema, SchemaKind::Manifest.uri());
        assert_eq!(errors.len(), 1);
        assert!(document.contains("\"size\": -1"));
    }

    #[test]
    fn test_missing_schema_file() {
        let dir = schema_dir();
        std::fs::remove_file(dir.path().join("image-index-schema.json")).unwrap();
        assert!(matches!(
            JsonSchemaValidator::load(dir.path()),
            Err(Error::SchemaLoad { .. })
        ));
    }
}
