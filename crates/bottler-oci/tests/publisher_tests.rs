//! Publishing bottle documents into image layouts against a fake registry.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bottler_core::{DryRun, ExternalTool, LinuxDefaults, OnError, ToolArg, ToolOutput};
use bottler_oci::documents::{INDEX_MEDIA_TYPE, REF_NAME, TITLE, annotations};
use bottler_oci::layout::INDEX_FILE;
use bottler_oci::{
    Descriptor, Error, ImageConfig, ImageIndex, ImageLayout, ImageManifest, PublishOptions, PublishOutcome,
    Publisher, RegistryTool, SchemaKind, SchemaValidator,
};
use bottler_spec::BottleJson;
use flate2::Compression;
use flate2::write::GzEncoder;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::Value;
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TAR_BYTES: &[u8] = b"pretend this is a tar stream";

struct FakeRegistry {
    inspect: ToolOutput,
    published: Option<ImageIndex>,
    index_digest: Option<String>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl FakeRegistry {
    fn new(inspect: ToolOutput) -> Self {
        Self {
            inspect,
            published: None,
            index_digest: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn missing() -> Self {
        Self::new(ToolOutput::failed(1, "manifest unknown: manifest unknown"))
    }

    fn existing(published: ImageIndex) -> Self {
        Self {
            published: Some(published),
            ..Self::new(ToolOutput::ok("{}"))
        }
    }

    fn verbs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c[0].clone()).collect()
    }
}

impl ExternalTool for FakeRegistry {
    fn name(&self) -> &str {
        "skopeo"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn invoke(&self, args: &[ToolArg], _cwd: Option<&Path>, _env: &[(String, String)]) -> bottler_core::Result<ToolOutput> {
        let args: Vec<String> = args.iter().map(|a| a.expose().to_string()).collect();
        self.calls.borrow_mut().push(args.clone());
        if args[0] == "inspect" {
            return Ok(self.inspect.clone());
        }
        if let (Some(root), Some(index)) = (args[3].strip_prefix("oci:"), &self.published) {
            let layout = ImageLayout::open(root);
            let blob = layout.write_json_blob(index).unwrap();
            let mut descriptor = Descriptor::new(INDEX_MEDIA_TYPE, &blob.sha256, blob.size);
            if let Some(digest) = &self.index_digest {
                descriptor.digest.clone_from(digest);
            }
            let top = ImageIndex::new(vec![descriptor], Default::default());
            layout.write_root_json(INDEX_FILE, &top).unwrap();
        }
        Ok(ToolOutput::ok(""))
    }
}

#[derive(Default)]
struct RecordingValidator {
    seen: RefCell<Vec<SchemaKind>>,
}

impl SchemaValidator for RecordingValidator {
    fn validate(&self, kind: SchemaKind, _document: &Value) -> bottler_oci::Result<()> {
        self.seen.borrow_mut().push(kind);
        Ok(())
    }
}

struct RejectingValidator(SchemaKind);

impl SchemaValidator for RejectingValidator {
    fn validate(&self, kind: SchemaKind, document: &Value) -> bottler_oci::Result<()> {
        if kind == self.0 {
            return Err(Error::SchemaValidation {
                schema: kind.uri().to_string(),
                errors: vec!["/: rejected".to_string()],
                document: document.to_string(),
            });
        }
        Ok(())
    }
}

struct Fixture {
    temp: TempDir,
    token: SecretString,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("bottles")).unwrap();
        fs::create_dir_all(temp.path().join("work")).unwrap();
        let bottle = temp.path().join("bottles/foo--1.0.x86_64_linux.bottle.tar.gz");
        let mut encoder = GzEncoder::new(fs::File::create(bottle).unwrap(), Compression::default());
        encoder.write_all(TAR_BYTES).unwrap();
        encoder.finish().unwrap();
        Self {
            temp,
            token: SecretString::from("hunter2".to_string()),
        }
    }

    fn options(&self) -> PublishOptions {
        PublishOptions {
            bottle_dir: self.temp.path().join("bottles"),
            work_dir: self.temp.path().join("work"),
            ..PublishOptions::default()
        }
    }

    fn layout_root(&self) -> PathBuf {
        self.temp.path().join("work/foo--1.0")
    }
}

fn document(full_name: &str, arch: &str) -> BottleJson {
    let json = format!(
        r#"{{
  "{full_name}": {{
    "formula": {{
      "name": "foo",
      "pkg_version": "1.0",
      "path": "Formula/foo.rb",
      "tap_git_path": "Formula/foo.rb",
      "tap_git_revision": "abc123",
      "tap_git_remote": "https://github.com/acme/homebrew-tools",
      "desc": "Foo tool",
      "license": "MIT",
      "homepage": "https://example.com/foo"
    }},
    "bottle": {{
      "root_url": "https://ghcr.io/v2/acme/tools",
      "prefix": "/home/linuxbrew/.linuxbrew",
      "rebuild": 0,
      "date": "2026-10-17",
      "tags": {{
        "x86_64_linux": {{
          "filename": "foo-1.0.x86_64_linux.bottle.tar.gz",
          "local_filename": "foo--1.0.x86_64_linux.bottle.tar.gz",
          "sha256": "{}",
          "cellar": ":any_skip_relocation",
          "formulae_brew_sh_path": "formula",
          "tab": {{
            "homebrew_version": "4.3.0",
            "changed_files": [],
            "source_modified_time": 1700000000,
            "arch": "{arch}",
            "built_on": {{
              "os": "Linux",
              "os_version": "Ubuntu 22.04 LTS",
              "glibc_version": "2.35"
            }}
          }}
        }}
      }}
    }}
  }}
}}"#,
        "0".repeat(64)
    );
    BottleJson::from_str_at(&json, Path::new("foo.bottle.json")).unwrap()
}

fn publish(
    fixture: &Fixture,
    registry: &FakeRegistry,
    validator: &dyn SchemaValidator,
    full_name: &str,
    options: &PublishOptions,
) -> bottler_oci::Result<PublishOutcome> {
    let tool = RegistryTool::new(registry, "bot", &fixture.token);
    let publisher = Publisher::new(&tool, validator, "ghcr.io", LinuxDefaults::default());
    let doc = document(full_name, "x86_64");
    publisher.publish(full_name, doc.get(full_name).unwrap(), options)
}

fn published_index(root: &Path) -> (ImageLayout, ImageIndex) {
    let layout = ImageLayout::open(root);
    let top = layout.read_index().unwrap();
    assert_eq!(top.manifests.len(), 1);
    let index = layout.read_json_blob(&top.manifests[0].digest).unwrap();
    (layout, index)
}

#[test]
fn test_fresh_publish_builds_layout() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();

    let outcome = publish(&fixture, &registry, &validator, "acme/tools/foo", &fixture.options()).unwrap();
    assert_eq!(
        outcome,
        PublishOutcome::Published {
            image_uri: "docker://ghcr.io/acme/tools/foo:1.0".to_string(),
            package_url: "https://github.com/orgs/acme/packages/container/package/tools/foo".to_string(),
            layout: fixture.layout_root(),
        }
    );
    assert_eq!(registry.verbs(), vec!["inspect", "copy"]);
    let calls = registry.calls.borrow();
    let upload = &calls[1];
    assert_eq!(upload[2], format!("oci:{}", fixture.layout_root().display()));
    assert_eq!(upload[4], "--dest-creds=bot:hunter2");
    assert_eq!(
        *validator.seen.borrow(),
        vec![
            SchemaKind::Layout,
            SchemaKind::Config,
            SchemaKind::Manifest,
            SchemaKind::Index,
            SchemaKind::Index
        ]
    );

    let (layout, index) = published_index(&fixture.layout_root());
    assert!(layout.mismatched_blobs().unwrap().is_empty());
    assert_eq!(index.annotations[TITLE], "acme/tools/foo");
    assert_eq!(index.annotations[REF_NAME], "1.0");
    assert_eq!(
        index.annotations["org.opencontainers.image.source"],
        "https://github.com/acme/homebrew-tools/blob/abc123/Formula/foo.rb"
    );
    assert_eq!(
        index.annotations["org.opencontainers.image.documentation"],
        "https://github.com/acme/homebrew-tools"
    );
    assert_eq!(index.annotations["org.opencontainers.image.vendor"], "acme");

    assert_eq!(index.manifests.len(), 1);
    let entry = &index.manifests[0];
    assert_eq!(entry.ref_name(), Some("1.0.x86_64_linux"));
    let platform = entry.platform.as_ref().unwrap();
    assert_eq!(platform.architecture, "amd64");
    assert_eq!(platform.os, "linux");
    assert_eq!(platform.os_version.as_deref(), Some("Ubuntu 22.04"));
    assert_eq!(entry.annotations["sh.brew.bottle.glibc.version"], "2.35");
    assert_eq!(entry.annotations["sh.brew.bottle.cpu.variant"], "core2");
    let tab: Value = serde_json::from_str(&entry.annotations["sh.brew.tab"]).unwrap();
    assert_eq!(tab["arch"], "x86_64");

    let manifest: ImageManifest = layout.read_json_blob(&entry.digest).unwrap();
    assert_eq!(manifest.annotations[TITLE], "acme/tools/foo 1.0.x86_64_linux");
    assert_eq!(manifest.annotations["org.opencontainers.image.created"], "2026-10-17");
    assert_eq!(manifest.layers.len(), 1);
    assert_eq!(
        manifest.layers[0].annotations[TITLE],
        "foo--1.0.x86_64_linux.bottle.tar.gz"
    );
    let bottle = fixture.temp.path().join("bottles/foo--1.0.x86_64_linux.bottle.tar.gz");
    assert_eq!(manifest.layers[0].sha256(), bottler_core::digest::sha256_file(&bottle).unwrap());

    let config: ImageConfig = layout.read_json_blob(&manifest.config.digest).unwrap();
    assert_eq!(
        config.rootfs.diff_ids,
        vec![format!("sha256:{}", bottler_core::digest::sha256_bytes(TAR_BYTES))]
    );
}

#[test]
fn test_core_tap_documentation() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();
    publish(&fixture, &registry, &validator, "foo", &fixture.options()).unwrap();

    let (layout, index) = published_index(&fixture.layout_root());
    assert_eq!(
        index.annotations["org.opencontainers.image.documentation"],
        "https://formulae.brew.sh/formula/foo"
    );
    let manifest: ImageManifest = layout.read_json_blob(&index.manifests[0].digest).unwrap();
    assert_eq!(
        manifest.annotations["org.opencontainers.image.documentation"],
        "https://formulae.brew.sh/formula/foo"
    );
}

#[test]
fn test_existing_image_refused() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::new(ToolOutput::ok("{}"));
    let validator = RecordingValidator::default();

    let err = publish(&fixture, &registry, &validator, "acme/tools/foo", &fixture.options()).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    let options = PublishOptions {
        on_error: OnError::Warn,
        ..fixture.options()
    };
    let outcome = publish(&fixture, &registry, &validator, "acme/tools/foo", &options).unwrap();
    assert!(matches!(outcome, PublishOutcome::Skipped { .. }));
    assert_eq!(registry.verbs(), vec!["inspect", "inspect"]);
}

#[test]
fn test_inspect_failure() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::new(ToolOutput::failed(1, "unauthorized"));
    let validator = RecordingValidator::default();

    let err = publish(&fixture, &registry, &validator, "acme/tools/foo", &fixture.options()).unwrap_err();
    let Error::Inspect { stderr, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(stderr, "unauthorized");
}

#[test]
fn test_keep_old_appends_platform() {
    let fixture = Fixture::new();
    let published = ImageIndex::new(
        vec![
            Descriptor::new(bottler_oci::documents::MANIFEST_MEDIA_TYPE, &"1".repeat(64), 10)
                .with_annotations(annotations([(REF_NAME, Some("1.0.arm64_sonoma"))])),
        ],
        annotations([(TITLE, Some("acme/tools/foo")), ("org.opencontainers.image.vendor", Some("Acme"))]),
    );
    let registry = FakeRegistry::existing(published);
    let validator = RecordingValidator::default();
    let options = PublishOptions {
        keep_old: true,
        ..fixture.options()
    };

    publish(&fixture, &registry, &validator, "acme/tools/foo", &options).unwrap();
    assert_eq!(registry.verbs(), vec!["inspect", "copy", "copy"]);
    assert_eq!(registry.calls.borrow()[1][4], "--src-creds=bot:hunter2");
    assert!(!validator.seen.borrow().contains(&SchemaKind::Layout));

    let (layout, index) = published_index(&fixture.layout_root());
    assert_eq!(index.annotations["org.opencontainers.image.vendor"], "Acme");
    let refs: Vec<_> = index.manifests.iter().filter_map(Descriptor::ref_name).collect();
    assert_eq!(refs, vec!["1.0.arm64_sonoma", "1.0.x86_64_linux"]);
    let blobs = fs::read_dir(layout.blobs_dir()).unwrap().count();
    // bottle, config, manifest and the rewritten index
    assert_eq!(blobs, 4);
}

#[test]
fn test_keep_old_rejects_digest_outside_layout() {
    let fixture = Fixture::new();
    let published = ImageIndex::new(Vec::new(), Default::default());
    let outside = fixture.temp.path().join("outside.json");
    fs::write(&outside, serde_json::to_vec(&published).unwrap()).unwrap();
    let registry = FakeRegistry {
        index_digest: Some("sha256:../../../../outside.json".to_string()),
        ..FakeRegistry::existing(published)
    };
    let validator = RecordingValidator::default();
    let options = PublishOptions {
        keep_old: true,
        ..fixture.options()
    };

    assert!(publish(&fixture, &registry, &validator, "acme/tools/foo", &options).is_err());
    assert!(outside.is_file());
    assert_eq!(registry.verbs(), vec!["inspect", "copy"]);
}

#[test]
fn test_keep_old_rejects_duplicate_platform() {
    let fixture = Fixture::new();
    let published = ImageIndex::new(
        vec![
            Descriptor::new(bottler_oci::documents::MANIFEST_MEDIA_TYPE, &"1".repeat(64), 10)
                .with_annotations(annotations([(REF_NAME, Some("1.0.x86_64_linux"))])),
        ],
        Default::default(),
    );
    let registry = FakeRegistry::existing(published);
    let validator = RecordingValidator::default();
    let options = PublishOptions {
        keep_old: true,
        ..fixture.options()
    };

    let err = publish(&fixture, &registry, &validator, "acme/tools/foo", &options).unwrap_err();
    assert!(matches!(err, Error::DuplicatePlatform { tag } if tag == "x86_64_linux"));
    assert_eq!(registry.verbs(), vec!["inspect", "copy"]);
}

#[test]
fn test_keep_old_without_published_image_uploads_fresh() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();
    let options = PublishOptions {
        keep_old: true,
        ..fixture.options()
    };

    publish(&fixture, &registry, &validator, "acme/tools/foo", &options).unwrap();
    assert_eq!(registry.verbs(), vec!["inspect", "copy"]);
    assert!(fixture.layout_root().join("oci-layout").is_file());
}

#[test]
fn test_dry_run_plans_commands() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();
    let options = PublishOptions {
        keep_old: true,
        dry_run: DryRun::Yes,
        ..fixture.options()
    };

    let outcome = publish(&fixture, &registry, &validator, "acme/tools/foo", &options).unwrap();
    let PublishOutcome::Planned { commands, layout, .. } = outcome else {
        panic!("expected a plan");
    };
    assert!(registry.calls.borrow().is_empty());
    assert_eq!(commands.len(), 3);
    assert!(commands[0].starts_with("skopeo inspect --raw docker://ghcr.io/acme/tools/foo:1.0"));
    assert!(commands[1].ends_with("--src-creds=bot:$BOTTLER_REGISTRY_TOKEN"));
    assert!(commands[2].ends_with("--dest-creds=bot:$BOTTLER_REGISTRY_TOKEN"));
    assert!(commands.iter().all(|c| !c.contains("hunter2")));
    assert!(layout.join("oci-layout").is_file());
    assert!(layout.join(INDEX_FILE).is_file());
}

#[test]
fn test_unknown_architecture() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();
    let tool = RegistryTool::new(&registry, "bot", &fixture.token);
    let publisher = Publisher::new(&tool, &validator, "ghcr.io", LinuxDefaults::default());
    let doc = document("acme/tools/foo", "ppc");

    let err = publisher
        .publish("acme/tools/foo", doc.get("acme/tools/foo").unwrap(), &fixture.options())
        .unwrap_err();
    assert!(matches!(err, Error::UnknownArchitecture { arch } if arch == "ppc"));
}

#[test]
fn test_invalid_document_stops_before_upload() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RejectingValidator(SchemaKind::Manifest);

    let err = publish(&fixture, &registry, &validator, "acme/tools/foo", &fixture.options()).unwrap_err();
    assert!(matches!(err, Error::SchemaValidation { .. }));
    assert_eq!(registry.verbs(), vec!["inspect"]);
}

#[test]
fn test_invalid_root_url() {
    let fixture = Fixture::new();
    let registry = FakeRegistry::missing();
    let validator = RecordingValidator::default();
    let tool = RegistryTool::new(&registry, "bot", &fixture.token);
    let publisher = Publisher::new(&tool, &validator, "registry.example.com", LinuxDefaults::default());
    let doc = document("acme/tools/foo", "x86_64");

    let err = publisher
        .publish("acme/tools/foo", doc.get("acme/tools/foo").unwrap(), &fixture.options())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRootUrl { .. }));
    assert!(registry.calls.borrow().is_empty());
}
