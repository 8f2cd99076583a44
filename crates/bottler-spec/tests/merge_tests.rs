//! End-to-end merge runs against a definition file and an artifact directory.

use bottler_spec::{BlockChange, BottleJson, Committer, Error, MergeEngine, MergeOptions, MergeOutcome};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ROOT_URL: &str = "https://ghcr.io/v2/homebrew/core";
const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const SOURCE_SHA: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

#[derive(Default)]
struct RecordingCommitter {
    calls: RefCell<Vec<(PathBuf, String)>>,
}

impl Committer for RecordingCommitter {
    fn commit(&self, path: &Path, message: &str) -> bottler_spec::Result<()> {
        self.calls.borrow_mut().push((path.to_path_buf(), message.to_string()));
        Ok(())
    }
}

struct Workspace {
    _temp: TempDir,
    repository: PathBuf,
    artifacts: PathBuf,
    definition: PathBuf,
}

impl Workspace {
    fn new(bottle_block: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let repository = temp.path().join("repo");
        let artifacts = temp.path().join("artifacts");
        fs::create_dir_all(repository.join("Formula/f")).unwrap();
        fs::create_dir_all(&artifacts).unwrap();

        let definition = repository.join("Formula/f/foo.rb");
        fs::write(
            &definition,
            format!(
                "class Foo < Formula\n  desc \"Foo tool\"\n  homepage \"https://example.com\"\n  url \"https://example.com/foo-1.0.tar.gz\"\n  sha256 \"{SOURCE_SHA}\"\n  license \"MIT\"\n{bottle_block}\n  def install\n    bin.install \"foo\"\n  end\nend\n"
            ),
        )
        .unwrap();

        Self {
            _temp: temp,
            repository,
            artifacts,
            definition,
        }
    }

    fn options(&self, keep_old: bool) -> MergeOptions {
        MergeOptions {
            write: true,
            keep_old,
            no_commit: false,
            root_url_using: None,
            default_root_url: ROOT_URL.to_string(),
            repository: self.repository.clone(),
            artifact_dir: self.artifacts.clone(),
        }
    }

    fn add_artifacts(&self, tag: &str, rebuild: u32) {
        let suffix = if rebuild > 0 { format!(".{rebuild}") } else { String::new() };
        fs::write(
            self.artifacts.join(format!("foo--1.0.{tag}.bottle{suffix}.tar.gz")),
            format!("archive {tag}"),
        )
        .unwrap();
        fs::write(
            self.artifacts.join(format!("foo--1.0.{tag}.bottle{suffix}.json")),
            "{}",
        )
        .unwrap();
    }

    fn artifact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.artifacts)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn definition_content(&self) -> String {
        fs::read_to_string(&self.definition).unwrap()
    }
}

fn fragment(tag: &str, sha: &str, cellar: &str, rebuild: u32) -> BottleJson {
    let suffix = if rebuild > 0 { format!(".{rebuild}") } else { String::new() };
    let content = format!(
        r#"{{
  "foo": {{
    "formula": {{
      "name": "foo",
      "pkg_version": "1.0",
      "path": "Formula/f/foo.rb",
      "desc": "Foo tool",
      "license": "MIT",
      "homepage": "https://example.com"
    }},
    "bottle": {{
      "root_url": "{ROOT_URL}",
      "prefix": "/opt/homebrew",
      "cellar": "{cellar}",
      "rebuild": {rebuild},
      "date": "2024-01-01",
      "tags": {{
        "{tag}": {{
          "filename": "foo-1.0.{tag}.bottle{suffix}.tar.gz",
          "local_filename": "foo--1.0.{tag}.bottle{suffix}.tar.gz",
          "sha256": "{sha}",
          "tab": {{ "source_modified_time": 1700000000 }}
        }}
      }}
    }}
  }}
}}"#
    );
    BottleJson::from_str_at(&content, Path::new("fragment.json")).unwrap()
}

#[test]
fn test_identical_platforms_collapse_into_all_bottle() {
    let workspace = Workspace::new("");
    workspace.add_artifacts("linux-x64", 0);
    workspace.add_artifacts("macos-arm64", 0);
    let committer = RecordingCommitter::default();
    let engine = MergeEngine::new(workspace.options(false), &committer);

    let outcomes = engine
        .run(vec![
            fragment("linux-x64", SHA_A, "any", 0),
            fragment("macos-arm64", SHA_A, "any", 0),
        ])
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let MergeOutcome::Written {
        block,
        change,
        committed,
        removed,
    } = &outcomes[0].1
    else {
        panic!("expected a rewrite, got {:?}", outcomes[0].1);
    };
    assert_eq!(*change, BlockChange::Add);
    assert!(committed);
    assert_eq!(removed.len(), 4);
    assert_eq!(
        block,
        &format!("  bottle do\n    sha256 cellar: :any, all: \"{SHA_A}\"\n  end\n")
    );

    assert_eq!(
        workspace.artifact_names(),
        vec!["foo--1.0.all.bottle.json", "foo--1.0.all.bottle.tar.gz"]
    );
    let all_json = BottleJson::read(&workspace.artifacts.join("foo--1.0.all.bottle.json")).unwrap();
    let entry = all_json.get("foo").unwrap();
    assert_eq!(entry.bottle.cellar.as_deref(), Some("any"));
    assert_eq!(entry.bottle.tags.len(), 1);

    let content = workspace.definition_content();
    assert!(content.contains(&format!(
        "  license \"MIT\"\n\n  bottle do\n    sha256 cellar: :any, all: \"{SHA_A}\"\n  end\n"
    )));

    let calls = committer.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "foo: add 1.0 bottle.");
}

#[test]
fn test_keep_old_conflict_writes_nothing() {
    let block = format!("\n  bottle do\n    rebuild 2\n    sha256 cellar: :any, arm64_sonoma: \"{SHA_A}\"\n  end\n");
    let workspace = Workspace::new(&block);
    workspace.add_artifacts("arm64_sonoma", 3);
    let before_definition = workspace.definition_content();
    let before_artifacts = workspace.artifact_names();
    let committer = RecordingCommitter::default();
    let engine = MergeEngine::new(workspace.options(true), &committer);

    let err = engine
        .run(vec![fragment("arm64_sonoma", SHA_B, "any", 3)])
        .unwrap_err();

    let Error::KeepOldMismatch { mismatches } = &err else {
        panic!("expected a keep-old mismatch, got {err:?}");
    };
    assert!(mismatches.iter().any(|m| m == "rebuild: old: \"2\", new: \"3\""));
    assert!(err.to_string().starts_with("`--keep-old` was passed but there are changes in:"));

    assert_eq!(workspace.definition_content(), before_definition);
    assert_eq!(workspace.artifact_names(), before_artifacts);
    assert!(committer.calls.borrow().is_empty());
}

#[test]
fn test_keep_old_carries_other_platforms() {
    let block = format!("\n  bottle do\n    sha256 cellar: :any, ventura: \"{SHA_A}\"\n  end\n");
    let workspace = Workspace::new(&block);
    workspace.add_artifacts("arm64_sonoma", 0);
    let committer = RecordingCommitter::default();
    let engine = MergeEngine::new(workspace.options(true), &committer);

    let outcomes = engine
        .run(vec![fragment("arm64_sonoma", SHA_B, "any", 0)])
        .unwrap();

    let MergeOutcome::Written { block, change, .. } = &outcomes[0].1 else {
        panic!("expected a rewrite");
    };
    assert_eq!(*change, BlockChange::Update);
    assert!(block.contains(&format!("arm64_sonoma: \"{SHA_B}\"")));
    assert!(block.contains(&format!("ventura:      \"{SHA_A}\"")));
    assert!(workspace.definition_content().contains(block.as_str()));
}

#[test]
fn test_unchanged_definition_is_not_rewritten() {
    let block = format!("\n  bottle do\n    sha256 cellar: :any, arm64_sonoma: \"{SHA_A}\"\n  end\n");
    let workspace = Workspace::new(&block);
    workspace.add_artifacts("arm64_sonoma", 0);
    let before = workspace.definition_content();
    let committer = RecordingCommitter::default();
    let engine = MergeEngine::new(workspace.options(false), &committer);

    let outcomes = engine
        .run(vec![fragment("arm64_sonoma", SHA_A, "any", 0)])
        .unwrap();

    let MergeOutcome::Unchanged { removed } = &outcomes[0].1 else {
        panic!("expected no change, got {:?}", outcomes[0].1);
    };
    assert_eq!(removed.len(), 2);
    assert_eq!(workspace.definition_content(), before);
    assert!(workspace.artifact_names().is_empty());
    assert!(committer.calls.borrow().is_empty());
}

#[test]
fn test_print_only_touches_nothing() {
    let workspace = Workspace::new("");
    workspace.add_artifacts("arm64_sonoma", 0);
    let before = workspace.definition_content();
    let committer = RecordingCommitter::default();
    let mut options = workspace.options(false);
    options.write = false;
    let engine = MergeEngine::new(options, &committer);

    let outcomes = engine
        .run(vec![
            fragment("arm64_sonoma", SHA_A, "any", 0),
            fragment("x86_64_linux", SHA_B, "/home/linuxbrew/.linuxbrew/Cellar", 0),
        ])
        .unwrap();

    let MergeOutcome::Printed { block } = &outcomes[0].1 else {
        panic!("expected printed output");
    };
    assert!(block.contains("arm64_sonoma"));
    assert!(block.contains("x86_64_linux"));
    assert_eq!(workspace.definition_content(), before);
    assert_eq!(workspace.artifact_names().len(), 2);
}

#[test]
fn test_unpatchable_definition_keeps_artifacts() {
    let workspace = Workspace::new("");
    fs::write(&workspace.definition, "# foo has no formula class yet\n").unwrap();
    workspace.add_artifacts("linux-x64", 0);
    workspace.add_artifacts("macos-arm64", 0);
    let before = workspace.artifact_names();
    let committer = RecordingCommitter::default();
    let engine = MergeEngine::new(workspace.options(false), &committer);

    let result = engine.run(vec![
        fragment("linux-x64", SHA_A, "any", 0),
        fragment("macos-arm64", SHA_A, "any", 0),
    ]);

    assert!(result.is_err());
    assert_eq!(workspace.artifact_names(), before);
    assert_eq!(workspace.definition_content(), "# foo has no formula class yet\n");
    assert!(committer.calls.borrow().is_empty());
}
