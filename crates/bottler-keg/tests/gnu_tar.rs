//! GNU tar archiving into an output directory given relative to the
//! working directory. Kept in its own test binary because it changes the
//! process working directory.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::print_stderr)]

use bottler_core::Interrupt;
use bottler_keg::{ArchiveBuilder, GnuTar};
use flate2::read::GzDecoder;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Whether the tar `GnuTar::detect` would pick is GNU tar.
fn gnu_tar_installed() -> bool {
    ["gtar", "gnutar", "tar"]
        .iter()
        .find_map(|candidate| Command::new(candidate).arg("--version").output().ok())
        .is_some_and(|output| String::from_utf8_lossy(&output.stdout).contains("GNU tar"))
}

#[test]
fn test_gnu_tar_with_relative_output_dir() {
    if !gnu_tar_installed() {
        eprintln!("GNU tar not installed, skipping");
        return;
    }

    let temp = TempDir::new().unwrap();
    let cellar = temp.path().join("Cellar");
    fs::create_dir_all(cellar.join("foo/1.0/bin")).unwrap();
    fs::write(cellar.join("foo/1.0/bin/foo"), "#!/bin/sh\necho foo\n").unwrap();
    let work = temp.path().join("work");
    fs::create_dir_all(&work).unwrap();

    let original_dir = std::env::current_dir().unwrap();
    std::env::set_current_dir(&work).unwrap();
    let tar = GnuTar::detect().unwrap();
    let interrupt = Interrupt::new();
    let result = ArchiveBuilder::new(&tar, &interrupt).build(
        &cellar,
        Path::new("foo/1.0"),
        "foo",
        Path::new("./foo--1.0.x86_64_linux.bottle.tar.gz"),
        1_700_000_000,
    );
    std::env::set_current_dir(original_dir).unwrap();

    let built = result.unwrap();
    assert!(built.path.is_absolute());
    assert!(work.join("foo--1.0.x86_64_linux.bottle.tar.gz").is_file());
    assert!(!work.join("foo-bottle.tar").exists());
    assert!(!cellar.join("foo-bottle.tar").exists());

    let mut archive = tar::Archive::new(GzDecoder::new(fs::File::open(&built.path).unwrap()));
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().display().to_string())
        .collect();
    assert!(names.iter().any(|n| n == "foo/1.0/bin/foo"));
}
