//! Finding install locations that survived relocation.
//!
//! A keg that still mentions the prefix, cellar or library after the
//! placeholder pass only works at that location, so its bottle gets a
//! concrete cellar instead of `:any`.

use crate::error::{Error, Result};
use crate::keg::{Keg, keg_name_for};
use bottler_core::InstallPaths;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Matches listed per file before the rest are elided.
pub const MAXIMUM_STRING_MATCHES: usize = 100;

/// Documentation extensions that never affect run time.
pub const METAFILE_EXTENSIONS: [&str; 17] = [
    "adoc", "asc", "asciidoc", "creole", "html", "markdown", "md", "mdown", "mediawiki", "mkdn",
    "org", "pod", "rdoc", "rst", "rtf", "textile", "txt",
];

const MIN_STRING_LEN: usize = 4;

/// Source files and headers, which often carry paths in debug info.
const SOURCE_IGNORE: &str = r"/include/|\.(c|cc|cpp|h|hpp)$";

/// One string in a file that mentions the location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    /// The printable string.
    pub text: String,
    /// Byte offset of the string in the file.
    pub offset: usize,
}

/// Matches found in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatches {
    /// File path.
    pub path: PathBuf,
    /// Matches in file order.
    pub matches: Vec<TextMatch>,
}

/// Everything in a keg that still mentions a location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainsReport {
    /// The location searched for.
    pub needle: String,
    /// Files with at least one reportable match.
    pub files: Vec<FileMatches>,
    /// Symlinks with absolute targets under the location.
    pub symlinks: Vec<PathBuf>,
}

impl ContainsReport {
    /// Whether anything was found.
    #[must_use]
    pub fn found(&self) -> bool {
        !self.files.is_empty() || !self.symlinks.is_empty()
    }

    /// Logs the findings, at most [`MAXIMUM_STRING_MATCHES`] per file.
    pub fn log(&self) {
        if !self.files.is_empty() {
            warn!("String '{}' still exists in these files:", self.needle);
        }
        for file in &self.files {
            warn!("{}", file.path.display());
            for m in file.matches.iter().take(MAXIMUM_STRING_MATCHES) {
                info!(" --> match '{}' at offset 0x{:x}", m.text, m.offset);
            }
            if file.matches.len() > MAXIMUM_STRING_MATCHES {
                info!("Only the first {MAXIMUM_STRING_MATCHES} matches were output.");
            }
        }
        if !self.symlinks.is_empty() {
            warn!("Absolute symlink starting with {}:", self.needle);
            for link in &self.symlinks {
                let target = fs::read_link(link).unwrap_or_default();
                warn!("  {} -> {}", link.display(), target.display());
            }
        }
    }
}

/// Runs of at least four printable ASCII characters with their offsets,
/// like `strings -t d`.
#[must_use]
pub fn printable_strings(bytes: &[u8]) -> Vec<(usize, &str)> {
    let mut strings = Vec::new();
    let mut start = None;
    for (i, &b) in bytes.iter().chain(std::iter::once(&0)).enumerate() {
        let printable = b == b'\t' || (0x20..0x7f).contains(&b);
        match (printable, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= MIN_STRING_LEN {
                    // Printable ASCII is valid UTF-8.
                    if let Ok(text) = std::str::from_utf8(&bytes[s..i]) {
                        strings.push((s, text));
                    }
                }
                start = None;
            }
            _ => {}
        }
    }
    strings
}

/// A regex matching `location` where it is not the tail of a longer name.
///
/// # Errors
///
/// Returns an error if the pattern cannot be compiled.
pub fn location_regex(location: &str) -> Result<Regex> {
    Regex::new(&format!("(?:^|[^a-zA-Z0-9]){}", regex::escape(location)))
        .map_err(|e| Error::relocation(location, e.to_string()))
}

/// Strings in `bytes` that reference `location`.
///
/// A string is reported when one of its `:`-separated parts references the
/// location and exists on disk. With `deps`, parts inside kegs of other
/// packages (build dependencies) are not reported.
#[must_use]
pub fn text_matches(
    bytes: &[u8],
    location: &Regex,
    ignores: &[Regex],
    deps: Option<&[String]>,
    cellar: &Path,
    prefix: &Path,
) -> Vec<TextMatch> {
    let mut matches: Vec<TextMatch> = Vec::new();
    for (offset, text) in printable_strings(bytes) {
        if ignores.iter().any(|re| re.is_match(text)) || !location.is_match(text) {
            continue;
        }
        let reportable = text.split(':').any(|part| {
            if !location.is_match(part) || !Path::new(part).exists() {
                return false;
            }
            match (deps, keg_name_for(Path::new(part), cellar, prefix)) {
                (Some(deps), Some(name)) if !deps.is_empty() => deps.contains(&name),
                _ => true,
            }
        });
        if reportable && !matches.iter().any(|m| m.offset == offset) {
            matches.push(TextMatch {
                text: text.to_string(),
                offset,
            });
        }
    }
    matches
}

/// Searches one keg for leftover install locations.
#[derive(Debug)]
pub struct KegScanner<'a> {
    keg: &'a Keg,
    cellar: &'a Path,
    prefix: &'a Path,
}

impl<'a> KegScanner<'a> {
    /// A scanner for `keg` installed under `cellar` and `prefix`.
    #[must_use]
    pub const fn new(keg: &'a Keg, cellar: &'a Path, prefix: &'a Path) -> Self {
        Self { keg, cellar, prefix }
    }

    /// Files and absolute symlinks that still reference `needle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keg cannot be read.
    pub fn contains(&self, needle: &str, ignores: &[Regex], deps: Option<&[String]>) -> Result<ContainsReport> {
        let location = location_regex(needle)?;
        let mut files = Vec::new();

        for path in self.unique_files()? {
            if has_metafile_extension(&path) {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
            if !contains_bytes(&bytes, needle.as_bytes()) {
                continue;
            }
            let matches = text_matches(&bytes, &location, ignores, deps, self.cellar, self.prefix);
            if !matches.is_empty() {
                files.push(FileMatches { path, matches });
            }
        }

        let report = ContainsReport {
            needle: needle.to_string(),
            files,
            symlinks: self.absolute_symlinks_starting_with(needle)?,
        };
        if report.found() {
            report.log();
        }
        Ok(report)
    }

    /// Symlinks whose absolute target starts with `needle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keg cannot be read.
    pub fn absolute_symlinks_starting_with(&self, needle: &str) -> Result<Vec<PathBuf>> {
        let mut links = Vec::new();
        for path in self.keg.find()? {
            let Ok(target) = fs::read_link(&path) else {
                continue;
            };
            if target.is_absolute() && target.to_string_lossy().starts_with(needle) {
                links.push(path);
            }
        }
        Ok(links)
    }

    /// Fails when the keg references the package manager repository, which
    /// no bottle may do.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonRelocatable`] naming the referenced path.
    pub fn ensure_no_repository_reference(&self, paths: &InstallPaths, uses_go: bool) -> Result<()> {
        let library = paths.library.to_string_lossy();
        let repository_reference = if paths.prefix == paths.repository {
            library.to_string()
        } else {
            paths.repository.to_string_lossy().into_owned()
        };

        let mut allowed = ignores(paths, uses_go)?;
        allowed.push(compile(&format!(
            "{}/Homebrew/os/(mac|linux)/pkgconfig",
            regex::escape(&library)
        ))?);
        if self.contains(&repository_reference, &allowed, None)?.found() {
            return Err(Error::NonRelocatable {
                reference: repository_reference,
            });
        }
        Ok(())
    }

    /// Decides whether the keg can be poured at any prefix.
    ///
    /// `deps` holds the package and its runtime dependency names;
    /// `uses_go` adds the Go toolchain's `libexec` to the ignored paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the keg cannot be read.
    pub fn is_relocatable(&self, paths: &InstallPaths, deps: &[String], uses_go: bool) -> Result<bool> {
        let prefix = paths.prefix.to_string_lossy();
        let cellar = paths.cellar.to_string_lossy();
        let library = paths.library.to_string_lossy();
        let ignores = ignores(paths, uses_go)?;

        let prefix_check = if prefix == bottler_core::config::host_default_prefix() {
            format!("{prefix}/opt")
        } else {
            prefix.to_string()
        };

        let deps = Some(deps);
        let mut relocatable = true;
        relocatable &= !self.contains(&prefix_check, &ignores, deps)?.found();
        relocatable &= !self.contains(&cellar, &ignores, deps)?.found();
        relocatable &= !self.contains(&library, &ignores, deps)?.found();
        if prefix != prefix_check.as_str() {
            relocatable &= self.absolute_symlinks_starting_with(&prefix)?.is_empty();
            for dir in ["etc", "var", "share/vim"] {
                relocatable &= !self.contains(&format!("{prefix}/{dir}"), &ignores, None)?.found();
            }
        }
        Ok(relocatable)
    }

    fn unique_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for path in self.keg.find()? {
            let metadata = fs::symlink_metadata(&path).map_err(|e| Error::io_at(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            if file_identity(&metadata).is_none_or(|id| seen.insert(id)) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn ignores(paths: &InstallPaths, uses_go: bool) -> Result<Vec<Regex>> {
    let mut ignores = vec![compile(SOURCE_IGNORE)?];
    if uses_go {
        ignores.push(compile(&format!(
            r"{}/go(@[\d.]+)?/[\d.]+/libexec",
            regex::escape(&paths.cellar.to_string_lossy())
        ))?);
    }
    Ok(ignores)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::relocation(pattern, e.to_string()))
}

fn has_metafile_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| METAFILE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(unix)]
fn file_identity(metadata: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_identity(_metadata: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_printable_strings() {
        let bytes = b"\0\0abc\0/usr/local/lib\x01tab\there\xffxy";
        let strings = printable_strings(bytes);
        assert_eq!(strings, vec![(6, "/usr/local/lib"), (21, "tab\there")]);
    }

    #[test]
    fn test_location_regex_requires_boundary() {
        let re = location_regex("/usr/local").unwrap();
        assert!(re.is_match("/usr/local/lib"));
        assert!(re.is_match("prefix=/usr/local"));
        assert!(!re.is_match("/opt/usr/localx"));
        assert!(!location_regex("local").unwrap().is_match("nonlocal"));
    }

    #[test]
    fn test_text_matches_skips_missing_and_ignored() {
        let temp = TempDir::new().unwrap();
        let prefix = temp.path();
        let cellar = prefix.join("Cellar");
        fs::create_dir_all(prefix.join("lib")).unwrap();
        let p = prefix.to_string_lossy();

        let content = format!(
            "\0{p}/lib\0{p}/missing\0{p}/include/foo.h\0/x:{p}/lib:/y\0",
        );
        let re = location_regex(&p).unwrap();
        let ignores = vec![compile(SOURCE_IGNORE).unwrap()];
        let matches = text_matches(content.as_bytes(), &re, &ignores, None, &cellar, prefix);

        let texts: Vec<_> = matches.iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec![format!("{p}/lib"), format!("/x:{p}/lib:/y")]);
        assert_eq!(matches[0].offset, 1);
    }

    #[test]
    fn test_text_matches_ignores_build_dependencies() {
        let temp = TempDir::new().unwrap();
        let prefix = temp.path();
        let cellar = prefix.join("Cellar");
        fs::create_dir_all(cellar.join("zlib/1.3/lib")).unwrap();
        fs::create_dir_all(cellar.join("cmake/3.29/bin")).unwrap();
        let c = cellar.to_string_lossy();

        let content = format!("\0{c}/zlib/1.3/lib\0{c}/cmake/3.29/bin\0");
        let re = location_regex(&c).unwrap();
        let deps = vec!["foo".to_string(), "zlib".to_string()];
        let matches = text_matches(content.as_bytes(), &re, &[], Some(&deps), &cellar, prefix);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, format!("{c}/zlib/1.3/lib"));
    }

    fn keg_with(temp: &TempDir, files: &[(&str, String)]) -> (Keg, InstallPaths) {
        let prefix = temp.path().join("prefix");
        let paths = InstallPaths {
            cellar: prefix.join("Cellar"),
            repository: prefix.clone(),
            library: prefix.join("Library"),
            locks_dir: prefix.join("var/homebrew/locks"),
            prefix,
        };
        let keg = Keg::new(&paths.cellar, "foo", "1.0");
        for (name, content) in files {
            let path = keg.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        fs::create_dir_all(paths.prefix.join("etc")).unwrap();
        fs::create_dir_all(&paths.library).unwrap();
        (keg, paths)
    }

    #[test]
    fn test_clean_keg_is_relocatable() {
        let temp = TempDir::new().unwrap();
        let (keg, paths) = keg_with(&temp, &[("bin/foo", "#!/bin/sh\necho hi\n".to_string())]);
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        scanner.ensure_no_repository_reference(&paths, false).unwrap();
        assert!(scanner.is_relocatable(&paths, &["foo".to_string()], false).unwrap());
    }

    #[test]
    fn test_go_libexec_is_ignored() {
        let temp = TempDir::new().unwrap();
        let libexec = temp.path().join("prefix/Cellar/go/1.22.1/libexec");
        let text = libexec.to_string_lossy().into_owned();
        let (keg, paths) = keg_with(&temp, &[("bin/foo", format!("{text}\n"))]);
        fs::create_dir_all(&libexec).unwrap();
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        assert!(!scanner.is_relocatable(&paths, &[], false).unwrap());
        assert!(scanner.is_relocatable(&paths, &[], true).unwrap());
    }

    #[test]
    fn test_prefix_reference_is_not_relocatable() {
        let temp = TempDir::new().unwrap();
        let etc = temp.path().join("prefix/etc").to_string_lossy().into_owned();
        let (keg, paths) = keg_with(&temp, &[("bin/foo", format!("#!/bin/sh\n{etc}\n"))]);
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        assert!(!scanner.is_relocatable(&paths, &["foo".to_string()], false).unwrap());
    }

    #[test]
    fn test_metafiles_are_skipped() {
        let temp = TempDir::new().unwrap();
        let etc = temp.path().join("prefix/etc").to_string_lossy().into_owned();
        let (keg, paths) = keg_with(&temp, &[("share/doc/README.md", format!("{etc}\n"))]);
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        assert!(scanner.is_relocatable(&paths, &["foo".to_string()], false).unwrap());
    }

    #[test]
    fn test_library_reference_is_fatal() {
        let temp = TempDir::new().unwrap();
        let library = temp.path().join("prefix/Library");
        let lib = library.to_string_lossy().into_owned();
        let (keg, paths) = keg_with(&temp, &[("lib/foo.pc", format!("{lib}\n"))]);
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        let err = scanner.ensure_no_repository_reference(&paths, false).unwrap_err();
        assert!(matches!(err, Error::NonRelocatable { reference } if reference == lib));
    }

    #[test]
    fn test_allowed_pkgconfig_link() {
        let temp = TempDir::new().unwrap();
        let pkgconfig = temp.path().join("prefix/Library/Homebrew/os/mac/pkgconfig");
        let text = pkgconfig.to_string_lossy().into_owned();
        let (keg, paths) = keg_with(&temp, &[("lib/foo.pc", format!("{text}\n"))]);
        fs::create_dir_all(&pkgconfig).unwrap();
        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        scanner.ensure_no_repository_reference(&paths, false).unwrap();
        assert!(!scanner.is_relocatable(&paths, &[], false).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_symlinks() {
        let temp = TempDir::new().unwrap();
        let (keg, paths) = keg_with(&temp, &[("bin/foo", "x".to_string())]);
        let target = paths.prefix.join("etc/foo.conf");
        std::os::unix::fs::symlink(&target, keg.path().join("foo.conf")).unwrap();
        std::os::unix::fs::symlink("bin/foo", keg.path().join("relative")).unwrap();

        let scanner = KegScanner::new(&keg, &paths.cellar, &paths.prefix);
        let links = scanner
            .absolute_symlinks_starting_with(&paths.prefix.to_string_lossy())
            .unwrap();
        assert_eq!(links, vec![keg.path().join("foo.conf")]);
    }
}
