//! Package definition files.
//!
//! Locates the `bottle do ... end` block with a nesting-aware line scan so
//! that blocks are replaced or inserted as whole stanzas, never by blind
//! text substitution.

use crate::error::{Error, Result};
use crate::text::{ParsedBlock, parse_bottle_block};
use regex::Regex;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static OPENS_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r"^(class|module|def|if|unless|case|while|until|begin)\b")
});
static OPENS_DO: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"\bdo(\s*\|[^|]*\|)?$"));
static CLOSES: LazyLock<Regex> = LazyLock::new(|| crate::static_regex(r"^end\b"));
static ONE_LINER: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"[;\s]end$"));
static ENDLESS_DEF: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^def\s+[\w?!]+(\([^)]*\))?\s*="));
static HEREDOC: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r#"<<[~-]?['"]?([A-Z_][A-Z0-9_]*)['"]?"#));
static BOTTLE_START: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^bottle\s+do\b"));
static HEADER_STANZA: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r"^(include|desc|homepage|url|mirror|version|sha256|license|revision|version_scheme|compatibility_version|head|stable|livecheck)\b")
});
static VERSION_STANZA: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r#"^version\s+"([^"]+)""#));
static REVISION_STANZA: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^revision\s+(\d+)"));
static URL_STANZA: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r#"^url\s+"([^"]+)""#));
static URL_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r"(?:^|[-_])v?(\d+(?:\.\d+)*[a-z]?\d*)$")
});

const ARCHIVE_EXTENSIONS: [&str; 9] = [
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tar.lz", ".tgz", ".tbz", ".zip", ".tar",
];

/// One scanned line.
#[derive(Debug, Clone)]
struct Line {
    /// Byte range including the trailing newline.
    span: Range<usize>,
    /// Code with comments and surrounding whitespace removed; empty inside heredocs.
    code: String,
    /// Nesting depth before this line.
    depth: usize,
}

/// A package definition file held in memory.
#[derive(Debug, Clone)]
pub struct Definition {
    path: PathBuf,
    content: String,
}

impl Definition {
    /// Reads a definition from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| bottler_core::Error::io_at(path, e))?;
        Ok(Self::from_content(path, content))
    }

    /// Wraps already loaded content.
    #[must_use]
    pub fn from_content(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// The definition path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    fn scan(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut depth = 0usize;
        let mut heredoc_end: Option<String> = None;
        let mut offset = 0usize;

        for raw in self.content.split_inclusive('\n') {
            let span = offset..offset + raw.len();
            offset += raw.len();

            if let Some(terminator) = &heredoc_end {
                if raw.trim() == terminator {
                    heredoc_end = None;
                }
                lines.push(Line {
                    span,
                    code: String::new(),
                    depth,
                });
                continue;
            }

            let code = strip_comment(raw).trim().to_string();
            lines.push(Line {
                span,
                code: code.clone(),
                depth,
            });

            if let Some(caps) = HEREDOC.captures(&code) {
                heredoc_end = Some(caps[1].to_string());
            }
            if CLOSES.is_match(&code) {
                depth = depth.saturating_sub(1);
            } else if ((OPENS_KEYWORD.is_match(&code) && !ENDLESS_DEF.is_match(&code))
                || OPENS_DO.is_match(&code))
                && !ONE_LINER.is_match(&code)
            {
                depth += 1;
            }
        }
        lines
    }

    /// Byte range of the top-level bottle block, whole lines included.
    #[must_use]
    pub fn bottle_block_range(&self) -> Option<Range<usize>> {
        let lines = self.scan();
        let start = lines
            .iter()
            .position(|l| l.depth == 1 && BOTTLE_START.is_match(&l.code))?;
        let end = block_end(&lines, start)?;
        Some(lines[start].span.start..lines[end].span.end)
    }

    /// Parses the existing bottle block.
    ///
    /// # Errors
    ///
    /// Returns an error if the block exists but is malformed.
    pub fn bottle_block(&self, default_root_url: &str) -> Result<Option<ParsedBlock>> {
        match self.bottle_block_range() {
            Some(range) => parse_bottle_block(&self.content[range], default_root_url),
            None => Ok(None),
        }
    }

    /// The package version (`version` stanza or inferred from `url`) with its revision.
    #[must_use]
    pub fn pkg_version(&self) -> Option<String> {
        let lines = self.scan();
        let top_level = || lines.iter().filter(|l| l.depth == 1);

        let version = top_level()
            .find_map(|l| VERSION_STANZA.captures(&l.code).map(|c| c[1].to_string()))
            .or_else(|| {
                top_level()
                    .find_map(|l| URL_STANZA.captures(&l.code).map(|c| c[1].to_string()))
                    .and_then(|url| version_from_url(&url))
            })?;
        let revision = top_level()
            .find_map(|l| REVISION_STANZA.captures(&l.code).and_then(|c| c[1].parse::<u32>().ok()))
            .unwrap_or(0);

        Some(if revision > 0 {
            format!("{version}_{revision}")
        } else {
            version
        })
    }

    /// Replaces the existing bottle block with `block`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no bottle block.
    pub fn replace_bottle_block(&mut self, block: &str) -> Result<()> {
        let range = self
            .bottle_block_range()
            .ok_or_else(|| Error::parse(self.path.display().to_string(), "no bottle block to replace"))?;
        debug!(path = %self.path.display(), "Replacing bottle block");
        self.content.replace_range(range, &ensure_newline(block));
        Ok(())
    }

    /// Inserts `block` after the last header stanza (`url`, `sha256`, `license`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if no top-level class body is found.
    pub fn add_bottle_block(&mut self, block: &str) -> Result<()> {
        let lines = self.scan();
        let class_line = lines
            .iter()
            .position(|l| l.depth == 0 && l.code.starts_with("class "))
            .ok_or_else(|| Error::parse(self.path.display().to_string(), "no class definition"))?;

        let anchor = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.depth == 1 && HEADER_STANZA.is_match(&l.code))
            .map(|(i, l)| {
                if OPENS_DO.is_match(&l.code) {
                    block_end(&lines, i).unwrap_or(i)
                } else {
                    i
                }
            })
            .max()
            .unwrap_or(class_line);

        let at = lines[anchor].span.end;
        let mut insertion = String::new();
        if !self.content[..at].ends_with('\n') {
            insertion.push('\n');
        }
        if anchor != class_line {
            insertion.push('\n');
        }
        insertion.push_str(&ensure_newline(block));
        if anchor == class_line {
            insertion.push('\n');
        }

        debug!(path = %self.path.display(), line = anchor + 1, "Adding bottle block");
        self.content.insert_str(at, &insertion);
        Ok(())
    }

    /// Writes the content back atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self) -> Result<()> {
        bottler_core::fs::atomic_write(&self.path, self.content.as_bytes())?;
        Ok(())
    }
}

fn block_end(lines: &[Line], start: usize) -> Option<usize> {
    let depth = lines[start].depth;
    lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| l.depth == depth + 1 && CLOSES.is_match(&l.code))
        .map(|(i, _)| i)
}

fn ensure_newline(block: &str) -> String {
    if block.ends_with('\n') {
        block.to_string()
    } else {
        format!("{block}\n")
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', Some(_)) => escaped = true,
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Infers a version from the last path segment of a download URL.
#[must_use]
pub fn version_from_url(url: &str) -> Option<String> {
    let segment = url.trim_end_matches('/').rsplit('/').next()?;
    let stem = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| segment.strip_suffix(ext))
        .unwrap_or(segment);
    URL_VERSION.captures(stem).map(|c| c[1].to_string())
}
