//! The declarative `bottle do ... end` block.
//!
//! Rendering aligns the checksum lines so tags and digests line up:
//!
//! ```text
//!   bottle do
//!     rebuild 1
//!     sha256 cellar: :any,                 arm64_sonoma: "..."
//!     sha256 cellar: "/opt/custom/Cellar", x86_64_linux: "..."
//!   end
//! ```

use crate::error::{Error, Result};
use crate::model::{BottleSpecification, CellarMode, ChecksumEntry};
use bottler_core::PlatformTag;
use bottler_core::config::host_default_prefix;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

const SHA256_KEYWORD: &str = "sha256 ";

static BLOCK_START: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^\s*bottle\s+do\s*(#.*)?$"));
static ROOT_URL: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r#"^root_url\s+"([^"]*)"(?:\s*,\s*using:\s*(\S+))?$"#)
});
static INTEGER_STANZA: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^(rebuild)\s+(\d+)$"));
static STRING_STANZA: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r#"^(prefix)\s+"([^"]*)"$"#));
static CELLAR_STANZA: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r#"^cellar\s+(?::(\w+)|"([^"]*)")$"#)
});
static SHA256_LINE: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r#"^sha256\s+(?:cellar:\s*(?::(\w+)|"([^"]*)")\s*,\s*)?([\w-]+):\s*"([0-9a-f]{64})"$"#)
});
static LEGACY_SHA256_LINE: LazyLock<Regex> = LazyLock::new(|| {
    crate::static_regex(r#"^sha256\s+"([0-9a-f]{64})"\s*=>\s*:([\w-]+)$"#)
});
static STANZA_NAME: LazyLock<Regex> =
    LazyLock::new(|| crate::static_regex(r"^([a-z_]+[!?]?)\b"));

/// Renders the bottle block for a definition file.
///
/// The `root_url` line is omitted when it equals `default_root_url` (or its
/// `/bottles` variant) and the `rebuild` line when the counter is zero.
#[must_use]
pub fn render_block(spec: &BottleSpecification, default_root_url: &str) -> String {
    let checksums = spec.checksums();

    let tag_column = checksums
        .iter()
        .filter_map(|c| c.cellar.block_value())
        .map(|v| v.len())
        .max()
        .map_or(0, |len| "cellar: ".len() + len + ", ".len());
    let longest_tag = checksums.iter().map(|c| c.tag.as_str().len()).max().unwrap_or(0);
    let digest_column = tag_column + longest_tag + 2;

    let mut out = String::from("  bottle do\n");

    let default_bottles = format!("{default_root_url}/bottles");
    if spec.root_url != default_root_url && spec.root_url != default_bottles {
        let _ = write!(out, "    root_url \"{}\"", spec.root_url);
        if let Some(using) = &spec.root_url_using {
            let _ = write!(out, ",\n      using: {using}");
        }
        out.push('\n');
    }
    if spec.rebuild > 0 {
        let _ = writeln!(out, "    rebuild {}", spec.rebuild);
    }
    for entry in checksums {
        let _ = writeln!(out, "    {}", sha256_line(entry, tag_column, digest_column));
    }
    out.push_str("  end\n");
    out
}

fn sha256_line(entry: &ChecksumEntry, tag_column: usize, digest_column: usize) -> String {
    let mut line = String::from(SHA256_KEYWORD);
    let tag_column = tag_column + SHA256_KEYWORD.len();
    let digest_column = digest_column + SHA256_KEYWORD.len();

    if let Some(cellar) = entry.cellar.block_value() {
        let _ = write!(line, "cellar: {cellar},");
    }
    pad_to(&mut line, tag_column);
    let _ = write!(line, "{}:", entry.tag);
    pad_to(&mut line, digest_column);
    let _ = write!(line, "\"{}\"", entry.digest);
    line
}

fn pad_to(line: &mut String, column: usize) {
    let missing = column.saturating_sub(line.len());
    line.extend(std::iter::repeat_n(' ', missing));
}

/// A bottle block read back from a definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// The specification the block describes.
    pub spec: BottleSpecification,
    /// Stanza names in the order they appear (`root_url`, `rebuild`, `sha256`, ...).
    pub keys: Vec<String>,
}

impl ParsedBlock {
    /// Whether the block contains the named stanza.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

struct PendingChecksum {
    tag: PlatformTag,
    digest: String,
    cellar: Option<CellarMode>,
}

/// Parses the first `bottle do ... end` block in `text`.
///
/// Returns `Ok(None)` when there is no bottle block.
///
/// # Errors
///
/// Returns an error if the block is unterminated or a stanza is malformed.
pub fn parse_bottle_block(text: &str, default_root_url: &str) -> Result<Option<ParsedBlock>> {
    let mut lines = text.lines();
    if !lines.by_ref().any(|l| BLOCK_START.is_match(l)) {
        return Ok(None);
    }

    let mut spec = BottleSpecification::new(default_root_url);
    let mut keys: Vec<String> = Vec::new();
    let mut pending: Vec<PendingChecksum> = Vec::new();
    let mut default_cellar: Option<CellarMode> = None;
    let mut terminated = false;
    let mut statement = String::new();

    for raw in lines {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if !statement.is_empty() {
            statement.push(' ');
        }
        statement.push_str(line);
        if statement.ends_with(',') {
            continue;
        }
        let current = std::mem::take(&mut statement);

        if current == "end" {
            terminated = true;
            break;
        }

        let key = STANZA_NAME
            .captures(&current)
            .map(|c| c[1].to_string())
            .ok_or_else(|| Error::parse("bottle block", format!("unexpected line: {current}")))?;
        if !keys.contains(&key) {
            keys.push(key.clone());
        }

        if let Some(caps) = ROOT_URL.captures(&current) {
            spec.root_url = caps[1].to_string();
            spec.root_url_using = caps.get(2).map(|m| m.as_str().to_string());
        } else if let Some(caps) = INTEGER_STANZA.captures(&current) {
            spec.rebuild = caps[2]
                .parse()
                .map_err(|_| Error::parse("bottle block", format!("bad rebuild: {current}")))?;
        } else if let Some(caps) = STRING_STANZA.captures(&current) {
            spec.prefix = Some(caps[2].to_string());
        } else if let Some(caps) = CELLAR_STANZA.captures(&current) {
            default_cellar = Some(cellar_from_captures(caps.get(1), caps.get(2)));
        } else if let Some(caps) = SHA256_LINE.captures(&current) {
            let cellar = caps.get(1).is_some() || caps.get(2).is_some();
            pending.push(PendingChecksum {
                tag: PlatformTag::parse(&caps[3])?,
                digest: caps[4].to_string(),
                cellar: cellar.then(|| cellar_from_captures(caps.get(1), caps.get(2))),
            });
        } else if let Some(caps) = LEGACY_SHA256_LINE.captures(&current) {
            pending.push(PendingChecksum {
                tag: PlatformTag::parse(&caps[2])?,
                digest: caps[1].to_string(),
                cellar: None,
            });
        } else if key == "sha256" || key == "root_url" || key == "rebuild" {
            return Err(Error::parse("bottle block", format!("malformed stanza: {current}")));
        }
    }

    if !terminated {
        return Err(Error::parse("bottle block", "missing `end`"));
    }

    for checksum in pending {
        let cellar = checksum
            .cellar
            .or_else(|| default_cellar.clone())
            .unwrap_or_else(|| implied_cellar(&checksum.tag));
        spec.add_checksum(checksum.tag, checksum.digest, cellar)?;
    }

    Ok(Some(ParsedBlock { spec, keys }))
}

fn cellar_from_captures(symbol: Option<regex::Match<'_>>, path: Option<regex::Match<'_>>) -> CellarMode {
    match (symbol, path) {
        (Some(sym), _) => CellarMode::parse(sym.as_str()),
        (None, Some(path)) => CellarMode::Fixed(path.as_str().to_string()),
        (None, None) => CellarMode::Fixed(String::new()),
    }
}

fn implied_cellar(tag: &PlatformTag) -> CellarMode {
    CellarMode::Fixed(
        tag.default_cellar()
            .unwrap_or_else(|| format!("{}/Cellar", host_default_prefix())),
    )
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}
