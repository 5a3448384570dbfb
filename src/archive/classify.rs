//! Filename-based archive classification.
//!
//! Split archives come in four incompatible naming conventions:
//!
//! - `name.part1.rar`, `name.part2.rar` (new-style RAR volumes, also `.exe` for SFX heads)
//! - `name.7z.001`, `name.zip.002` (byte-split volumes, numbered from 001)
//! - `name.rar` + `name.r00`, `name.r01` (legacy RAR volumes)
//! - `name.zip` + `name.z01`, `name.z02` (spanned zip)
//!
//! Rules are tried in order and the first match wins. The order matters:
//! `name.part2.rar` would otherwise be grouped under `name.part2` by the
//! plain-extension rule.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{IoContext, Result};

/// Archive format, which also picks the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Rar,
    SevenZip,
    Gzip,
    Tar,
    Xz,
    Lz4,
}

impl ArchiveFormat {
    /// Map a bare extension or split tag (`zip`, `7z`, `001`, ...) to a format.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "zip" => Some(Self::Zip),
            "rar" | "exe" => Some(Self::Rar),
            // Bare numbered splits are almost always produced by 7-Zip
            "7z" | "001" => Some(Self::SevenZip),
            "gz" => Some(Self::Gzip),
            "tar" => Some(Self::Tar),
            "xz" => Some(Self::Xz),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Rar => "rar",
            Self::SevenZip => "7z",
            Self::Gzip => "gz",
            Self::Tar => "tar",
            Self::Xz => "xz",
            Self::Lz4 => "lz4",
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one directory entry as an archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Base name shared by every member of the same logical archive.
    pub key: String,
    pub format: ArchiveFormat,
}

/// How far into an `.exe` to look for an embedded RAR signature.
pub const SFX_PEEK_LIMIT: u64 = 1024 * 1024;

const RAR_SIGNATURE: &[u8; 4] = b"Rar!";

/// Extensions of volumes that act as the decoder entry point.
/// Members ending in anything else (`.r00`, `.z01`, `.001`) are continuation parts.
pub const MAIN_EXTENSIONS: &[&str] = &[
    ".rar", ".zip", ".exe", ".7z", ".tar", ".gz", ".xz", ".lz4",
];

/// Where a rule takes the format from.
#[derive(Debug, Clone, Copy)]
enum FormatSource {
    Fixed(ArchiveFormat),
    /// Second capture group, mapped through [`ArchiveFormat::from_tag`].
    Captured,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    format: FormatSource,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, format: FormatSource) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap(),
            format,
        }
    }

    fn apply(&self, filename: &str) -> Option<Classification> {
        let caps = self.pattern.captures(filename)?;
        let key = caps.get(1)?.as_str().to_string();
        let format = match self.format {
            FormatSource::Fixed(format) => format,
            FormatSource::Captured => ArchiveFormat::from_tag(caps.get(2)?.as_str())?,
        };
        Some(Classification { key, format })
    }
}

const NEW_SPLIT: &str = "new-split";

/// Priority-ordered filename rules (everything except the SFX signature check).
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            NEW_SPLIT,
            r"(?i)^(.+)\.part\d+\.(?:rar|exe)$",
            FormatSource::Fixed(ArchiveFormat::Rar),
        ),
        Rule::new(
            "numbered-split",
            r"(?i)^(.+)\.(7z|zip|001)\.\d{3}$",
            FormatSource::Captured,
        ),
        Rule::new(
            "legacy-rar-split",
            r"(?i)^(.+)\.r\d{2}$",
            FormatSource::Fixed(ArchiveFormat::Rar),
        ),
        Rule::new(
            "zip-split",
            r"(?i)^(.+)\.z\d{2}$",
            FormatSource::Fixed(ArchiveFormat::Zip),
        ),
        Rule::new(
            "extension",
            r"(?i)^(.+)\.(zip|rar|7z|gz|tar|xz|lz4)$",
            FormatSource::Captured,
        ),
    ]
});

fn is_exe(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".exe")
}

/// Classify a filename by name alone.
///
/// `.exe` files are never members here: whether an executable is a RAR SFX
/// depends on its contents, see [`classify`].
pub fn classify_name(filename: &str) -> Option<Classification> {
    if is_exe(filename) {
        return None;
    }
    RULES.iter().find_map(|rule| {
        let found = rule.apply(filename);
        if found.is_some() {
            tracing::trace!("{} matched rule {}", filename, rule.name);
        }
        found
    })
}

/// Classify a file on disk.
///
/// Executables are peeked for the `Rar!` signature in their first MiB; a
/// plain executable is not an archive member. Everything else goes through
/// [`classify_name`]. Names that are not valid UTF-8 are matched in their
/// lossy form, see [`raw_key`] for getting the on-disk key back.
pub fn classify(path: &Path) -> Result<Option<Classification>> {
    let lossy = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return Ok(None),
    };
    let filename: &str = &lossy;

    if !is_exe(filename) {
        return Ok(classify_name(filename));
    }

    if !has_rar_signature(path)? {
        return Ok(None);
    }

    let new_split = RULES
        .iter()
        .find(|rule| rule.name == NEW_SPLIT)
        .and_then(|rule| rule.apply(filename));

    Ok(Some(new_split.unwrap_or_else(|| Classification {
        key: filename[..filename.len() - ".exe".len()].to_string(),
        format: ArchiveFormat::Rar,
    })))
}

/// The grouping key of `filename` with its on-disk bytes.
///
/// `key` was matched against the lossy form of `filename` and every rule
/// only strips an ASCII suffix, so cutting that many bytes off the real name
/// keeps bytes that are not UTF-8 intact. Falls back to `key` otherwise.
pub fn raw_key(filename: &OsStr, key: &str) -> OsString {
    let lossy = filename.to_string_lossy();
    let suffix_len = match lossy.strip_prefix(key) {
        Some(suffix) if suffix.is_ascii() => suffix.len(),
        _ => return OsString::from(key),
    };
    strip_suffix_bytes(filename, suffix_len).unwrap_or_else(|| OsString::from(key))
}

#[cfg(unix)]
fn strip_suffix_bytes(name: &OsStr, len: usize) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;

    let bytes = name.as_bytes();
    let end = bytes.len().checked_sub(len)?;
    Some(OsStr::from_bytes(&bytes[..end]).to_os_string())
}

#[cfg(not(unix))]
fn strip_suffix_bytes(name: &OsStr, len: usize) -> Option<OsString> {
    let name = name.to_str()?;
    let end = name.len().checked_sub(len)?;
    name.get(..end).map(OsString::from)
}

/// Scan the head of a file for the RAR marker.
pub fn has_rar_signature(path: &Path) -> Result<bool> {
    let file = File::open(path).at(path)?;
    let mut head = Vec::new();
    file.take(SFX_PEEK_LIMIT)
        .read_to_end(&mut head)
        .at(path)?;
    Ok(head.windows(RAR_SIGNATURE.len()).any(|w| w == RAR_SIGNATURE))
}

/// Whether a member name ends in one of [`MAIN_EXTENSIONS`].
pub fn is_main_member(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    MAIN_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
