//! Normalizers for archive entry paths.
//!
//! Entry names are untrusted: they may use backslashes, climb out with `..`,
//! start with `/`, or contain characters no filesystem accepts. Cleaning
//! never lets a path escape the extraction root.

use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Longest filename (in bytes) most filesystems accept.
const MAX_NAME_BYTES: usize = 255;

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Split an entry name into its meaningful components.
///
/// `.` and empty segments vanish, `..` pops one level but never past the root.
fn components(entry: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for segment in entry.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(clean_component(other)),
        }
    }
    parts.retain(|part| !part.is_empty());
    parts
}

/// Replace characters that are invalid in filenames and trim what Windows would drop.
fn clean_component(segment: &str) -> String {
    let replaced: String = segment
        .nfc()
        .map(|c| {
            if c.is_control() || RESERVED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    replaced.trim_end_matches([' ', '.']).to_string()
}

/// Cut a name to `MAX_NAME_BYTES`, keeping its extension intact.
fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };

    let budget = MAX_NAME_BYTES - ext.len();
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

/// Clean a directory entry path. Returns `None` when nothing is left.
pub fn clean_dir_path(entry: &str) -> Option<PathBuf> {
    let parts = components(entry);
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

/// Clean a file entry path, also shortening an overlong final name
/// while preserving its extension. Returns `None` when nothing is left.
pub fn clean_file_path(entry: &str) -> Option<PathBuf> {
    let mut parts = components(entry);
    let name = parts.pop()?;
    parts.push(truncate_name(&name));
    Some(parts.iter().collect())
}

/// Whether a cleaned entry path lives under the macOS resource-fork folder.
///
/// Takes the output of [`clean_dir_path`] or [`clean_file_path`], so `./`
/// prefixes and leading slashes are already gone.
pub fn is_macos_metadata(cleaned: &Path) -> bool {
    cleaned
        .components()
        .next()
        .is_some_and(|first| first.as_os_str() == "__MACOSX")
}
