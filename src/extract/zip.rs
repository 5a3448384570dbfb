//! Zip extraction with legacy filename charset handling.
//!
//! Entry names without the UTF-8 flag are raw bytes in whatever code page the
//! creating machine used. The zip crate decodes those as CP437, which turns
//! CJK names into mojibake, so names are re-decoded here from the raw bytes
//! with an explicit or detected charset.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, info};
use zip::result::ZipError;
use zip::ZipArchive;

use super::scratch::ScratchDir;
use super::{try_passwords, Attempt};
use crate::charset::{decode_strict, encoding_for_label, CharsetDetector, DetectError};
use crate::error::{ExtractError, IoContext, Result};
use crate::options::ExtractOptions;
use crate::sanitize::{clean_dir_path, clean_file_path, is_macos_metadata};

/// Central-directory facts about one entry.
#[derive(Debug)]
struct RawEntry {
    index: usize,
    raw: Vec<u8>,
    name: String,
    legacy: bool,
    is_dir: bool,
    encrypted: bool,
}

/// An entry with its final, cleaned location inside the scratch directory.
#[derive(Debug)]
struct Planned {
    index: usize,
    target: PathBuf,
    is_dir: bool,
    encrypted: bool,
}

fn decode_error(archive: &Path, reason: impl ToString) -> ExtractError {
    ExtractError::Decode {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Non-ASCII names the zip crate did not take as UTF-8 verbatim.
fn is_legacy_name(raw: &[u8], decoded: &str) -> bool {
    if raw.is_ascii() {
        return false;
    }
    match std::str::from_utf8(raw) {
        Ok(text) => text != decoded,
        Err(_) => String::from_utf8_lossy(raw) != decoded,
    }
}

fn read_entries<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &Path) -> Result<Vec<RawEntry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index).map_err(|e| decode_error(path, e))?;
        let raw = file.name_raw().to_vec();
        let name = file.name().to_string();
        entries.push(RawEntry {
            index,
            legacy: is_legacy_name(&raw, &name),
            raw,
            name,
            is_dir: file.is_dir(),
            encrypted: file.encrypted(),
        });
    }
    Ok(entries)
}

/// Pick the charset for legacy names: explicit option first, else detection.
fn resolve_encoding(
    entries: &[RawEntry],
    path: &Path,
    options: &ExtractOptions,
) -> Result<Option<&'static Encoding>> {
    if let Some(label) = options.zip_filename_encoding.as_deref() {
        return encoding_for_label(label)
            .map(Some)
            .ok_or_else(|| ExtractError::UnsupportedEncoding {
                archive: path.to_path_buf(),
                label: label.to_string(),
            });
    }

    let legacy: Vec<&[u8]> = entries
        .iter()
        .filter(|e| e.legacy)
        .map(|e| e.raw.as_slice())
        .collect();
    if legacy.is_empty() {
        return Ok(None);
    }

    CharsetDetector::new()
        .detect(legacy, options.strict_encoding_detection)
        .map(Some)
        .map_err(|e| match e {
            DetectError::NotCjk => ExtractError::UnknownEncoding(path.to_path_buf()),
            DetectError::Ambiguous(candidates) => ExtractError::AmbiguousEncoding {
                archive: path.to_path_buf(),
                candidates: candidates.into_iter().map(String::from).collect(),
            },
        })
}

fn entry_name(entry: &RawEntry, encoding: Option<&'static Encoding>, path: &Path) -> Result<String> {
    if !entry.legacy {
        return Ok(entry.name.clone());
    }
    let encoding = encoding.unwrap_or(UTF_8);
    decode_strict(encoding, &entry.raw).ok_or_else(|| ExtractError::UndecodableName {
        archive: path.to_path_buf(),
        encoding: encoding.name().to_string(),
        raw: entry.name.clone(),
    })
}

/// Decode, clean and de-duplicate every entry path.
fn plan(entries: &[RawEntry], encoding: Option<&'static Encoding>, path: &Path) -> Result<Vec<Planned>> {
    let mut planned = Vec::with_capacity(entries.len());
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for entry in entries {
        let name = entry_name(entry, encoding, path)?;
        let cleaned = if entry.is_dir {
            clean_dir_path(&name)
        } else {
            clean_file_path(&name)
        };
        let target = match cleaned {
            Some(target) => target,
            None => {
                debug!("Skipping entry with empty path: {:?}", name);
                continue;
            }
        };
        if is_macos_metadata(&target) {
            continue;
        }

        if !entry.is_dir && !seen.insert(target.clone()) {
            return Err(ExtractError::DuplicateEntryName {
                archive: path.to_path_buf(),
                path: target,
            });
        }

        planned.push(Planned {
            index: entry.index,
            target,
            is_dir: entry.is_dir,
            encrypted: entry.encrypted,
        });
    }

    Ok(planned)
}

fn is_password_error(error: &ZipError) -> bool {
    match error {
        ZipError::InvalidPassword => true,
        ZipError::UnsupportedArchive(detail) => *detail == ZipError::PASSWORD_REQUIRED,
        _ => false,
    }
}

/// Classify an error raised while streaming one entry to disk.
///
/// A wrong password can slip past the header check and only show up as a
/// checksum or inflate failure, both reported as invalid data or input.
fn copy_failure(error: io::Error, encrypted: bool, archive: &Path, out: &Path) -> Attempt {
    match error.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            if encrypted {
                Attempt::Rejected(error.to_string())
            } else {
                Attempt::Failed(decode_error(archive, error))
            }
        }
        _ => Attempt::Failed(ExtractError::io(out, error)),
    }
}

/// Write every planned entry into `root` using one password.
fn write_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    planned: &[Planned],
    root: &Path,
    password: &str,
    path: &Path,
) -> std::result::Result<(), Attempt> {
    for entry in planned {
        let out = root.join(&entry.target);
        if entry.is_dir {
            fs::create_dir_all(&out).at(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let opened = if entry.encrypted && !password.is_empty() {
            archive.by_index_decrypt(entry.index, password.as_bytes())
        } else {
            archive.by_index(entry.index)
        };
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if is_password_error(&e) => return Err(Attempt::Rejected(e.to_string())),
            Err(e) => return Err(Attempt::Failed(decode_error(path, e))),
        };

        let mut writer = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&out)
            .at(&out)?;
        if let Err(e) = io::copy(&mut file, &mut writer) {
            return Err(copy_failure(e, entry.encrypted, path, &out));
        }
    }
    Ok(())
}

/// Extract a zip read from `reader` into `scratch`.
///
/// Returns the charset used for legacy names, if any were present.
pub fn extract<R: Read + Seek>(
    reader: R,
    path: &Path,
    scratch: &ScratchDir,
    options: &ExtractOptions,
) -> Result<Option<&'static Encoding>> {
    let mut archive = ZipArchive::new(reader).map_err(|e| decode_error(path, e))?;
    let entries = read_entries(&mut archive, path)?;

    let encoding = resolve_encoding(&entries, path, options)?;
    if let Some(encoding) = encoding {
        info!("Using {} for filenames in {}", encoding.name(), path.display());
    }

    let planned = plan(&entries, encoding, path)?;

    if !planned.iter().any(|e| e.encrypted) {
        return match write_entries(&mut archive, &planned, scratch.path(), "", path) {
            Ok(()) => Ok(encoding),
            Err(Attempt::Failed(e)) => Err(e),
            Err(Attempt::Rejected(reason)) => Err(decode_error(path, reason)),
        };
    }

    try_passwords(path, scratch, &options.password_candidates(), |password| {
        write_entries(&mut archive, &planned, scratch.path(), password, path)
    })?;
    Ok(encoding)
}
