//! Extraction engine.
//!
//! Every group is decoded into a scratch directory inside the destination,
//! redundant single-folder wrappers are collapsed, and the remaining top-level
//! items are renamed into place. Nothing under the destination is ever
//! overwritten: every target path is checked before the first rename.

pub mod external;
pub mod generic;
pub mod scratch;
pub mod zip;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::classify::raw_key;
use crate::archive::{ArchiveFormat, ArchiveGroup};
use crate::error::{ExtractError, IoContext, Result};
use crate::options::ExtractOptions;
use external::{Launcher, SystemLauncher};
use scratch::ScratchDir;

/// What one successful extraction produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub archive: String,
    pub format: ArchiveFormat,
    /// Directory the top-level items were placed in.
    #[serde(serialize_with = "lossy_path")]
    pub destination: PathBuf,
    /// Top-level names committed into `destination`.
    pub items: Vec<String>,
    /// Regular files written, counted recursively.
    pub files: usize,
    /// Charset used for legacy zip filenames, when one was needed.
    pub encoding: Option<String>,
    /// Whether the external binary did the decoding.
    pub external: bool,
}

/// Destinations named after archives need not be UTF-8.
fn lossy_path<P, S>(path: &P, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    P: AsRef<Path>,
    S: serde::Serializer,
{
    serializer.serialize_str(&path.as_ref().to_string_lossy())
}

/// Outcome of a single decode pass with one password.
pub(crate) enum Attempt {
    /// The decoder rejected the password; the next candidate may work.
    Rejected(String),
    Failed(ExtractError),
}

impl From<ExtractError> for Attempt {
    fn from(e: ExtractError) -> Self {
        Attempt::Failed(e)
    }
}

/// Run `pass` once per candidate password on an emptied scratch directory,
/// stopping at the first success or the first non-password failure.
pub(crate) fn try_passwords<F>(
    archive: &Path,
    scratch: &ScratchDir,
    passwords: &[&str],
    mut pass: F,
) -> Result<()>
where
    F: FnMut(&str) -> std::result::Result<(), Attempt>,
{
    let mut last_error = String::new();
    for (attempt, password) in passwords.iter().enumerate() {
        scratch.reset()?;
        match pass(password) {
            Ok(()) => return Ok(()),
            Err(Attempt::Failed(e)) => return Err(e),
            Err(Attempt::Rejected(reason)) => {
                debug!(
                    "Password {}/{} rejected for {}: {}",
                    attempt + 1,
                    passwords.len(),
                    archive.display(),
                    reason
                );
                last_error = reason;
            }
        }
    }

    Err(ExtractError::DecryptionFailed {
        archive: archive.to_path_buf(),
        attempts: passwords.len(),
        last_error,
    })
}

/// Spanned zip sets (`name.zip` + `name.z01`) need the external binary.
fn is_spanned_zip(group: &ArchiveGroup) -> bool {
    group.format == ArchiveFormat::Zip
        && group.members.iter().any(|m| {
            let lower = m.to_string_lossy().to_ascii_lowercase();
            lower.len() > 4
                && lower.as_bytes()[lower.len() - 4] == b'.'
                && lower.as_bytes()[lower.len() - 3] == b'z'
                && lower[lower.len() - 2..].bytes().all(|b| b.is_ascii_digit())
        })
}

/// Name of the folder created for a group: compressed tarballs drop `.tar`.
///
/// Built from the on-disk stem so names that are not UTF-8 survive.
fn folder_name(group: &ArchiveGroup) -> OsString {
    let stem = group.stem();
    match group.format {
        ArchiveFormat::Gzip | ArchiveFormat::Xz | ArchiveFormat::Lz4
            if group.name.to_ascii_lowercase().ends_with(".tar") =>
        {
            raw_key(&stem, &group.name[..group.name.len() - ".tar".len()])
        }
        _ => stem,
    }
}

fn run_external<L: Launcher>(
    launcher: &L,
    binary: &Path,
    head: &Path,
    scratch: &ScratchDir,
    options: &ExtractOptions,
) -> Result<()> {
    external::extract_with(
        launcher,
        binary,
        head,
        scratch,
        &options.password_candidates(),
        &options.password_marker,
    )
}

/// Make extracted files readable and directories traversable.
///
/// Archives made on Windows sometimes carry modes like 0000 or 0600.
#[cfg(unix)]
fn fix_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if let Ok(metadata) = fs::symlink_metadata(path) {
            if metadata.file_type().is_symlink() {
                continue;
            }
            let mut perms = metadata.permissions();
            let mode = perms.mode();
            let wanted = if metadata.is_dir() { 0o755 } else { 0o644 };
            if mode & wanted != wanted {
                perms.set_mode(mode | wanted);
                fs::set_permissions(path, perms).ok();
            }
        }
    }
}

#[cfg(not(unix))]
fn fix_permissions(_dir: &Path) {}

fn entries_of(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        entries.push(entry.at(dir)?.path());
    }
    entries.sort();
    Ok(entries)
}

/// Descend while the only entry is a directory.
///
/// Returns the innermost directory and the name of the first folder collapsed.
fn collapse(root: &Path) -> Result<(PathBuf, Option<String>)> {
    let mut current = root.to_path_buf();
    let mut top_level: Option<String> = None;

    loop {
        let entries = entries_of(&current)?;
        let [only] = entries.as_slice() else {
            break;
        };
        let metadata = fs::symlink_metadata(only).at(only)?;
        if !metadata.is_dir() {
            break;
        }
        if top_level.is_none() {
            top_level = only
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
        }
        debug!("Collapsing wrapper folder {}", only.display());
        current = only.clone();
    }

    Ok((current, top_level))
}

/// Move `items` into `target`, refusing if any destination already exists.
fn commit(items: &[PathBuf], target: &Path) -> Result<Vec<String>> {
    if target.exists() && !target.is_dir() {
        return Err(ExtractError::DestinationCollision(target.to_path_buf()));
    }
    fs::create_dir_all(target).at(target)?;

    let mut moves = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.file_name() else {
            continue;
        };
        let dest = target.join(name);
        if fs::symlink_metadata(&dest).is_ok() {
            return Err(ExtractError::DestinationCollision(dest));
        }
        moves.push((item, dest, name.to_string_lossy().into_owned()));
    }

    let mut names = Vec::with_capacity(moves.len());
    for (from, to, name) in moves {
        // A racing writer can still create the path after the check above
        if fs::symlink_metadata(&to).is_ok() {
            return Err(ExtractError::DestinationCollision(to));
        }
        fs::rename(from, &to).at(&to)?;
        debug!("Committed {}", to.display());
        names.push(name);
    }
    Ok(names)
}

fn count_files(target: &Path, names: &[String]) -> usize {
    names
        .iter()
        .map(|name| {
            WalkDir::new(target.join(name))
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count()
        })
        .sum()
}

/// Extract one archive group from `source_dir` into `dest_dir`.
pub fn extract(
    source_dir: &Path,
    dest_dir: &Path,
    group: &ArchiveGroup,
    options: &ExtractOptions,
) -> Result<ExtractReport> {
    extract_with(&SystemLauncher, source_dir, dest_dir, group, options)
}

/// [`extract`] with the external binary run through `launcher`.
pub fn extract_with<L: Launcher>(
    launcher: &L,
    source_dir: &Path,
    dest_dir: &Path,
    group: &ArchiveGroup,
    options: &ExtractOptions,
) -> Result<ExtractReport> {
    fs::create_dir_all(dest_dir).at(dest_dir)?;
    let scratch = ScratchDir::create_in(dest_dir)?;
    let head = source_dir.join(group.head());

    let mut encoding = None;
    let mut external = false;

    if is_spanned_zip(group) {
        let binary = options.external_binary.as_deref().ok_or_else(|| ExtractError::Decode {
            archive: head.clone(),
            reason: "spanned zip volumes need an external extractor".to_string(),
        })?;
        run_external(launcher, binary, &head, &scratch, options)?;
        external = true;
    } else if group.format == ArchiveFormat::Zip {
        let reader = generic::open_volumes(source_dir, group)?;
        encoding = zip::extract(reader, &head, &scratch, options)?;
    } else if let Err(e) = generic::extract(source_dir, group, &scratch, options) {
        let Some(binary) = options.external_binary.as_deref() else {
            return Err(e);
        };
        warn!(
            "Built-in decoder failed on {} ({}), falling back to {}",
            head.display(),
            e,
            binary.display()
        );
        run_external(launcher, binary, &head, &scratch, options)?;
        external = true;
    }

    fix_permissions(scratch.path());

    let (root, top_level) = collapse(scratch.path())?;
    let items = entries_of(&root)?;

    let target = match top_level.as_deref() {
        Some(folder) => dest_dir.join(folder),
        None if options.create_archive_name_folder || items.len() > 1 => {
            dest_dir.join(folder_name(group))
        }
        None => dest_dir.to_path_buf(),
    };

    let names = commit(&items, &target)?;
    let files = count_files(&target, &names);
    info!(
        "Extracted {} into {} ({} file(s))",
        group.name,
        target.display(),
        files
    );

    Ok(ExtractReport {
        archive: group.name.clone(),
        format: group.format,
        destination: target,
        items: names,
        files,
        encoding: encoding.map(|e| e.name().to_string()),
        external,
    })
}
