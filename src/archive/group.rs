//! Directory scanning and grouping of archive volumes.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::Path;

use tracing::debug;

use super::classify::{classify, is_main_member, raw_key, ArchiveFormat};
use crate::error::{ExtractError, IoContext, Result};

/// One logical archive: every volume sharing a grouping key.
///
/// `members[0]` is the head volume handed to the decoder. Members keep their
/// on-disk names, which need not be UTF-8; `name` is the display form of the
/// grouping key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveGroup {
    pub name: String,
    pub format: ArchiveFormat,
    pub members: Vec<OsString>,
}

impl ArchiveGroup {
    /// The volume passed to decoders as entry point.
    pub fn head(&self) -> &OsStr {
        &self.members[0]
    }

    /// The grouping key with the head volume's on-disk bytes.
    pub fn stem(&self) -> OsString {
        raw_key(self.head(), &self.name)
    }

    pub fn is_split(&self) -> bool {
        self.members.len() > 1
    }
}

/// Outcome of scanning one directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Sorted by group name.
    pub groups: Vec<ArchiveGroup>,
    /// Regular files that are not archive members, sorted.
    pub others: Vec<OsString>,
}

/// Main volumes first, then continuation parts, each class in lexicographic order.
pub fn sort_members(members: &mut [OsString]) {
    members.sort_by_cached_key(|m| (!is_main_member(&m.to_string_lossy()), m.clone()));
}

/// Group the given filenames, all of which live in `dir`.
///
/// `dir` is only consulted to peek into `.exe` files.
pub fn group_entries<I, S>(dir: &Path, filenames: I) -> Result<Scan>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    // Keyed by the on-disk key so names that only differ in bytes that are
    // not UTF-8 stay apart
    let mut groups: BTreeMap<OsString, ArchiveGroup> = BTreeMap::new();
    let mut others = Vec::new();

    for filename in filenames {
        let filename: OsString = filename.into();
        let classification = match classify(&dir.join(&filename))? {
            Some(c) => c,
            None => {
                others.push(filename);
                continue;
            }
        };

        let key = raw_key(&filename, &classification.key);
        match groups.get_mut(&key) {
            Some(group) => {
                // RAR (and its SFX heads) wins any disagreement within a group
                if group.format != classification.format {
                    debug!(
                        "Format conflict in group '{}' ({} vs {}), using rar",
                        group.name, group.format, classification.format
                    );
                    group.format = ArchiveFormat::Rar;
                }
                group.members.push(filename);
            }
            None => {
                groups.insert(
                    key,
                    ArchiveGroup {
                        name: classification.key,
                        format: classification.format,
                        members: vec![filename],
                    },
                );
            }
        }
    }

    let groups: Vec<ArchiveGroup> = groups
        .into_values()
        .map(|mut group| {
            sort_members(&mut group.members);
            debug!(
                "Archive group '{}' ({}): {} volume(s), head {}",
                group.name,
                group.format,
                group.members.len(),
                group.head().to_string_lossy()
            );
            group
        })
        .collect();

    others.sort();

    Ok(Scan { groups, others })
}

/// Scan the regular files directly inside `dir` (no recursion).
pub fn scan_dir(dir: &Path) -> Result<Scan> {
    let mut filenames = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let entry = entry.at(dir)?;
        let path = entry.path();
        let metadata = fs::metadata(&path).at(&path)?;
        if metadata.is_file() {
            filenames.push(entry.file_name());
        }
    }
    group_entries(dir, filenames)
}

/// Find the group a single archive file belongs to, siblings included.
pub fn group_file(path: &Path) -> Result<ArchiveGroup> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let filename = path
        .file_name()
        .ok_or_else(|| ExtractError::NotAnArchive(path.to_path_buf()))?;

    scan_dir(dir)?
        .groups
        .into_iter()
        .find(|group| group.members.iter().any(|m| m == filename))
        .ok_or_else(|| ExtractError::NotAnArchive(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
    }

    #[test]
    fn test_sort_main_before_part() {
        let mut members = vec![OsString::from("foo.r00"), OsString::from("foo.rar")];
        sort_members(&mut members);
        assert_eq!(members, vec!["foo.rar", "foo.r00"]);

        let mut members: Vec<OsString> = ["foo.z02", "foo.zip", "foo.z01"]
            .iter()
            .map(OsString::from)
            .collect();
        sort_members(&mut members);
        assert_eq!(members, vec!["foo.zip", "foo.z01", "foo.z02"]);
    }

    #[test]
    fn test_numbered_split_group() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut names: Vec<String> = (1..=10).rev().map(|i| format!("foo.7z.{:03}", i)).collect();
        names.push("bar.zip".to_string());
        for name in &names {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let scan = scan_dir(dir.path())?;
        assert_eq!(scan.groups.len(), 2);
        assert!(scan.others.is_empty());

        assert_eq!(scan.groups[0].name, "bar");
        assert_eq!(scan.groups[0].format, ArchiveFormat::Zip);

        let foo = &scan.groups[1];
        assert_eq!(foo.format, ArchiveFormat::SevenZip);
        let expected: Vec<OsString> = (1..=10).map(|i| format!("foo.7z.{:03}", i).into()).collect();
        assert_eq!(foo.members, expected);
        assert_eq!(foo.head(), "foo.7z.001");
        Ok(())
    }

    #[test]
    fn test_rar_volume_conventions() -> Result<()> {
        let dir = tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "new.part2.rar",
                "new.part1.rar",
                "old.r01",
                "old.rar",
                "old.r00",
                "notes.txt",
            ],
        );

        let scan = scan_dir(dir.path())?;
        assert_eq!(scan.others, vec!["notes.txt"]);
        assert_eq!(scan.groups.len(), 2);
        assert_eq!(scan.groups[0].members, vec!["new.part1.rar", "new.part2.rar"]);
        assert_eq!(scan.groups[1].members, vec!["old.rar", "old.r00", "old.r01"]);
        assert!(scan.groups.iter().all(|g| g.format == ArchiveFormat::Rar));
        Ok(())
    }

    #[test]
    fn test_sfx_head_forces_rar() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pack.exe"), b"MZ....Rar!\x1a\x07\x00").unwrap();
        touch(dir.path(), &["pack.zip", "setup.exe"]);

        let scan = scan_dir(dir.path())?;
        assert_eq!(scan.groups.len(), 1);
        let pack = &scan.groups[0];
        assert_eq!(pack.format, ArchiveFormat::Rar);
        assert_eq!(pack.members, vec!["pack.exe", "pack.zip"]);
        assert_eq!(scan.others, vec!["setup.exe"]);
        Ok(())
    }

    #[test]
    fn test_lone_sfx_is_standalone_rar() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("solo.exe"), b"MZRar!").unwrap();

        let scan = scan_dir(dir.path())?;
        assert_eq!(
            scan.groups,
            vec![ArchiveGroup {
                name: "solo".to_string(),
                format: ArchiveFormat::Rar,
                members: vec!["solo.exe".into()],
            }]
        );
        assert!(!scan.groups[0].is_split());
        Ok(())
    }

    #[test]
    fn test_subdirectories_are_ignored() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested.zip")).unwrap();
        touch(dir.path(), &["a.zip"]);

        let scan = scan_dir(dir.path())?;
        assert_eq!(scan.groups.len(), 1);
        assert_eq!(scan.groups[0].name, "a");
        Ok(())
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = tempdir().unwrap();
        let result = scan_dir(&dir.path().join("nope"));
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }

    #[test]
    fn test_group_file_picks_up_siblings() -> Result<()> {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["set.zip", "set.z01", "other.7z", "plain.txt"]);

        let group = group_file(&dir.path().join("set.z01"))?;
        assert_eq!(group.name, "set");
        assert_eq!(group.members, vec!["set.zip", "set.z01"]);

        let err = group_file(&dir.path().join("plain.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::NotAnArchive(_)));
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_keep_their_bytes() -> Result<()> {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        // Shift_JIS "テスト" and "データ", both lossy to replacement characters
        let first = OsStr::from_bytes(b"\x83\x65\x83\x58\x83\x67.zip");
        let second = OsStr::from_bytes(b"\x83\x66\x81\x5b\x83\x5e.zip");
        std::fs::write(dir.path().join(first), b"x").unwrap();
        std::fs::write(dir.path().join(second), b"x").unwrap();

        let scan = scan_dir(dir.path())?;
        assert_eq!(scan.groups.len(), 2);
        let group = scan.groups.iter().find(|g| g.head() == first).unwrap();
        assert_eq!(group.stem().as_os_str(), OsStr::from_bytes(b"\x83\x65\x83\x58\x83\x67"));
        assert!(dir.path().join(group.head()).is_file());

        let found = group_file(&dir.path().join(second))?;
        assert_eq!(found.members, vec![second.to_os_string()]);
        Ok(())
    }
}
