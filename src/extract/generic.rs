//! Built-in decoders for everything except zip.
//!
//! 7z and RAR are tried once per candidate password; a rejected password moves
//! on to the next candidate, anything else is a decode failure the engine may
//! hand to the external binary.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use unrar::error::Code as RarCode;
use xz2::read::XzDecoder;

use super::scratch::ScratchDir;
use super::{try_passwords, Attempt};
use crate::archive::{ArchiveFormat, ArchiveGroup, VolumeReader};
use crate::error::{ExtractError, IoContext, Result};
use crate::options::ExtractOptions;
use crate::sanitize::{clean_dir_path, clean_file_path};

fn decode_error(archive: &Path, reason: impl ToString) -> ExtractError {
    ExtractError::Decode {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Whether the group is a byte-split set (`name.7z.001`, `name.zip.001`, ...).
pub fn is_numbered_split(group: &ArchiveGroup) -> bool {
    group.is_split()
        && group
            .head()
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with(".001")
}

/// A seekable view of the whole archive: the head file, or every numbered
/// volume concatenated in order.
pub fn open_volumes(source_dir: &Path, group: &ArchiveGroup) -> Result<Box<dyn ReadSeek>> {
    let head = source_dir.join(group.head());
    if is_numbered_split(group) {
        let paths: Vec<PathBuf> = group.members.iter().map(|m| source_dir.join(m)).collect();
        let reader = VolumeReader::open(&paths).at(&head)?;
        debug!(
            "Reading {} as {} concatenated volume(s), {} bytes",
            group.name,
            paths.len(),
            reader.len()
        );
        Ok(Box::new(reader))
    } else {
        Ok(Box::new(File::open(&head).at(&head)?))
    }
}

pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Extract a non-zip group into `scratch` with the built-in decoders.
pub fn extract(
    source_dir: &Path,
    group: &ArchiveGroup,
    scratch: &ScratchDir,
    options: &ExtractOptions,
) -> Result<()> {
    let head = source_dir.join(group.head());
    match group.format {
        ArchiveFormat::SevenZip => extract_7z(source_dir, group, &head, scratch, options),
        ArchiveFormat::Rar => extract_rar(&head, scratch, options),
        ArchiveFormat::Tar => {
            let file = File::open(&head).at(&head)?;
            unpack_tar(file, &head, scratch.path())
        }
        ArchiveFormat::Gzip | ArchiveFormat::Xz | ArchiveFormat::Lz4 => {
            let file = File::open(&head).at(&head)?;
            let stream: Box<dyn Read> = match group.format {
                ArchiveFormat::Gzip => Box::new(GzDecoder::new(file)),
                ArchiveFormat::Xz => Box::new(XzDecoder::new(file)),
                _ => Box::new(lz4_flex::frame::FrameDecoder::new(file)),
            };
            decompress_stream(stream, group, &head, scratch.path())
        }
        ArchiveFormat::Zip => Err(decode_error(&head, "zip archives take the zip path")),
    }
}

fn unpack_tar<R: Read>(reader: R, archive: &Path, root: &Path) -> Result<()> {
    tar::Archive::new(reader)
        .unpack(root)
        .map_err(|e| decode_error(archive, e))
}

/// Single-stream compressors: a `.tar` inside is unpacked, anything else is
/// written out under the archive name minus the compression extension.
fn decompress_stream(
    mut stream: Box<dyn Read>,
    group: &ArchiveGroup,
    archive: &Path,
    root: &Path,
) -> Result<()> {
    if group.name.to_ascii_lowercase().ends_with(".tar") {
        return unpack_tar(stream, archive, root);
    }

    // A stem that is not UTF-8 came from a real filename, so it holds no separators
    let stem = group.stem();
    let name = match stem.to_str() {
        Some(name) => clean_file_path(name),
        None => Some(PathBuf::from(stem)),
    }
    .ok_or_else(|| decode_error(archive, "no usable output name"))?;
    let out = root.join(name);
    let mut file = File::create(&out).at(&out)?;
    io::copy(&mut stream, &mut file).map_err(|e| decode_error(archive, e))?;
    Ok(())
}

fn is_7z_password_error(error: &sevenz_rust2::Error) -> bool {
    matches!(
        error,
        sevenz_rust2::Error::PasswordRequired | sevenz_rust2::Error::MaybeBadPassword(_)
    )
}

fn extract_7z(
    source_dir: &Path,
    group: &ArchiveGroup,
    head: &Path,
    scratch: &ScratchDir,
    options: &ExtractOptions,
) -> Result<()> {
    try_passwords(head, scratch, &options.password_candidates(), |password| {
        let reader = open_volumes(source_dir, group)?;
        let root = scratch.path();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut failure: Option<ExtractError> = None;

        let result = sevenz_rust2::decompress_with_extract_fn_and_password(
            reader,
            root,
            sevenz_rust2::Password::from(password),
            |entry, data, _dest| {
                let cleaned = if entry.is_directory {
                    clean_dir_path(&entry.name)
                } else {
                    clean_file_path(&entry.name)
                };
                let Some(target) = cleaned else {
                    return Ok(true);
                };
                if !entry.is_directory && !seen.insert(target.clone()) {
                    failure = Some(ExtractError::DuplicateEntryName {
                        archive: head.to_path_buf(),
                        path: target,
                    });
                    return Ok(false);
                }
                let out = root.join(&target);
                if let Some(parent) = out.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        failure = Some(ExtractError::io(parent, e));
                        return Ok(false);
                    }
                }
                sevenz_rust2::default_entry_extract_fn(entry, data, &out)
            },
        );

        if let Some(e) = failure {
            return Err(Attempt::Failed(e));
        }
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_7z_password_error(&e) => Err(Attempt::Rejected(e.to_string())),
            Err(e) => Err(Attempt::Failed(decode_error(head, e))),
        }
    })
}

fn is_rar_password_error(code: &RarCode, encrypted: bool) -> bool {
    match code {
        RarCode::MissingPassword | RarCode::BadPassword => true,
        // RAR4 reports a wrong password on file data as a checksum failure
        RarCode::BadData => encrypted,
        _ => false,
    }
}

/// One pass over a RAR archive. Volumes and SFX heads are handled by unrar
/// itself from the head file.
fn rar_pass(head: &Path, root: &Path, password: &str) -> std::result::Result<(), Attempt> {
    let archive = if password.is_empty() {
        unrar::Archive::new(head)
    } else {
        unrar::Archive::with_password(head, password.as_bytes())
    };

    let rejected_or_failed = |e: unrar::error::UnrarError, encrypted: bool| {
        if is_rar_password_error(&e.code, encrypted) {
            Attempt::Rejected(e.to_string())
        } else {
            Attempt::Failed(decode_error(head, e))
        }
    };

    // Nothing is known to be encrypted yet, so bad data here is corruption
    let mut cursor = archive
        .open_for_processing()
        .map_err(|e| rejected_or_failed(e, false))?;
    let headers_encrypted = cursor.has_encrypted_headers();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    loop {
        let entry = match cursor.read_header() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(rejected_or_failed(e, headers_encrypted)),
        };

        let header = entry.entry();
        let name = header.filename.to_string_lossy().into_owned();
        let encrypted = header.is_encrypted();

        if header.is_directory() {
            if let Some(dir) = clean_dir_path(&name) {
                let out = root.join(dir);
                fs::create_dir_all(&out).at(&out)?;
            }
            cursor = entry.skip().map_err(|e| rejected_or_failed(e, encrypted))?;
            continue;
        }

        let Some(target) = clean_file_path(&name) else {
            cursor = entry.skip().map_err(|e| rejected_or_failed(e, encrypted))?;
            continue;
        };
        if !seen.insert(target.clone()) {
            return Err(Attempt::Failed(ExtractError::DuplicateEntryName {
                archive: head.to_path_buf(),
                path: target,
            }));
        }

        let out = root.join(&target);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        cursor = entry
            .extract_to(&out)
            .map_err(|e| rejected_or_failed(e, encrypted))?;
    }

    Ok(())
}

fn extract_rar(head: &Path, scratch: &ScratchDir, options: &ExtractOptions) -> Result<()> {
    try_passwords(head, scratch, &options.password_candidates(), |password| {
        rar_pass(head, scratch.path(), password)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn group(name: &str, format: ArchiveFormat, members: &[&str]) -> ArchiveGroup {
        ArchiveGroup {
            name: name.to_string(),
            format,
            members: members.iter().map(std::ffi::OsString::from).collect(),
        }
    }

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_tar_gz_unpacks_tarball() -> Result<()> {
        let dir = tempdir().unwrap();
        let tar = tar_bytes(&[("pkg/a.txt", b"alpha"), ("pkg/b.txt", b"beta")]);
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&tar).unwrap();
        fs::write(dir.path().join("pkg.tar.gz"), gz.finish().unwrap()).unwrap();

        let scratch = ScratchDir::create_in(dir.path())?;
        let g = group("pkg.tar", ArchiveFormat::Gzip, &["pkg.tar.gz"]);
        extract(dir.path(), &g, &scratch, &ExtractOptions::default())?;

        assert_eq!(fs::read(scratch.path().join("pkg/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(scratch.path().join("pkg/b.txt")).unwrap(), b"beta");
        Ok(())
    }

    #[test]
    fn test_xz_single_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
        xz.write_all(b"log line").unwrap();
        fs::write(dir.path().join("server.log.xz"), xz.finish().unwrap()).unwrap();

        let scratch = ScratchDir::create_in(dir.path())?;
        let g = group("server.log", ArchiveFormat::Xz, &["server.log.xz"]);
        extract(dir.path(), &g, &scratch, &ExtractOptions::default())?;

        assert_eq!(fs::read(scratch.path().join("server.log")).unwrap(), b"log line");
        Ok(())
    }

    #[test]
    fn test_lz4_single_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut lz4 = lz4_flex::frame::FrameEncoder::new(Vec::new());
        lz4.write_all(b"frame payload").unwrap();
        fs::write(dir.path().join("dump.bin.lz4"), lz4.finish().unwrap()).unwrap();

        let scratch = ScratchDir::create_in(dir.path())?;
        let g = group("dump.bin", ArchiveFormat::Lz4, &["dump.bin.lz4"]);
        extract(dir.path(), &g, &scratch, &ExtractOptions::default())?;

        assert_eq!(fs::read(scratch.path().join("dump.bin")).unwrap(), b"frame payload");
        Ok(())
    }

    #[test]
    fn test_plain_tar() -> Result<()> {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.tar"), tar_bytes(&[("x.txt", b"x")])).unwrap();

        let scratch = ScratchDir::create_in(dir.path())?;
        let g = group("a", ArchiveFormat::Tar, &["a.tar"]);
        extract(dir.path(), &g, &scratch, &ExtractOptions::default())?;
        assert!(scratch.path().join("x.txt").exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_gzip_is_decode_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.txt.gz"), b"definitely not gzip").unwrap();

        let scratch = ScratchDir::create_in(dir.path()).unwrap();
        let g = group("bad.txt", ArchiveFormat::Gzip, &["bad.txt.gz"]);
        let err = extract(dir.path(), &g, &scratch, &ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Decode { .. }));
    }

    #[test]
    fn test_7z_split_volumes() -> Result<()> {
        let dir = tempdir().unwrap();
        let content = dir.path().join("content");
        fs::create_dir(&content).unwrap();
        fs::write(content.join("notes.txt"), b"split me").unwrap();
        let whole = dir.path().join("whole.7z");
        sevenz_rust2::compress_to_path(&content, &whole).unwrap();

        let bytes = fs::read(&whole).unwrap();
        let mid = bytes.len() / 2;
        fs::write(dir.path().join("set.7z.001"), &bytes[..mid]).unwrap();
        fs::write(dir.path().join("set.7z.002"), &bytes[mid..]).unwrap();

        let g = group("set", ArchiveFormat::SevenZip, &["set.7z.001", "set.7z.002"]);
        assert!(is_numbered_split(&g));

        let scratch = ScratchDir::create_in(dir.path())?;
        extract(dir.path(), &g, &scratch, &ExtractOptions::default())?;
        assert_eq!(fs::read(scratch.path().join("notes.txt")).unwrap(), b"split me");
        Ok(())
    }

    #[test]
    fn test_missing_rar_is_not_a_password_problem() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("junk.rar"), b"not a rar").unwrap();

        let scratch = ScratchDir::create_in(dir.path()).unwrap();
        let g = group("junk", ArchiveFormat::Rar, &["junk.rar"]);
        let options = ExtractOptions {
            passwords: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let err = extract(dir.path(), &g, &scratch, &options).unwrap_err();
        assert!(matches!(err, ExtractError::Decode { .. }));
    }

    #[test]
    fn test_corrupt_rar_header_is_not_retried() {
        let dir = tempdir().unwrap();
        // RAR4 marker followed by a main header with a broken checksum
        let mut bytes = b"Rar!\x1a\x07\x00".to_vec();
        bytes.extend_from_slice(&[0xde, 0xad, 0x73, 0x00, 0x00, 0x0d, 0x00, 0, 0, 0, 0, 0, 0]);
        bytes.extend(std::iter::repeat(0x5a).take(256));
        fs::write(dir.path().join("broken.rar"), &bytes).unwrap();

        let scratch = ScratchDir::create_in(dir.path()).unwrap();
        let g = group("broken", ArchiveFormat::Rar, &["broken.rar"]);
        let options = ExtractOptions {
            passwords: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let result = extract(dir.path(), &g, &scratch, &options);
        assert!(
            !matches!(result, Err(ExtractError::DecryptionFailed { .. })),
            "corrupt headers were blamed on the password"
        );
    }

    #[test]
    fn test_rar_password_codes() {
        assert!(is_rar_password_error(&RarCode::BadPassword, false));
        assert!(is_rar_password_error(&RarCode::MissingPassword, false));
        assert!(is_rar_password_error(&RarCode::BadData, true));
        assert!(!is_rar_password_error(&RarCode::BadData, false));
        assert!(!is_rar_password_error(&RarCode::BadArchive, true));
    }
}
