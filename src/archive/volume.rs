//! Seekable reader over byte-split volumes (`name.7z.001`, `name.7z.002`, ...).
//!
//! Numbered splits are plain byte slices of one archive, so concatenating them
//! in order yields a stream the built-in 7z and zip decoders can open directly.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

struct Volume {
    path: PathBuf,
    /// Offset of the first byte of this volume in the joined stream.
    start: u64,
    length: u64,
}

/// Concatenation of several files, presented as one `Read + Seek` stream.
pub struct VolumeReader {
    volumes: Vec<Volume>,
    total: u64,
    position: u64,
    /// Index into `volumes` and the handle currently open on it.
    current: Option<(usize, File)>,
}

impl VolumeReader {
    /// Open the volumes in the given order. Missing files fail immediately.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let mut volumes = Vec::with_capacity(paths.len());
        let mut start = 0u64;
        for path in paths {
            let path = path.as_ref();
            let length = std::fs::metadata(path)?.len();
            volumes.push(Volume {
                path: path.to_path_buf(),
                start,
                length,
            });
            start += length;
        }

        Ok(Self {
            volumes,
            total: start,
            position: 0,
            current: None,
        })
    }

    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn volume_at(&self, position: u64) -> Option<usize> {
        self.volumes
            .iter()
            .position(|v| position >= v.start && position < v.start + v.length)
    }
}

impl Read for VolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.total {
            return Ok(0);
        }

        let index = match self.volume_at(self.position) {
            Some(index) => index,
            None => return Ok(0),
        };
        let volume = &self.volumes[index];
        let offset = self.position - volume.start;

        let remaining = (volume.length - offset).min(buf.len() as u64) as usize;

        let reopen = !matches!(&self.current, Some((open, _)) if *open == index);
        if reopen {
            self.current = Some((index, File::open(&volume.path)?));
        }
        let Some((_, file)) = self.current.as_mut() else {
            return Ok(0);
        };
        file.seek(SeekFrom::Start(offset))?;

        let n = file.read(&mut buf[..remaining])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for VolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.total.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.position = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of volume set",
            )),
        }
    }
}
