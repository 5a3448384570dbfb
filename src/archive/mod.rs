//! Archive identification.
//!
//! Recognizes which files in a directory belong to the same logical archive,
//! covering split volumes and RAR self-extracting executables.

pub mod classify;
pub mod group;
pub mod volume;

pub use classify::{classify, classify_name, ArchiveFormat, Classification};
pub use group::{group_entries, group_file, scan_dir, sort_members, ArchiveGroup, Scan};
pub use volume::VolumeReader;
