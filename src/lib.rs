//! extractall - split-aware archive extraction
//!
//! Groups split and self-extracting archives into logical units, works out
//! the filename charset of legacy zips, and extracts into a destination
//! without ever overwriting what is already there.

pub mod archive;
pub mod charset;
pub mod error;
pub mod extract;
pub mod options;
pub mod sanitize;

pub use archive::{group_file, scan_dir, ArchiveFormat, ArchiveGroup, Scan};
pub use error::{ExtractError, Result};
pub use extract::{extract, ExtractReport};
pub use options::ExtractOptions;
