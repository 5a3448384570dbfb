//! Extraction options.
//!
//! Built once by the caller (usually the CLI) and passed down read-only.

use std::path::PathBuf;

/// Marker 7-Zip prints when a password is rejected.
pub const DEFAULT_PASSWORD_MARKER: &str = "Wrong password?";

/// Options for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Charset label for legacy zip filenames. `None` means detect.
    pub zip_filename_encoding: Option<String>,

    /// Fail on ambiguous charset detection instead of taking the highest priority.
    pub strict_encoding_detection: bool,

    /// Candidate passwords, tried in order. Empty means "no password".
    pub passwords: Vec<String>,

    /// External decompressor used when a built-in decoder fails.
    pub external_binary: Option<PathBuf>,

    /// Always place output in a folder named after the archive.
    pub create_archive_name_folder: bool,

    /// Substring in the external tool's output that marks a rejected password.
    pub password_marker: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            zip_filename_encoding: None,
            strict_encoding_detection: false,
            passwords: Vec::new(),
            external_binary: None,
            create_archive_name_folder: false,
            password_marker: DEFAULT_PASSWORD_MARKER.to_string(),
        }
    }
}

impl ExtractOptions {
    /// Passwords to try, with the empty password standing in for an empty list.
    pub fn password_candidates(&self) -> Vec<&str> {
        if self.passwords.is_empty() {
            vec![""]
        } else {
            self.passwords.iter().map(String::as_str).collect()
        }
    }
}
