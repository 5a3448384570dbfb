//! Fallback to an external 7-Zip compatible binary.
//!
//! Invoked as `<binary> x -o<scratch> [-p<password>] <archive>`. The only
//! signal for a rejected password is a marker substring in the combined
//! output; any failure without the marker stops the retries, since further
//! passwords cannot fix a corrupt archive or a missing binary.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use super::scratch::ScratchDir;
use crate::error::{ExtractError, Result};

/// Exit status and combined stdout + stderr of one run.
#[derive(Debug, Clone)]
pub struct Capture {
    pub success: bool,
    pub output: String,
}

/// Runs a program to completion, capturing its output.
pub trait Launcher {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<Capture>;
}

/// Spawns real processes. Blocks until the child exits; there is no timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<Capture> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(Capture {
            success: output.status.success(),
            output: combined,
        })
    }
}

fn build_args(archive: &Path, output_dir: &Path, password: &str) -> Vec<OsString> {
    let mut out_flag = OsString::from("-o");
    out_flag.push(output_dir.as_os_str());

    let mut args = vec![OsString::from("x"), out_flag];
    if !password.is_empty() {
        args.push(OsString::from(format!("-p{}", password)));
    }
    args.push(archive.as_os_str().to_os_string());
    args
}

/// Extract `archive` into `scratch` with the external binary, trying each
/// password in order. The scratch directory is emptied before every attempt.
pub fn extract_with<L: Launcher>(
    launcher: &L,
    binary: &Path,
    archive: &Path,
    scratch: &ScratchDir,
    passwords: &[&str],
    marker: &str,
) -> Result<()> {
    let candidates: &[&str] = if passwords.is_empty() { &[""] } else { passwords };
    let mut last_output = String::new();

    for (attempt, password) in candidates.iter().enumerate() {
        scratch.reset()?;

        debug!(
            "Running {} on {} (attempt {}/{})",
            binary.display(),
            archive.display(),
            attempt + 1,
            candidates.len()
        );
        let capture = launcher
            .launch(binary, &build_args(archive, scratch.path(), password))
            .map_err(|e| ExtractError::ExternalToolFailure {
                binary: binary.to_path_buf(),
                archive: archive.to_path_buf(),
                output: e.to_string(),
            })?;

        if capture.success {
            info!("Extracted {} with {}", archive.display(), binary.display());
            return Ok(());
        }

        let rejected = !marker.is_empty() && capture.output.contains(marker);
        if !rejected {
            return Err(ExtractError::ExternalToolFailure {
                binary: binary.to_path_buf(),
                archive: archive.to_path_buf(),
                output: capture.output.trim().to_string(),
            });
        }

        debug!("Password {} rejected for {}", attempt + 1, archive.display());
        last_output = capture.output;
    }

    Err(ExtractError::DecryptionFailed {
        archive: archive.to_path_buf(),
        attempts: candidates.len(),
        last_error: last_output.trim().to_string(),
    })
}

/// [`extract_with`] using real processes.
pub fn extract(
    binary: &Path,
    archive: &Path,
    scratch: &ScratchDir,
    passwords: &[&str],
    marker: &str,
) -> Result<()> {
    extract_with(&SystemLauncher, binary, archive, scratch, passwords, marker)
}
