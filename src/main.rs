//! extractall - split-aware archive extraction

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use extractall::{extract, group_file, scan_dir, ArchiveGroup, ExtractOptions, ExtractReport};

/// Names tried on PATH when no binary is given.
const SEVEN_ZIP_NAMES: &[&str] = &["7zz", "7z", "7za"];

#[derive(Parser)]
#[command(name = "extractall")]
#[command(version)]
#[command(about = "Extract every archive in a directory, split volumes and SFX included")]
struct Cli {
    /// Directory to scan, or a single archive (its split siblings are picked up)
    source: PathBuf,

    /// Destination directory
    #[arg(short, long)]
    output: PathBuf,

    /// Candidate password, tried in order (repeatable)
    #[arg(short, long = "password", env = "EXTRACTALL_PASSWORDS", value_delimiter = ',')]
    passwords: Vec<String>,

    /// Charset of legacy zip filenames (e.g. shift_jis, gbk); detected when omitted
    #[arg(long, env = "EXTRACTALL_ZIP_ENCODING")]
    encoding: Option<String>,

    /// Fail instead of guessing when several charsets fit
    #[arg(long)]
    strict_encoding: bool,

    /// Always extract into a folder named after the archive
    #[arg(long)]
    archive_name_folder: bool,

    /// 7-Zip binary used when a built-in decoder fails
    #[arg(long = "7z", value_name = "PATH")]
    seven_zip: Option<PathBuf>,

    /// Never fall back to a 7-Zip binary
    #[arg(long, conflicts_with = "seven_zip")]
    no_7z: bool,

    /// Output text that marks a rejected password in the 7-Zip output
    #[arg(long, default_value = extractall::options::DEFAULT_PASSWORD_MARKER)]
    password_marker: String,

    /// Print the extraction reports as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long)]
    verbose: bool,
}

fn find_seven_zip(cli: &Cli) -> Option<PathBuf> {
    if cli.no_7z {
        return None;
    }
    if let Some(path) = &cli.seven_zip {
        return Some(path.clone());
    }
    let found = SEVEN_ZIP_NAMES.iter().find_map(|name| which::which(name).ok());
    match &found {
        Some(path) => debug!("Using {} as fallback extractor", path.display()),
        None => debug!("No 7-Zip binary on PATH, fallback disabled"),
    }
    found
}

/// Groups to extract plus the directory their members live in.
fn collect_groups(source: &Path) -> Result<(PathBuf, Vec<ArchiveGroup>)> {
    let metadata = std::fs::metadata(source)
        .with_context(|| format!("Cannot access {}", source.display()))?;

    if metadata.is_dir() {
        let scan = scan_dir(source)
            .with_context(|| format!("Failed to scan {}", source.display()))?;
        for other in &scan.others {
            debug!("Skipping non-archive {}", other.to_string_lossy());
        }
        return Ok((source.to_path_buf(), scan.groups));
    }

    let group = group_file(source)?;
    let dir = match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, vec![group]))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "extractall=debug".parse()?
            } else {
                "extractall=warn".parse()?
            }))
            .with_writer(std::io::stderr)
            .init();
    }

    let options = ExtractOptions {
        zip_filename_encoding: cli.encoding.clone(),
        strict_encoding_detection: cli.strict_encoding,
        passwords: cli.passwords.clone(),
        external_binary: find_seven_zip(&cli),
        create_archive_name_folder: cli.archive_name_folder,
        password_marker: cli.password_marker.clone(),
    };

    let (source_dir, groups) = collect_groups(&cli.source)?;
    if groups.is_empty() {
        bail!("No archives found in {}", cli.source.display());
    }

    let pb = ProgressBar::new(groups.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
            .progress_chars("=>-"),
    );
    if cli.json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut reports: Vec<ExtractReport> = Vec::new();
    let mut failed = 0usize;
    let mut collisions = 0usize;

    for group in &groups {
        pb.set_message(group.name.clone());
        match extract(&source_dir, &cli.output, group, &options) {
            Ok(report) => reports.push(report),
            Err(e) => {
                if e.is_collision() {
                    collisions += 1;
                } else {
                    failed += 1;
                }
                warn!("{}: {}", group.name, e);
                pb.suspend(|| eprintln!("FAILED {}: {}", group.name, e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let via = if report.external { " (7z)" } else { "" };
            let charset = report
                .encoding
                .as_deref()
                .map(|e| format!(" [{}]", e))
                .unwrap_or_default();
            println!(
                "{} -> {} ({} files){}{}",
                report.archive,
                report.destination.display(),
                report.files,
                charset,
                via
            );
        }
        println!(
            "\n{} extracted, {} failed, {} already present",
            reports.len(),
            failed,
            collisions
        );
    }

    if failed + collisions > 0 {
        std::process::exit(1);
    }
    Ok(())
}
