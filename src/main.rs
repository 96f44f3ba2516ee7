//! Command-line front end for the zipvfs virtual filesystem.
//!
//! Builds a [`Vfs`] from an optional TOML configuration plus `--mount`
//! arguments, runs one command against it, and syncs every touched archive
//! before exiting.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use zipvfs::cli::Command;
use zipvfs::{Cli, Config, Vfs, ZipArchive};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(cli.log_level())
        .with_target(false)
        .init();

    // zip-list works on a plain archive and needs no mounts
    if let Command::ZipList { archive, verbose } = &cli.command {
        list_archive(archive, *verbose)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::new(),
    };
    let mut vfs = Vfs::new(config);

    let pairs = cli.mount_pairs().map_err(anyhow::Error::msg)?;
    for (vpath, rpaths) in pairs {
        vfs.mount(vpath, rpaths)?;
    }

    let code = run(&mut vfs, &cli)?;

    if !vfs.sync() {
        bail!("some archives could not be written back");
    }
    Ok(code)
}

fn run(vfs: &mut Vfs, cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Ls { path } => {
            for name in vfs.find_files(path) {
                println!("{name}");
            }
        }
        Command::Cat { path } => {
            let data = vfs.read_file(path)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        Command::Put { path, source } => {
            let data = match source {
                Some(src) => std::fs::read(src)
                    .with_context(|| format!("failed to read {}", src.display()))?,
                None => {
                    let mut data = Vec::new();
                    io::stdin().read_to_end(&mut data).context("failed to read stdin")?;
                    data
                }
            };
            vfs.write_file(path, &data)?;
            tracing::info!(%path, bytes = data.len(), "stored");
        }
        Command::Rm { path } => vfs.delete_file(path)?,
        Command::Exists { path } => {
            if !vfs.exists(path) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Mounts => {
            for (vpath, templates) in vfs.mounts() {
                println!("{vpath} = {templates}");
            }
        }
        Command::SaveMounts { file } => {
            let Some(target) = file.as_deref().or(cli.config.as_deref()) else {
                bail!("no file given and no --config to save into");
            };
            vfs.save_mounts(target)?;
            println!("saved {} mount(s) to {}", vfs.mounts().len(), target.display());
        }
        Command::ZipList { archive, verbose } => list_archive(archive, *verbose)?,
    }
    Ok(ExitCode::SUCCESS)
}

/// List the entries stored in an archive.
///
/// Without `verbose` only names are printed; with it, a table of sizes,
/// compression ratio and DOS timestamps followed by a totals line.
fn list_archive(path: &Path, verbose: bool) -> Result<()> {
    if !path.is_file() {
        bail!("{}: no such archive", path.display());
    }
    let mut archive = ZipArchive::open(path);
    let entries = archive
        .entries()
        .with_context(|| format!("failed to read {}", path.display()))?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries.iter().filter(|e| !e.synthetic) {
        if !verbose {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files ({})",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count,
            format_size(total_uncompressed)
        );
    }

    Ok(())
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    let saved = if uncompressed > 0 {
        100 - (compressed.min(uncompressed) * 100 / uncompressed)
    } else {
        0
    };
    format!("{saved:>4}%")
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
