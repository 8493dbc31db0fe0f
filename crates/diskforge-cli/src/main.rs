//! diskforge CLI - assemble a bootable VM disk image from a kernel, an
//! application binary, a config document, and a files directory.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use diskforge_core::build::{build, BuildInputs, BuildPhase, OutputFormat};
use diskforge_core::pipeline::CompressionLevel;

/// Assembles a bootable VM disk image.
#[derive(Parser)]
#[command(name = "diskforge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the statically linked application binary (must start with ELF magic).
    app: PathBuf,

    /// Path to the JSON build configuration document.
    #[arg(short, long)]
    config: PathBuf,

    /// Directory that becomes the disk's ext2 data partition.
    #[arg(short, long)]
    files: PathBuf,

    /// Directory containing vboot.img / vkernel-PROD-<v>.img / vkernel-DEBUG-<v>.img / vtramp.img.
    #[arg(long)]
    kernel_dir: PathBuf,

    /// Kernel version token, e.g. "1.2.3" in vkernel-PROD-1.2.3.img.
    #[arg(long)]
    kernel_version: String,

    /// Use the debug kernel variant instead of production.
    #[arg(long)]
    debug: bool,

    /// Output file path.
    #[arg(short, long)]
    output: PathBuf,

    /// Output encoding.
    #[arg(long, value_enum, default_value_t = Format::RawSparse)]
    format: Format,

    /// Disk size in MiB. Must be even for `--format vhd`.
    #[arg(long, default_value_t = 256)]
    disk_size_mib: u64,

    /// Compression effort for stream-optimized VMDK.
    #[arg(long, value_enum, default_value_t = Compression::Balanced)]
    compression: Compression,

    /// Worker threads for stream-optimized grain compression (0 = auto).
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    RawSparse,
    Vmdk,
    StreamVmdk,
    Vhd,
}

#[derive(Clone, Copy, ValueEnum)]
enum Compression {
    Fast,
    Balanced,
    Max,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !cli.app.exists() {
        bail!("application binary not found: {}", cli.app.display());
    }
    if !cli.files.is_dir() {
        bail!("files directory not found: {}", cli.files.display());
    }

    let output_format = match cli.format {
        Format::RawSparse => OutputFormat::RawSparse,
        Format::Vmdk => OutputFormat::MonolithicSparseVmdk,
        Format::StreamVmdk => OutputFormat::StreamOptimizedVmdk,
        Format::Vhd => OutputFormat::DynamicVhd,
    };
    let compression = match cli.compression {
        Compression::Fast => CompressionLevel::Fast,
        Compression::Balanced => CompressionLevel::Balanced,
        Compression::Max => CompressionLevel::Max,
    };

    let inputs = BuildInputs {
        app_path: cli.app,
        config_path: cli.config,
        files_root: cli.files,
        kernel_dir: cli.kernel_dir,
        kernel_version: cli.kernel_version,
        debug: cli.debug,
        destination: cli.output,
        output_format,
        disk_size_mib: cli.disk_size_mib,
        compression,
        num_threads: cli.threads,
    };

    let progress = ProgressBar::new(5);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let cancel = AtomicBool::new(false);
    build(
        &inputs,
        &cancel,
        Some(Box::new(move |p| {
            progress.set_message(p.phase.to_string());
            if p.phase == BuildPhase::Complete {
                progress.finish_with_message("done");
            }
        })),
    )
    .context("build failed")?;

    Ok(())
}
