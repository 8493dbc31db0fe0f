//! Build Orchestrator (C0), grounded on `export_vm`/`ExportOptions`/
//! `ExportPhase`/`ExportProgress` in
//! `examples/morbidsteve-OVATool/crates/ovatool-core/src/export.rs`.
//!
//! Drives C2 (plan) -> C1 (ext2 synthesis, inside C5) -> C5 (raw assembly)
//! -> the selected output encoder, reporting progress at phase boundaries
//! and guaranteeing scratch/destination cleanup on error or cancellation.

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use tempfile::TempDir;

use crate::assemble::{self, BuildInputs as AssembleInputs};
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::pipeline::{CompressionLevel, Pipeline, PipelineConfig};
use crate::plan::Plan;
use crate::vhd::VhdWriter;
use crate::vmdk::{compress_grain, SparseVmdkWriter, StreamVmdkWriter, GRAIN_SIZE_SECTORS, SECTOR_SIZE};
use crate::write_instruction;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// The on-disk encoding a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    RawSparse,
    MonolithicSparseVmdk,
    StreamOptimizedVmdk,
    DynamicVhd,
}

/// Everything the orchestrator needs to run one build. Immutable for the
/// duration of the build, per `spec.md` §3.
pub struct BuildInputs {
    pub app_path: PathBuf,
    pub config_path: PathBuf,
    pub files_root: PathBuf,
    pub kernel_dir: PathBuf,
    pub kernel_version: String,
    pub debug: bool,
    pub destination: PathBuf,
    pub output_format: OutputFormat,
    /// Used only when the config document's `disk.disksize` is unset (zero).
    pub disk_size_mib: u64,
    pub compression: CompressionLevel,
    pub num_threads: usize,
}

/// Phase of the build process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Parsing,
    Planning,
    Assembling,
    Encoding,
    Complete,
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::Parsing => write!(f, "Parsing"),
            BuildPhase::Planning => write!(f, "Planning"),
            BuildPhase::Assembling => write!(f, "Assembling"),
            BuildPhase::Encoding => write!(f, "Encoding"),
            BuildPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress reported at phase boundaries, not per-sector.
#[derive(Debug, Clone)]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub bytes_processed: u64,
    pub bytes_total: u64,
}

impl BuildProgress {
    fn new(phase: BuildPhase, bytes_total: u64) -> Self {
        Self {
            phase,
            bytes_processed: 0,
            bytes_total,
        }
    }
}

pub type ProgressCallback = Box<dyn Fn(BuildProgress) + Send>;

fn kernel_file_name(version: &str, debug: bool) -> String {
    if debug {
        format!("vkernel-DEBUG-{version}.img")
    } else {
        format!("vkernel-PROD-{version}.img")
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::invalid_input("build cancelled"));
    }
    Ok(())
}

/// Opens `destination` per `newDisk()` in
/// `examples/original_source/compiler/vmdk/builder.go`: a pre-existing
/// directory is rejected, a pre-existing regular file is truncated and
/// reused, and a missing path is created.
fn open_destination(destination: &Path) -> Result<File> {
    if let Ok(metadata) = fs::metadata(destination) {
        if metadata.is_dir() {
            return Err(Error::destination_is_directory(destination));
        }
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
        .map_err(|e| Error::io(e, destination))
}

/// Runs a complete build. `cancel` is polled between phases (there is no
/// async runtime in this core, per `spec.md` §5); on cancellation or any
/// error, the scratch directory and any partially-written destination are
/// removed before returning.
pub fn build(
    inputs: &BuildInputs,
    cancel: &AtomicBool,
    progress_callback: Option<ProgressCallback>,
) -> Result<()> {
    let report = |progress: BuildProgress| {
        if let Some(ref callback) = progress_callback {
            callback(progress);
        }
    };

    match run(inputs, cancel, &report) {
        Ok(()) => Ok(()),
        Err(err) => {
            info!("build failed, removing partial destination: {err}");
            let _ = fs::remove_file(&inputs.destination);
            Err(err)
        }
    }
}

fn run(inputs: &BuildInputs, cancel: &AtomicBool, report: &dyn Fn(BuildProgress)) -> Result<()> {
    let scratch = TempDir::new().map_err(Error::io_simple)?;
    debug!("scratch directory: {}", scratch.path().display());

    // Phase 1: parsing.
    check_cancelled(cancel)?;
    report(BuildProgress::new(BuildPhase::Parsing, 0));

    let config_bytes = fs::read(&inputs.config_path).map_err(|e| Error::io(e, &inputs.config_path))?;
    let config = BuildConfig::parse(&config_bytes)?;

    let mut magic = [0u8; 4];
    File::open(&inputs.app_path)
        .map_err(|e| Error::io(e, &inputs.app_path))?
        .read_exact(&mut magic)
        .map_err(|e| Error::io(e, &inputs.app_path))?;
    if magic != ELF_MAGIC {
        return Err(Error::invalid_input(format!(
            "'{}' is not an ELF binary",
            inputs.app_path.display()
        )));
    }

    let bootloader_path = inputs.kernel_dir.join("vboot.img");
    let kernel_path = inputs.kernel_dir.join(kernel_file_name(&inputs.kernel_version, inputs.debug));
    let trampoline_path = inputs.kernel_dir.join("vtramp.img");
    for path in [&bootloader_path, &kernel_path, &trampoline_path] {
        if !path.exists() {
            return Err(Error::kernel_missing(path.clone()));
        }
    }

    // Phase 2: planning (C2).
    check_cancelled(cancel)?;
    report(BuildProgress::new(BuildPhase::Planning, 0));

    let kernel_len = fs::metadata(&kernel_path).map_err(|e| Error::io(e, &kernel_path))?.len();
    let trampoline_len = fs::metadata(&trampoline_path)
        .map_err(|e| Error::io(e, &trampoline_path))?
        .len();
    let app_len = fs::metadata(&inputs.app_path)
        .map_err(|e| Error::io(e, &inputs.app_path))?
        .len();

    // The config document's `disk.disksize` takes precedence; the CLI flag
    // is only a default for configs that leave it unset (zero).
    let disk_size_mib = if config.disk.disk_size_mib != 0 {
        config.disk.disk_size_mib
    } else {
        inputs.disk_size_mib
    };
    let plan = Plan::compute(disk_size_mib, kernel_len, trampoline_len, app_len)?;

    if inputs.output_format == OutputFormat::DynamicVhd && disk_size_mib % 2 != 0 {
        return Err(Error::unsupported_disk_size(disk_size_mib));
    }

    // Phase 3: raw assembly (C1 + C5).
    check_cancelled(cancel)?;
    let total_bytes = plan.total_lbas * SECTOR_SIZE;
    report(BuildProgress::new(BuildPhase::Assembling, total_bytes));

    let build_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let assemble_inputs = AssembleInputs {
        bootloader_path: &bootloader_path,
        kernel_path: &kernel_path,
        trampoline_path: &trampoline_path,
        app_path: &inputs.app_path,
        files_root: &inputs.files_root,
    };
    let instructions = assemble::assemble(&plan, &config, &assemble_inputs, build_time)?;

    let raw_path = scratch.path().join("raw.img");
    let mut raw_file = File::create(&raw_path).map_err(|e| Error::io(e, &raw_path))?;
    raw_file.set_len(total_bytes).map_err(|e| Error::io(e, &raw_path))?;
    write_instruction::apply(&mut raw_file, &instructions)?;
    drop(raw_file);

    // Phase 4: encoding (C6/C7/C8, or a straight copy for raw sparse).
    check_cancelled(cancel)?;
    report(BuildProgress::new(BuildPhase::Encoding, total_bytes));

    let mut raw_file = File::open(&raw_path).map_err(|e| Error::io(e, &raw_path))?;
    let destination = open_destination(&inputs.destination)?;

    match inputs.output_format {
        OutputFormat::RawSparse => {
            let mut dest = destination;
            std::io::copy(&mut raw_file, &mut dest).map_err(Error::io_simple)?;
        }
        OutputFormat::MonolithicSparseVmdk => {
            encode_monolithic_sparse(&mut raw_file, destination, &plan, &config.name)?;
        }
        OutputFormat::StreamOptimizedVmdk => {
            encode_stream_optimized(&mut raw_file, destination, &plan, &config.name, inputs)?;
        }
        OutputFormat::DynamicVhd => {
            encode_dynamic_vhd(&mut raw_file, destination, disk_size_mib, build_time)?;
        }
    }

    report(BuildProgress::new(BuildPhase::Complete, total_bytes));
    Ok(())
}

fn read_exact_or_zero(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..]).map_err(Error::io_simple)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    for byte in &mut buf[total..] {
        *byte = 0;
    }
    Ok(total)
}

fn encode_monolithic_sparse(raw: &mut File, destination: File, plan: &Plan, name: &str) -> Result<()> {
    let disk_size_mib = plan.total_lbas * SECTOR_SIZE / (1024 * 1024);
    let mut writer = SparseVmdkWriter::new(destination, disk_size_mib, name, 0xFFFF_FFFE)?;
    let grain_bytes = writer.grain_size_bytes() as usize;
    let mut buf = vec![0u8; grain_bytes];
    for _ in 0..writer.total_grains() {
        read_exact_or_zero(raw, &mut buf)?;
        writer.write_grain(&buf)?;
    }
    writer.finish()?;
    Ok(())
}

fn encode_stream_optimized(
    raw: &mut File,
    destination: File,
    plan: &Plan,
    name: &str,
    inputs: &BuildInputs,
) -> Result<()> {
    let disk_size_mib = plan.total_lbas * SECTOR_SIZE / (1024 * 1024);
    let grain_size_bytes = GRAIN_SIZE_SECTORS * SECTOR_SIZE;
    let disk_size_bytes = disk_size_mib * 1024 * 1024;
    let total_grains = (disk_size_bytes + grain_size_bytes - 1) / grain_size_bytes;

    let mut grains = Vec::with_capacity(total_grains as usize);
    for _ in 0..total_grains {
        let mut buf = vec![0u8; grain_size_bytes as usize];
        read_exact_or_zero(raw, &mut buf)?;
        grains.push(buf);
    }

    let pipeline = Pipeline::new(PipelineConfig::new(
        grain_size_bytes as usize,
        inputs.compression,
        inputs.num_threads,
    ));
    let level = pipeline.compression_level();

    let nonzero: Vec<(u64, Vec<u8>)> = grains
        .into_iter()
        .enumerate()
        .filter(|(_, g)| g.iter().any(|&b| b != 0))
        .map(|(i, g)| (i as u64 * GRAIN_SIZE_SECTORS, g))
        .collect();

    let compressed = pipeline.process(nonzero, |_idx, (lba, grain): &(u64, Vec<u8>)| {
        let data = compress_grain(grain, level)?;
        Ok((*lba, data))
    })?;

    let mut writer = StreamVmdkWriter::new(destination, disk_size_mib, name, 0xFFFF_FFFD)?;
    for (lba, data) in compressed {
        writer.write_grain(lba, &data)?;
    }
    writer.finish()?;
    Ok(())
}

fn encode_dynamic_vhd(raw: &mut File, destination: File, disk_size_mib: u64, build_time: u32) -> Result<()> {
    let mut writer = VhdWriter::new(destination, disk_size_mib, build_time)?;
    let block_size = crate::vhd::BLOCK_SIZE as usize;
    let total_blocks = writer.max_table_entries();
    let mut buf = vec![0u8; block_size];
    for index in 0..total_blocks {
        let read = read_exact_or_zero(raw, &mut buf)?;
        if read == 0 {
            break;
        }
        if buf.iter().any(|&b| b != 0) {
            writer.write_block(index, &buf)?;
        }
    }
    writer.finish(build_time)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_sample_inputs(dir: &Path) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
        let kernel_dir = dir.join("kernels");
        fs::create_dir(&kernel_dir).unwrap();
        fs::write(kernel_dir.join("vboot.img"), vec![0u8; 446]).unwrap();
        fs::write(kernel_dir.join("vkernel-PROD-1.img"), vec![0u8; 4096]).unwrap();
        fs::write(kernel_dir.join("vtramp.img"), vec![0u8; 512]).unwrap();

        let app_path = dir.join("app.bin");
        let mut app_bytes = ELF_MAGIC.to_vec();
        app_bytes.extend_from_slice(&[0u8; 4092]);
        fs::write(&app_path, &app_bytes).unwrap();

        let config_path = dir.join("config.json");
        fs::write(&config_path, br#"{"name":"demo"}"#).unwrap();

        let files_root = dir.join("files");
        fs::create_dir(&files_root).unwrap();
        fs::write(files_root.join("hello.txt"), b"hi").unwrap();

        (kernel_dir, app_path, config_path, files_root)
    }

    #[test]
    fn builds_raw_sparse_image() {
        let dir = tempdir().unwrap();
        let (kernel_dir, app_path, config_path, files_root) = write_sample_inputs(dir.path());
        let destination = dir.path().join("out.img");

        let inputs = BuildInputs {
            app_path,
            config_path,
            files_root,
            kernel_dir,
            kernel_version: "1".to_string(),
            debug: false,
            destination: destination.clone(),
            output_format: OutputFormat::RawSparse,
            disk_size_mib: 64,
            compression: CompressionLevel::Fast,
            num_threads: 0,
        };

        let cancel = AtomicBool::new(false);
        build(&inputs, &cancel, None).unwrap();

        let metadata = fs::metadata(&destination).unwrap();
        assert_eq!(metadata.len(), inputs.disk_size_mib * 1024 * 1024);
    }

    #[test]
    fn config_disk_size_overrides_cli_default() {
        let dir = tempdir().unwrap();
        let (kernel_dir, app_path, config_path, files_root) = write_sample_inputs(dir.path());
        fs::write(&config_path, br#"{"name":"demo","disk":{"disksize":96}}"#).unwrap();
        let destination = dir.path().join("out.img");

        let inputs = BuildInputs {
            app_path,
            config_path,
            files_root,
            kernel_dir,
            kernel_version: "1".to_string(),
            debug: false,
            destination: destination.clone(),
            output_format: OutputFormat::RawSparse,
            disk_size_mib: 64,
            compression: CompressionLevel::Fast,
            num_threads: 0,
        };

        let cancel = AtomicBool::new(false);
        build(&inputs, &cancel, None).unwrap();

        let metadata = fs::metadata(&destination).unwrap();
        assert_eq!(metadata.len(), 96 * 1024 * 1024);
    }

    #[test]
    fn rejects_directory_destination() {
        let dir = tempdir().unwrap();
        let (kernel_dir, app_path, config_path, files_root) = write_sample_inputs(dir.path());
        let destination = dir.path().join("out_dir");
        fs::create_dir(&destination).unwrap();

        let inputs = BuildInputs {
            app_path,
            config_path,
            files_root,
            kernel_dir,
            kernel_version: "1".to_string(),
            debug: false,
            destination,
            output_format: OutputFormat::RawSparse,
            disk_size_mib: 64,
            compression: CompressionLevel::Fast,
            num_threads: 0,
        };

        let cancel = AtomicBool::new(false);
        let result = build(&inputs, &cancel, None);
        assert!(matches!(result, Err(Error::DestinationIsDirectory { .. })));
    }

    #[test]
    fn missing_kernel_is_reported() {
        let dir = tempdir().unwrap();
        let (kernel_dir, app_path, config_path, files_root) = write_sample_inputs(dir.path());
        let destination = dir.path().join("out.img");

        let inputs = BuildInputs {
            app_path,
            config_path,
            files_root,
            kernel_dir,
            kernel_version: "99".to_string(),
            debug: false,
            destination,
            output_format: OutputFormat::RawSparse,
            disk_size_mib: 64,
            compression: CompressionLevel::Fast,
            num_threads: 0,
        };

        let cancel = AtomicBool::new(false);
        let result = build(&inputs, &cancel, None);
        assert!(matches!(result, Err(Error::KernelMissing { .. })));
    }
}
