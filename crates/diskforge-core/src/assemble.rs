//! Raw Assembler (C5, spec §4.5), grounded on `diskContents`/
//! `writeReservedLBAs` in `examples/original_source/compiler/vmdk/contents.go`
//! and `builder.go`.
//!
//! Produces the full [`WriteInstruction`] stream for a raw disk image: the
//! 446-byte bootloader and primary/backup GPT (C3), the config header (C4),
//! the kernel/trampoline/app payloads at their planned offsets, and the
//! ext2 filesystem (C1). Nothing here touches a file descriptor directly; the
//! caller applies the returned instructions with
//! [`crate::write_instruction::apply`] against whatever sink it likes (a
//! sized temp file for the raw encoder, or the grain-aware encoders for
//! C6-C8).

use std::path::Path;

use crate::config::BuildConfig;
use crate::config_header;
use crate::error::{Error, Result};
use crate::ext2;
use crate::gpt;
use crate::plan::Plan;
use crate::write_instruction::{sort_and_validate, WriteInstruction};

/// On-host paths for the payloads that land in fixed-size regions ahead of
/// the files region.
pub struct BuildInputs<'a> {
    pub bootloader_path: &'a Path,
    pub kernel_path: &'a Path,
    pub trampoline_path: &'a Path,
    pub app_path: &'a Path,
    pub files_root: &'a Path,
}

/// Bytes of protective-MBR boot code, per `spec.md` §4.3.
const BOOTLOADER_SIZE: u64 = 446;

fn region_file_instruction(region_offset_sectors: u64, path: &Path) -> Result<WriteInstruction> {
    let len = std::fs::metadata(path)
        .map_err(|e| Error::io(e, path))?
        .len();
    Ok(WriteInstruction::file_slice(
        region_offset_sectors * gpt::SECTOR_SIZE,
        len,
        path,
        0,
    ))
}

/// Assembles the complete instruction stream for `plan`, at the byte
/// offsets `plan`'s regions describe. `build_time` is the ext2 filesystem's
/// embedded creation timestamp (Unix seconds).
pub fn assemble(
    plan: &Plan,
    config: &BuildConfig,
    inputs: &BuildInputs,
    build_time: u32,
) -> Result<Vec<WriteInstruction>> {
    let mut instructions = Vec::new();

    let bootloader_len = std::fs::metadata(inputs.bootloader_path)
        .map_err(|e| Error::io(e, inputs.bootloader_path))?
        .len();
    if bootloader_len > BOOTLOADER_SIZE {
        return Err(Error::invalid_input(format!(
            "bootloader image '{}' is {} bytes, exceeds the {}-byte protective-MBR boot code region",
            inputs.bootloader_path.display(),
            bootloader_len,
            BOOTLOADER_SIZE
        )));
    }
    instructions.push(WriteInstruction::file_slice(
        0,
        bootloader_len,
        inputs.bootloader_path,
        0,
    ));

    instructions.extend(write_reserved_lbas(plan));

    let header = config_header::encode(config, plan)?;
    instructions.push(WriteInstruction::buffer(
        plan.config.first_lba * gpt::SECTOR_SIZE,
        header,
    ));

    if inputs.kernel_path.metadata().is_err() {
        return Err(Error::kernel_missing(inputs.kernel_path));
    }
    instructions.push(region_file_instruction(plan.kernel.first_lba, inputs.kernel_path)?);
    instructions.push(region_file_instruction(
        plan.trampoline.first_lba,
        inputs.trampoline_path,
    )?);
    instructions.push(region_file_instruction(plan.app.first_lba, inputs.app_path)?);

    let files_base = plan.files.first_lba * gpt::SECTOR_SIZE;
    let files_budget_blocks = plan.files.length_sectors * gpt::SECTOR_SIZE / ext2::layout::BLOCK_SIZE;
    let fs_instructions = ext2::synthesize(inputs.files_root, files_budget_blocks, build_time)?;
    instructions.extend(fs_instructions.into_iter().map(|i| WriteInstruction {
        offset: files_base + i.offset,
        length: i.length,
        source: i.source,
    }));

    sort_and_validate(instructions)
}

/// The protective MBR plus primary and backup GPT, covering `plan`'s
/// `reserved` and `backup` regions. The backup partition array and header
/// always land in the last 34 sectors regardless of what encoder (C6/C7/C8)
/// eventually carries these instructions, so a sparse or stream-optimized
/// encoder that otherwise drops trailing zero grains must still materialize
/// this one.
fn write_reserved_lbas(plan: &Plan) -> Vec<WriteInstruction> {
    let layout = gpt::build(plan);
    let sector = gpt::SECTOR_SIZE;

    vec![
        WriteInstruction::buffer(446, layout.mbr_partition_entry),
        WriteInstruction::buffer(510, layout.mbr_signature),
        WriteInstruction::buffer(plan.reserved.first_lba * sector + sector, layout.primary_header),
        WriteInstruction::buffer(2 * sector, layout.primary_partition_array),
        WriteInstruction::buffer((plan.backup.first_lba + 1) * sector, layout.backup_partition_array),
        WriteInstruction::buffer(plan.backup.last_lba * sector, layout.backup_header),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_plan() -> Plan {
        Plan::compute(64, 4096, 512, 4096).unwrap()
    }

    #[test]
    fn assembles_without_overlap() {
        let dir = tempdir().unwrap();
        let boot = dir.path().join("boot.img");
        let kernel = dir.path().join("kernel.img");
        let tramp = dir.path().join("tramp.img");
        let app = dir.path().join("app.img");
        let files = dir.path().join("files");
        fs::write(&boot, vec![0u8; 446]).unwrap();
        fs::write(&kernel, vec![0u8; 4096]).unwrap();
        fs::write(&tramp, vec![0u8; 512]).unwrap();
        fs::write(&app, vec![0u8; 4096]).unwrap();
        fs::create_dir(&files).unwrap();
        fs::write(files.join("hello.txt"), b"hi").unwrap();

        let plan = sample_plan();
        let config = BuildConfig::parse(br#"{"name":"demo"}"#).unwrap();
        let inputs = BuildInputs {
            bootloader_path: &boot,
            kernel_path: &kernel,
            trampoline_path: &tramp,
            app_path: &app,
            files_root: &files,
        };

        let instructions = assemble(&plan, &config, &inputs, 1_700_000_000).unwrap();
        assert!(!instructions.is_empty());
        let max_end = instructions.iter().map(|i| i.end()).max().unwrap();
        assert!(max_end <= plan.total_lbas * gpt::SECTOR_SIZE);
    }

    #[test]
    fn missing_kernel_is_reported() {
        let dir = tempdir().unwrap();
        let boot = dir.path().join("boot.img");
        let tramp = dir.path().join("tramp.img");
        let app = dir.path().join("app.img");
        let files = dir.path().join("files");
        fs::write(&boot, vec![0u8; 446]).unwrap();
        fs::write(&tramp, vec![0u8; 512]).unwrap();
        fs::write(&app, vec![0u8; 4096]).unwrap();
        fs::create_dir(&files).unwrap();

        let plan = sample_plan();
        let config = BuildConfig::parse(br#"{}"#).unwrap();
        let inputs = BuildInputs {
            bootloader_path: &boot,
            kernel_path: &dir.path().join("missing.img"),
            trampoline_path: &tramp,
            app_path: &app,
            files_root: &files,
        };

        let result = assemble(&plan, &config, &inputs, 0);
        assert!(matches!(result, Err(Error::KernelMissing { .. })));
    }

    #[test]
    fn oversized_bootloader_is_rejected() {
        let dir = tempdir().unwrap();
        let boot = dir.path().join("boot.img");
        let kernel = dir.path().join("kernel.img");
        let tramp = dir.path().join("tramp.img");
        let app = dir.path().join("app.img");
        let files = dir.path().join("files");
        fs::write(&boot, vec![0u8; 447]).unwrap();
        fs::write(&kernel, vec![0u8; 4096]).unwrap();
        fs::write(&tramp, vec![0u8; 512]).unwrap();
        fs::write(&app, vec![0u8; 4096]).unwrap();
        fs::create_dir(&files).unwrap();

        let plan = sample_plan();
        let config = BuildConfig::parse(br#"{}"#).unwrap();
        let inputs = BuildInputs {
            bootloader_path: &boot,
            kernel_path: &kernel,
            trampoline_path: &tramp,
            app_path: &app,
            files_root: &files,
        };

        let result = assemble(&plan, &config, &inputs, 0);
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }
}
