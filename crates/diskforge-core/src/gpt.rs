//! GPT + MBR Writer (C3, spec §4.3), grounded on
//! `examples/original_source/compiler/vmdk/gpt.go` and
//! `examples/original_source/compiler/rawsparse/mbr.go`.
//!
//! Produces the protective MBR, primary GPT header + partition array, and
//! the backup GPT (header + partition array), as raw byte buffers the
//! caller positions via [`crate::write_instruction::WriteInstruction`].

use uuid::Uuid;

use crate::plan::Plan;

pub const SECTOR_SIZE: u64 = 512;
const PARTITION_ARRAY_BYTES: usize = 128 * 128;
const HEADER_SIZE: u32 = 92;
const GPT_SIGNATURE: u64 = 0x5452_4150_2049_4645; // "EFI PART"

/// Fixed type GUID for the root (files) partition, per spec §4.3/§C.3.
pub const ROOT_PARTITION_TYPE_GUID: [u8; 16] = [
    0xB6, 0x7C, 0x6E, 0x51, 0xCF, 0x6E, 0xD6, 0x11, 0x8F, 0xF8, 0x00, 0x02, 0x2D, 0x09, 0x71, 0x2B,
];

fn utf16le_name(name: &str) -> [u8; 72] {
    let mut buf = [0u8; 72];
    for (i, unit) in name.encode_utf16().take(36).enumerate() {
        buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    buf
}

fn random_guid() -> [u8; 16] {
    *Uuid::new_v4().as_bytes()
}

struct GptHeader {
    current_lba: u64,
    backup_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: [u8; 16],
    start_lba_parts: u64,
    crc_parts: u32,
    crc: u32,
}

impl GptHeader {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(&GPT_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&[0u8, 0, 1, 0]); // revision 1.0
        buf.extend_from_slice(&HEADER_SIZE.to_le_bytes());
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.extend_from_slice(&self.current_lba.to_le_bytes());
        buf.extend_from_slice(&self.backup_lba.to_le_bytes());
        buf.extend_from_slice(&self.first_usable_lba.to_le_bytes());
        buf.extend_from_slice(&self.last_usable_lba.to_le_bytes());
        buf.extend_from_slice(&self.disk_guid);
        buf.extend_from_slice(&self.start_lba_parts.to_le_bytes());
        buf.extend_from_slice(&128u32.to_le_bytes()); // noOfParts
        buf.extend_from_slice(&128u32.to_le_bytes()); // sizePartEntry
        buf.extend_from_slice(&self.crc_parts.to_le_bytes());
        debug_assert_eq!(buf.len(), HEADER_SIZE as usize);
        buf
    }
}

struct GptPartitionEntry {
    type_guid: [u8; 16],
    part_guid: [u8; 16],
    first_lba: u64,
    last_lba: u64,
    name: [u8; 72],
}

impl GptPartitionEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&self.type_guid);
        buf.extend_from_slice(&self.part_guid);
        buf.extend_from_slice(&self.first_lba.to_le_bytes());
        buf.extend_from_slice(&self.last_lba.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // attributes
        buf.extend_from_slice(&self.name);
        buf.resize(128, 0);
        buf
    }
}

fn partition_array(plan: &Plan) -> Vec<u8> {
    let p1 = GptPartitionEntry {
        type_guid: [0u8; 16],
        part_guid: random_guid(),
        first_lba: plan.reserved.last_lba + 1,
        last_lba: plan.app.last_lba,
        name: utf16le_name("vorteil-os"),
    };
    let p2 = GptPartitionEntry {
        type_guid: ROOT_PARTITION_TYPE_GUID,
        part_guid: random_guid(),
        first_lba: plan.files.first_lba,
        last_lba: plan.files.last_lba,
        name: utf16le_name("vorteil-root"),
    };

    let mut array = Vec::with_capacity(PARTITION_ARRAY_BYTES);
    array.extend_from_slice(&p1.to_bytes());
    array.extend_from_slice(&p2.to_bytes());
    array.resize(PARTITION_ARRAY_BYTES, 0);
    array
}

/// The complete set of byte buffers this component produces, each already
/// positioned at an absolute sector offset within the disk image.
pub struct GptLayout {
    pub mbr_partition_entry: Vec<u8>,
    pub mbr_signature: Vec<u8>,
    pub primary_header: Vec<u8>,
    pub primary_partition_array: Vec<u8>,
    pub backup_header: Vec<u8>,
    pub backup_partition_array: Vec<u8>,
}

/// Builds the protective MBR partition entry + signature and the primary
/// and backup GPT headers/partition arrays for `plan`. The 446-byte boot
/// code that occupies offset 0..445 is a separate input (`vboot.img`) and
/// is written directly by the assembler, not by this function.
pub fn build(plan: &Plan) -> GptLayout {
    let array = partition_array(plan);

    let mut primary = GptHeader {
        current_lba: 1,
        backup_lba: plan.total_lbas - 1,
        first_usable_lba: plan.reserved.last_lba + 1,
        last_usable_lba: plan.total_lbas - plan.backup.length_sectors,
        disk_guid: random_guid(),
        start_lba_parts: 2,
        crc_parts: crc32fast::hash(&array),
        crc: 0,
    };
    primary.crc = crc32fast::hash(&primary.to_bytes());

    let mut backup = GptHeader {
        current_lba: plan.backup.last_lba,
        backup_lba: 1,
        first_usable_lba: primary.first_usable_lba,
        last_usable_lba: primary.last_usable_lba,
        disk_guid: primary.disk_guid,
        start_lba_parts: plan.backup.first_lba + 1,
        crc_parts: primary.crc_parts,
        crc: 0,
    };
    backup.crc = crc32fast::hash(&backup.to_bytes());

    let mbr_entry = protective_mbr_entry(plan.total_lbas);

    GptLayout {
        mbr_partition_entry: mbr_entry,
        mbr_signature: vec![0x55, 0xAA],
        primary_header: primary.to_bytes(),
        primary_partition_array: array.clone(),
        backup_header: backup.to_bytes(),
        backup_partition_array: array,
    }
}

fn protective_mbr_entry(total_lbas: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(0x7F); // status
    buf.push(0); // head first
    buf.push(0); // sector first
    buf.push(0); // cylinder first
    buf.push(0xEE); // partition type: GPT protective
    buf.push(0); // head last
    buf.push(0); // sector last
    buf.push(0); // cylinder last
    buf.extend_from_slice(&1u32.to_le_bytes()); // first LBA
    buf.extend_from_slice(&(total_lbas as u32).to_le_bytes());
    buf
}
