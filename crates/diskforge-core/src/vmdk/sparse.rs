//! Monolithic-sparse VMDK encoder (C6).
//!
//! Unlike the stream-optimized encoder, every grain of the disk — not only
//! non-zero ones — is written sequentially right after the overhead
//! region, so the grain directory and grain tables are fully known before
//! any grain data is written: grain `i` always lives at sector
//! `overhead_sectors + i * grain_size_sectors`.

use std::io::{Seek, SeekFrom, Write};

use super::header::{
    descriptor_text, ceil_div, SparseExtentHeader, GRAIN_SIZE_SECTORS, GT_ENTRIES_PER_GT,
    SECTOR_SIZE, VMDK_MAGIC,
};
use super::overhead::{calculate_overhead, Overhead};
use crate::error::{Error, Result};

const DESCRIPTOR_MAX_BYTES: usize = 20 * SECTOR_SIZE as usize;

/// Writer for a monolithic-sparse VMDK file.
pub struct SparseVmdkWriter<W: Write + Seek> {
    writer: W,
    overhead: Overhead,
    total_grains: u64,
    grain_size_bytes: u64,
    grains_written: u64,
    capacity_sectors: u64,
}

impl<W: Write + Seek> SparseVmdkWriter<W> {
    /// Creates a new writer, writing header, descriptor, and the fully
    /// pre-computed grain directory/table region (both redundant and
    /// primary copies) up front.
    pub fn new(mut writer: W, disk_size_mib: u64, disk_name: &str, cid: u32) -> Result<Self> {
        let capacity_sectors = disk_size_mib * 2048;
        let total_grains = ceil_div(capacity_sectors, GRAIN_SIZE_SECTORS);
        let overhead = calculate_overhead(capacity_sectors, GRAIN_SIZE_SECTORS, GT_ENTRIES_PER_GT);
        let overhead_sectors = overhead.grains * GRAIN_SIZE_SECTORS;

        let header = SparseExtentHeader {
            magic: VMDK_MAGIC,
            version: 1,
            flags: 0x3,
            capacity: capacity_sectors,
            grain_size: GRAIN_SIZE_SECTORS,
            descriptor_offset: overhead.descriptor.first,
            descriptor_size: overhead.descriptor.length,
            num_gtes_per_gt: GT_ENTRIES_PER_GT,
            rgd_offset: overhead.rgd.first,
            gd_offset: overhead.gd.first,
            overhead: overhead_sectors,
            unclean_shutdown: 0,
            newline_chars: [b'\n', b' ', b'\r', b'\n'],
            compress_algorithm: 0,
        };

        writer
            .write_all(&header.to_bytes())
            .map_err(|e| Error::invalid_input(format!("failed to write VMDK header: {e}")))?;

        let descriptor = descriptor_text(cid, "monolithicSparse", capacity_sectors, disk_name);
        let mut descriptor_bytes = descriptor.into_bytes();
        if descriptor_bytes.len() > DESCRIPTOR_MAX_BYTES {
            return Err(Error::invalid_input("VMDK descriptor exceeds 20-sector slot"));
        }
        descriptor_bytes.resize(DESCRIPTOR_MAX_BYTES, 0);
        writer
            .write_all(&descriptor_bytes)
            .map_err(|e| Error::invalid_input(format!("failed to write VMDK descriptor: {e}")))?;

        let tables = ceil_div(total_grains, GT_ENTRIES_PER_GT as u64);
        let table_sectors = overhead.gt.length / tables.max(1);

        write_tables_and_directory(
            &mut writer,
            overhead.gd.first,
            overhead.gt.first,
            tables,
            table_sectors,
            overhead_sectors,
            total_grains,
        )?;
        write_tables_and_directory(
            &mut writer,
            overhead.rgd.first,
            overhead.rgt.first,
            tables,
            table_sectors,
            overhead_sectors,
            total_grains,
        )?;

        writer
            .seek(SeekFrom::Start(overhead_sectors * SECTOR_SIZE))
            .map_err(|e| Error::invalid_input(format!("failed to seek past overhead: {e}")))?;

        Ok(Self {
            writer,
            overhead,
            total_grains,
            grain_size_bytes: GRAIN_SIZE_SECTORS * SECTOR_SIZE,
            grains_written: 0,
            capacity_sectors,
        })
    }

    /// Grain size in bytes (64 KiB).
    pub fn grain_size_bytes(&self) -> u64 {
        self.grain_size_bytes
    }

    /// Total number of grains this disk has.
    pub fn total_grains(&self) -> u64 {
        self.total_grains
    }

    /// Writes the next grain in ascending order. `data` must be exactly
    /// `grain_size_bytes()` long, except the final grain may be shorter if
    /// capacity is not a multiple of the grain size (it is padded with
    /// zeros).
    pub fn write_grain(&mut self, data: &[u8]) -> Result<()> {
        if self.grains_written >= self.total_grains {
            return Err(Error::invalid_input("all grains already written"));
        }
        if data.len() as u64 > self.grain_size_bytes {
            return Err(Error::invalid_input("grain payload exceeds grain size"));
        }
        self.writer
            .write_all(data)
            .map_err(|e| Error::invalid_input(format!("failed to write grain: {e}")))?;
        if (data.len() as u64) < self.grain_size_bytes {
            let pad = vec![0u8; (self.grain_size_bytes - data.len() as u64) as usize];
            self.writer
                .write_all(&pad)
                .map_err(|e| Error::invalid_input(format!("failed to pad grain: {e}")))?;
        }
        self.grains_written += 1;
        Ok(())
    }

    /// Flushes and returns the underlying writer once every grain has been
    /// written.
    pub fn finish(mut self) -> Result<W> {
        if self.grains_written != self.total_grains {
            return Err(Error::invalid_input(format!(
                "expected {} grains, got {}",
                self.total_grains, self.grains_written
            )));
        }
        self.writer
            .flush()
            .map_err(|e| Error::invalid_input(format!("failed to flush VMDK: {e}")))?;
        Ok(self.writer)
    }

    /// Total disk capacity in sectors.
    pub fn capacity_sectors(&self) -> u64 {
        self.capacity_sectors
    }

    /// Overhead layout, for callers that need to know where grain data
    /// begins (e.g. the raw assembler computing a final-grain override).
    pub fn overhead(&self) -> &Overhead {
        &self.overhead
    }
}

/// Writes a grain directory (`gd_first`) and its grain tables
/// (`gt_first`), where every slot across every table is filled — every
/// grain of the disk is present in a monolithic-sparse image, so table
/// occupancy is never partial.
fn write_tables_and_directory<W: Write + Seek>(
    writer: &mut W,
    gd_first: u64,
    gt_first: u64,
    tables: u64,
    table_sectors: u64,
    overhead_sectors: u64,
    total_grains: u64,
) -> Result<()> {
    let mut gd_bytes = Vec::with_capacity(tables as usize * 4);
    for t in 0..tables {
        let table_sector = gt_first + t * table_sectors;
        gd_bytes.extend_from_slice(&(table_sector as u32).to_le_bytes());

        let mut gt_bytes = vec![0u8; (GT_ENTRIES_PER_GT as usize) * 4];
        for row in 0..GT_ENTRIES_PER_GT as u64 {
            let grain_index = t * GT_ENTRIES_PER_GT as u64 + row;
            if grain_index >= total_grains {
                break;
            }
            let grain_sector = overhead_sectors + grain_index * GRAIN_SIZE_SECTORS;
            let slot = row as usize * 4;
            gt_bytes[slot..slot + 4].copy_from_slice(&(grain_sector as u32).to_le_bytes());
        }
        writer
            .seek(SeekFrom::Start(table_sector * SECTOR_SIZE))
            .map_err(|e| Error::invalid_input(format!("failed to seek to grain table: {e}")))?;
        writer
            .write_all(&gt_bytes)
            .map_err(|e| Error::invalid_input(format!("failed to write grain table: {e}")))?;
    }

    gd_bytes.resize(gd_bytes.len().max(1), 0);
    writer
        .seek(SeekFrom::Start(gd_first * SECTOR_SIZE))
        .map_err(|e| Error::invalid_input(format!("failed to seek to grain directory: {e}")))?;
    writer
        .write_all(&gd_bytes)
        .map_err(|e| Error::invalid_input(format!("failed to write grain directory: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_header_and_all_grains() {
        let buffer = Cursor::new(Vec::new());
        let mut writer = SparseVmdkWriter::new(buffer, 4, "disk", 0xABCD_EF01).unwrap();
        let total = writer.total_grains();
        for i in 0..total {
            let byte = (i % 251) as u8;
            writer.write_grain(&vec![byte; 65536]).unwrap();
        }
        let result = writer.finish().unwrap();
        let data = result.into_inner();

        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        assert_eq!(magic, VMDK_MAGIC);
        assert!(data.len() as u64 >= total * 65536);
    }

    #[test]
    fn rejects_extra_grain() {
        let buffer = Cursor::new(Vec::new());
        let mut writer = SparseVmdkWriter::new(buffer, 1, "disk", 1).unwrap();
        let total = writer.total_grains();
        for _ in 0..total {
            writer.write_grain(&[0u8; 65536]).unwrap();
        }
        assert!(writer.write_grain(&[0u8; 65536]).is_err());
    }

    #[test]
    fn finish_fails_if_grains_missing() {
        let buffer = Cursor::new(Vec::new());
        let writer = SparseVmdkWriter::new(buffer, 4, "disk", 2).unwrap();
        assert!(writer.finish().is_err());
    }
}
