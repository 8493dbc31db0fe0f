//! Overhead region layout for the monolithic-sparse encoder.
//!
//! Grounded on `calculateOverhead` in
//! `examples/original_source/compiler/vmdk/overhead.go`: the header,
//! descriptor, and (redundant + primary) grain directory/table all live in
//! a contiguous, grain-aligned region at the start of the file, ahead of
//! any grain data.

use super::header::{ceil_div, GT_ENTRIES_PER_GT, SECTOR_SIZE};

/// First/last/length triple describing a sector range, mirroring the
/// original's `offsets` struct.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectorRange {
    pub first: u64,
    pub last: u64,
    pub length: u64,
}

impl SectorRange {
    fn after(prev_last: u64, length: u64) -> Self {
        let first = prev_last + 1;
        Self {
            first,
            length,
            last: first + length - 1,
        }
    }
}

/// Sector layout of the overhead region.
#[derive(Debug, Clone, Copy)]
pub struct Overhead {
    pub grains: u64,
    pub header: SectorRange,
    pub descriptor: SectorRange,
    pub rgd: SectorRange,
    pub rgt: SectorRange,
    pub gd: SectorRange,
    pub gt: SectorRange,
}

const HEADER_SECTORS: u64 = 1;
const DESCRIPTOR_SECTORS: u64 = 20;
const REF32: u64 = 4;

/// Computes the overhead layout for `disk_size_mib` MiB of virtual disk
/// capacity, with `grain_size_sectors` sectors per grain (128 in this
/// crate) and `table_max_rows` entries per grain table (512).
pub fn calculate_overhead(total_sectors: u64, grain_size_sectors: u64, table_max_rows: u32) -> Overhead {
    let grains = ceil_div(total_sectors, grain_size_sectors);
    let tables = ceil_div(grains, table_max_rows as u64);
    let table_sectors = ceil_div(table_max_rows as u64 * REF32, SECTOR_SIZE);
    let dir_sectors = ceil_div(tables * REF32, SECTOR_SIZE);

    let table_and_dir_sectors = 2 * (tables * table_sectors + dir_sectors);
    let overhead_sectors = ceil_div(
        table_and_dir_sectors + HEADER_SECTORS + DESCRIPTOR_SECTORS,
        grain_size_sectors,
    ) * grain_size_sectors;

    let header = SectorRange {
        first: 0,
        length: HEADER_SECTORS,
        last: HEADER_SECTORS - 1,
    };
    let descriptor = SectorRange::after(header.last, DESCRIPTOR_SECTORS);
    let rgd = SectorRange::after(descriptor.last, dir_sectors);
    let rgt = SectorRange::after(rgd.last, tables * table_sectors);
    let gd = SectorRange::after(rgt.last, dir_sectors);
    let gt = SectorRange::after(gd.last, tables * table_sectors);

    Overhead {
        grains: overhead_sectors / grain_size_sectors,
        header,
        descriptor,
        rgd,
        rgt,
        gd,
        gt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_grain_aligned() {
        let total_sectors = 64 * 2048; // 64 MiB disk
        let overhead = calculate_overhead(total_sectors, 128, GT_ENTRIES_PER_GT);
        assert_eq!(overhead.grains * 128 % 128, 0);
        assert_eq!(overhead.header.first, 0);
        assert_eq!(overhead.descriptor.first, 1);
        assert_eq!(overhead.descriptor.length, 20);
        assert!(overhead.gt.first > overhead.gd.first);
    }

    #[test]
    fn overhead_scales_with_disk_size() {
        let small = calculate_overhead(16 * 2048, 128, GT_ENTRIES_PER_GT);
        let large = calculate_overhead(4096 * 2048, 128, GT_ENTRIES_PER_GT);
        assert!(large.grains >= small.grains);
    }
}
