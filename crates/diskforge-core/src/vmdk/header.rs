//! Shared VMDK sparse-extent header layout.
//!
//! Both the monolithic-sparse encoder ([`super::sparse`]) and the
//! stream-optimized encoder ([`super::stream`]) write the same 512-byte
//! header shape at the start of the file; only a handful of fields differ
//! between the two `createType`s.

/// VMDK magic number ("VMDK" as little-endian u32).
pub const VMDK_MAGIC: u32 = 0x564D_444B;

/// Size of a sector in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Grain size in sectors (128 sectors = 64 KiB), per `spec.md` §3.
pub const GRAIN_SIZE_SECTORS: u64 = 128;

/// Number of grain table entries per grain table.
pub const GT_ENTRIES_PER_GT: u32 = 512;

/// Compression algorithm code for zlib.
pub const COMPRESS_ALGORITHM_ZLIB: u16 = 1;

/// Grain directory offset sentinel meaning "at end of file" (used by the
/// stream-optimized header until the footer overwrites it with the real
/// value).
pub const GD_AT_END: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// The 512-byte `SparseExtentHeader` written at sector 0 of every VMDK this
/// crate emits.
#[derive(Debug, Clone)]
pub struct SparseExtentHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub capacity: u64,
    pub grain_size: u64,
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
    pub num_gtes_per_gt: u32,
    pub rgd_offset: u64,
    pub gd_offset: u64,
    pub overhead: u64,
    pub unclean_shutdown: u8,
    pub newline_chars: [u8; 4],
    pub compress_algorithm: u16,
}

impl SparseExtentHeader {
    /// Serializes the header to exactly 512 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE as usize];

        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&self.capacity.to_le_bytes());
        buf[20..28].copy_from_slice(&self.grain_size.to_le_bytes());
        buf[28..36].copy_from_slice(&self.descriptor_offset.to_le_bytes());
        buf[36..44].copy_from_slice(&self.descriptor_size.to_le_bytes());
        buf[44..48].copy_from_slice(&self.num_gtes_per_gt.to_le_bytes());
        buf[48..56].copy_from_slice(&self.rgd_offset.to_le_bytes());
        buf[56..64].copy_from_slice(&self.gd_offset.to_le_bytes());
        buf[64..72].copy_from_slice(&self.overhead.to_le_bytes());
        buf[72] = self.unclean_shutdown;
        buf[73] = self.newline_chars[0];
        buf[74] = self.newline_chars[1];
        buf[75] = self.newline_chars[2];
        buf[76] = self.newline_chars[3];
        buf[77..79].copy_from_slice(&self.compress_algorithm.to_le_bytes());
        // 79..512 pad, already zeroed.

        buf
    }
}

/// Renders the shared descriptor text body (everything after `CID=`/
/// `createType=` which differ per encoder). Grounded on
/// `generateSparseDescriptor`/`generateStreamDescriptor` in
/// `compiler/vmdk/overhead.go`, which are identical apart from the
/// `createType` and `isNativeSnapshot` lines.
pub fn descriptor_text(cid: u32, create_type: &str, capacity_sectors: u64, disk_name: &str) -> String {
    let mut out = String::new();
    out.push_str("# Disk DescriptorFile\n");
    out.push_str("version=1\n");
    out.push_str(&format!("CID={:08X}\n", cid));
    out.push_str("parentCID=ffffffff\n");
    if create_type == "streamOptimized" {
        out.push_str("isNativeSnapshot=\"no\"\n");
    }
    out.push_str(&format!("createType=\"{}\"\n\n", create_type));
    out.push_str("# Extent description\n");
    out.push_str(&format!(
        "RW {} SPARSE \"{}.vmdk\"\n\n",
        capacity_sectors, disk_name
    ));
    out.push_str("# The Disk Data Base\n");
    out.push_str("#DDB\n\n");
    out.push_str("ddb.virtualHWVersion = \"8\"\n");
    out.push_str("ddb.adapterType = \"ide\"\n");
    out
}

/// `ceil(a / b)` for unsigned integers.
pub fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_fixed_offsets() {
        let header = SparseExtentHeader {
            magic: VMDK_MAGIC,
            version: 1,
            flags: 0x3,
            capacity: 2048,
            grain_size: GRAIN_SIZE_SECTORS,
            descriptor_offset: 1,
            descriptor_size: 20,
            num_gtes_per_gt: GT_ENTRIES_PER_GT,
            rgd_offset: 21,
            gd_offset: 50,
            overhead: 128,
            unclean_shutdown: 0,
            newline_chars: [b'\n', b' ', b'\r', b'\n'],
            compress_algorithm: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 512);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), VMDK_MAGIC);
        assert_eq!(u64::from_le_bytes(bytes[56..64].try_into().unwrap()), 50);
    }

    #[test]
    fn descriptor_contains_extent_line() {
        let text = descriptor_text(0xDEADBEEF, "monolithicSparse", 2048, "disk");
        assert!(text.contains("RW 2048 SPARSE \"disk.vmdk\""));
        assert!(text.contains("CID=DEADBEEF"));
        assert!(text.contains("createType=\"monolithicSparse\""));
    }

    #[test]
    fn ceil_div_basic() {
        assert_eq!(ceil_div(10, 3), 4);
        assert_eq!(ceil_div(9, 3), 3);
    }
}
