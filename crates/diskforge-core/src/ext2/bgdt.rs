//! Block group descriptor table (§4.1), grounded on
//! `examples/original_source/compiler/fs/ext2/bgdt.go`. The full table is
//! replicated in every group, matching the original's `writeBGDT`.

use super::layout::{BGDT_ENTRIES_PER_BLOCK, BGDT_ENTRY_SIZE, BLOCK_SIZE};

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub unallocated_blocks: u16,
    pub unallocated_inodes: u16,
    pub directories: u16,
}

impl BlockGroupDescriptor {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BGDT_ENTRY_SIZE as usize);
        buf.extend_from_slice(&self.block_bitmap.to_le_bytes());
        buf.extend_from_slice(&self.inode_bitmap.to_le_bytes());
        buf.extend_from_slice(&self.inode_table.to_le_bytes());
        buf.extend_from_slice(&self.unallocated_blocks.to_le_bytes());
        buf.extend_from_slice(&self.unallocated_inodes.to_le_bytes());
        buf.extend_from_slice(&self.directories.to_le_bytes());
        buf.resize(BGDT_ENTRY_SIZE as usize, 0);
        buf
    }
}

/// Serializes the full table (one entry per group) padded out to whole
/// blocks, ready to be replicated at the start of every group.
pub fn table_to_bytes(entries: &[BlockGroupDescriptor]) -> Vec<u8> {
    let blocks = super::layout::ceil_div(entries.len() as u64, BGDT_ENTRIES_PER_BLOCK);
    let mut buf = Vec::with_capacity((blocks * BLOCK_SIZE) as usize);
    for entry in entries {
        buf.extend_from_slice(&entry.to_bytes());
    }
    buf.resize((blocks * BLOCK_SIZE) as usize, 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_to_fixed_size() {
        let entry = BlockGroupDescriptor {
            block_bitmap: 5,
            inode_bitmap: 6,
            inode_table: 7,
            unallocated_blocks: 100,
            unallocated_inodes: 200,
            directories: 1,
        };
        assert_eq!(entry.to_bytes().len(), BGDT_ENTRY_SIZE as usize);
    }

    #[test]
    fn table_pads_to_whole_blocks() {
        let entries = vec![BlockGroupDescriptor::default(); 3];
        let bytes = table_to_bytes(&entries);
        assert_eq!(bytes.len() as u64 % BLOCK_SIZE, 0);
        assert!(bytes.len() as u64 >= 3 * BGDT_ENTRY_SIZE);
    }
}
