//! Ext2 superblock (§4.1), byte layout grounded on
//! `examples/original_source/compiler/fs/ext2/superblock.go`, replicated
//! into block 0 of every group.

use super::layout::BLOCK_SIZE;

pub const EXT2_MAGIC: u16 = 0xEF53;
const SUPER_UID: u16 = 1000;
const SUPER_GID: u16 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub total_inodes: u32,
    pub total_blocks: u32,
    pub reserved_blocks: u32,
    pub unallocated_blocks: u32,
    pub unallocated_inodes: u32,
    pub superblock_number: u32,
    pub block_size_log: u32,
    pub fragment_size_log: u32,
    pub blocks_per_group: u32,
    pub fragments_per_group: u32,
    pub inodes_per_group: u32,
    pub last_mount_time: u32,
    pub last_written_time: u32,
    pub mounts_since_check: u16,
    pub mounts_check_interval: u16,
    pub signature: u16,
    pub state: u16,
    pub error_protocol: u16,
    pub version_minor: u16,
    pub time_last_check: u32,
    pub time_check_interval: u32,
    pub os: u32,
    pub version_major: u32,
    pub super_user: u16,
    pub super_group: u16,
}

impl Superblock {
    pub fn new(build_time: u32) -> Self {
        Self {
            total_inodes: 0,
            total_blocks: 0,
            reserved_blocks: 0,
            unallocated_blocks: 0,
            unallocated_inodes: 0,
            superblock_number: 1,
            block_size_log: 0, // log2(1024) - 10 == 0
            fragment_size_log: 0,
            blocks_per_group: 0,
            fragments_per_group: 0,
            inodes_per_group: 0,
            last_mount_time: build_time,
            last_written_time: build_time,
            mounts_since_check: 0,
            mounts_check_interval: 20,
            signature: EXT2_MAGIC,
            state: 1,
            error_protocol: 0,
            version_minor: 0,
            time_last_check: build_time,
            time_check_interval: 0,
            os: 0,
            version_major: 0,
            super_user: SUPER_UID,
            super_group: SUPER_GID,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_SIZE as usize);
        buf.extend_from_slice(&self.total_inodes.to_le_bytes());
        buf.extend_from_slice(&self.total_blocks.to_le_bytes());
        buf.extend_from_slice(&self.reserved_blocks.to_le_bytes());
        buf.extend_from_slice(&self.unallocated_blocks.to_le_bytes());
        buf.extend_from_slice(&self.unallocated_inodes.to_le_bytes());
        buf.extend_from_slice(&self.superblock_number.to_le_bytes());
        buf.extend_from_slice(&self.block_size_log.to_le_bytes());
        buf.extend_from_slice(&self.fragment_size_log.to_le_bytes());
        buf.extend_from_slice(&self.blocks_per_group.to_le_bytes());
        buf.extend_from_slice(&self.fragments_per_group.to_le_bytes());
        buf.extend_from_slice(&self.inodes_per_group.to_le_bytes());
        buf.extend_from_slice(&self.last_mount_time.to_le_bytes());
        buf.extend_from_slice(&self.last_written_time.to_le_bytes());
        buf.extend_from_slice(&self.mounts_since_check.to_le_bytes());
        buf.extend_from_slice(&self.mounts_check_interval.to_le_bytes());
        buf.extend_from_slice(&self.signature.to_le_bytes());
        buf.extend_from_slice(&self.state.to_le_bytes());
        buf.extend_from_slice(&self.error_protocol.to_le_bytes());
        buf.extend_from_slice(&self.version_minor.to_le_bytes());
        buf.extend_from_slice(&self.time_last_check.to_le_bytes());
        buf.extend_from_slice(&self.time_check_interval.to_le_bytes());
        buf.extend_from_slice(&self.os.to_le_bytes());
        buf.extend_from_slice(&self.version_major.to_le_bytes());
        buf.extend_from_slice(&self.super_user.to_le_bytes());
        buf.extend_from_slice(&self.super_group.to_le_bytes());
        buf.resize(BLOCK_SIZE as usize, 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_one_block() {
        let sb = Superblock::new(1_700_000_000);
        assert_eq!(sb.to_bytes().len(), BLOCK_SIZE as usize);
    }

    #[test]
    fn magic_is_at_known_offset() {
        let sb = Superblock::new(0);
        let bytes = sb.to_bytes();
        let magic = u16::from_le_bytes(bytes[56..58].try_into().unwrap());
        assert_eq!(magic, EXT2_MAGIC);
    }
}
