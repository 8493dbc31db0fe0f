//! Ext2 inode record (§3, §4.1), byte layout grounded on
//! `examples/original_source/compiler/fs/ext2/inode.go`.

pub const INODE_SIZE: u64 = 128;
pub const DIRECT_POINTERS: usize = 12;

/// `0x4000 | 0x1FF`: directory, rwxrwxrwx.
pub const DIRECTORY_PERMISSIONS: u16 = 0x41FF;
/// `0x8000 | 0x1FF`: regular file, rwxrwxrwx.
pub const FILE_PERMISSIONS: u16 = 0x81FF;

/// Reserved inode numbers 1..=10 are never allocated to real files; the
/// root directory is inode 2.
pub const ROOT_INODE: u32 = 2;
pub const FIRST_FREE_INODE: u32 = 11;

#[derive(Debug, Clone, Copy)]
pub struct Inode {
    pub permissions: u16,
    pub uid: u16,
    pub size_lower: u32,
    pub last_access_time: u32,
    pub creation_time: u32,
    pub modification_time: u32,
    pub deletion_time: u32,
    pub gid: u16,
    pub links: u16,
    pub sectors: u32,
    pub flags: u32,
    pub os_specific_1: u32,
    pub direct_pointers: [u32; DIRECT_POINTERS],
    pub singly_indirect: u32,
    pub doubly_indirect: u32,
    pub triply_indirect: u32,
    pub generation: u32,
    pub file_acl: u32,
    pub size_upper: u32,
    pub fragment_addr: u32,
}

impl Inode {
    /// An all-zero inode, for the reserved inode numbers that are never
    /// allocated to a real file or directory.
    pub fn reserved() -> Self {
        Self {
            permissions: 0,
            uid: 0,
            size_lower: 0,
            last_access_time: 0,
            creation_time: 0,
            modification_time: 0,
            deletion_time: 0,
            gid: 0,
            links: 0,
            sectors: 0,
            flags: 0,
            os_specific_1: 0,
            direct_pointers: [0; DIRECT_POINTERS],
            singly_indirect: 0,
            doubly_indirect: 0,
            triply_indirect: 0,
            generation: 0,
            file_acl: 0,
            size_upper: 0,
            fragment_addr: 0,
        }
    }

    pub fn new(permissions: u16, build_time: u32) -> Self {
        Self {
            permissions,
            uid: 0,
            size_lower: 0,
            last_access_time: build_time,
            creation_time: build_time,
            modification_time: build_time,
            deletion_time: 0,
            gid: 0,
            links: 1,
            sectors: 0,
            flags: 0,
            os_specific_1: 0,
            direct_pointers: [0; DIRECT_POINTERS],
            singly_indirect: 0,
            doubly_indirect: 0,
            triply_indirect: 0,
            generation: 0,
            file_acl: 0,
            size_upper: 0,
            fragment_addr: 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INODE_SIZE as usize);
        buf.extend_from_slice(&self.permissions.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.size_lower.to_le_bytes());
        buf.extend_from_slice(&self.last_access_time.to_le_bytes());
        buf.extend_from_slice(&self.creation_time.to_le_bytes());
        buf.extend_from_slice(&self.modification_time.to_le_bytes());
        buf.extend_from_slice(&self.deletion_time.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.links.to_le_bytes());
        buf.extend_from_slice(&self.sectors.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.os_specific_1.to_le_bytes());
        for pointer in &self.direct_pointers {
            buf.extend_from_slice(&pointer.to_le_bytes());
        }
        buf.extend_from_slice(&self.singly_indirect.to_le_bytes());
        buf.extend_from_slice(&self.doubly_indirect.to_le_bytes());
        buf.extend_from_slice(&self.triply_indirect.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.file_acl.to_le_bytes());
        buf.extend_from_slice(&self.size_upper.to_le_bytes());
        buf.extend_from_slice(&self.fragment_addr.to_le_bytes());
        buf.resize(INODE_SIZE as usize, 0);
        buf
    }

    pub fn set_size(&mut self, byte_len: u64) {
        self.size_lower = byte_len as u32;
        self.size_upper = (byte_len >> 32) as u32;
        self.sectors = super::layout::ceil_div(byte_len, 512) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_fixed_size() {
        let inode = Inode::new(FILE_PERMISSIONS, 0);
        assert_eq!(inode.to_bytes().len(), INODE_SIZE as usize);
    }

    #[test]
    fn direct_pointers_land_at_known_offset() {
        let mut inode = Inode::new(FILE_PERMISSIONS, 0);
        inode.direct_pointers[0] = 0xDEAD_BEEF;
        let bytes = inode.to_bytes();
        // permissions(2)+uid(2)+size(4)+atime(4)+ctime(4)+mtime(4)+dtime(4)+gid(2)+links(2)+sectors(4)+flags(4)+osd1(4) = 40
        let pointer = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        assert_eq!(pointer, 0xDEAD_BEEF);
    }

    #[test]
    fn set_size_splits_upper_and_lower() {
        let mut inode = Inode::new(FILE_PERMISSIONS, 0);
        inode.set_size(5_000_000_000);
        assert_eq!(inode.size_upper, 1);
        assert_eq!(inode.size_lower, (5_000_000_000u64 - (1u64 << 32)) as u32);
    }
}
