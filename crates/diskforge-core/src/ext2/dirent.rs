//! Directory entry records (§4.1), grounded on `dirData`/`dirDataLength` in
//! `examples/original_source/compiler/fs/ext2/scan.go`.
//!
//! Each record is `inode:u32, rec_len:u16, name_len:u16, name[..], pad[..]`,
//! name-aligned to 4 bytes. A record is never split across a block
//! boundary: when the next entry wouldn't fit in the space left in the
//! current block, a null entry (`inode = 0`) soaks up the remainder and the
//! real entry starts fresh at the next block.

use crate::error::{Error, Result};

use super::layout::BLOCK_SIZE;

const ENTRY_HEADER_SIZE: i64 = 8;
const NAME_ALIGNMENT: i64 = 4;

fn align(n: i64, alignment: i64) -> i64 {
    (n + alignment - 1) / alignment * alignment
}

/// A single directory child: the inode it points to and its file name.
#[derive(Debug, Clone)]
pub struct DirTuple {
    pub inode: u32,
    pub name: String,
}

/// Packs `tuples` (already including the synthesized `.` and `..` entries,
/// if the caller wants them) into directory block data, respecting block
/// boundaries the way a real ext2 directory listing does.
pub fn pack(tuples: &[DirTuple]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut leftover: i64 = BLOCK_SIZE as i64;

    for (i, tuple) in tuples.iter().enumerate() {
        let mut rec_len = ENTRY_HEADER_SIZE + align(tuple.name.len() as i64 + 1, NAME_ALIGNMENT);

        if leftover >= rec_len {
            leftover -= rec_len;
        } else {
            write_null_entry(&mut buf, leftover);
            leftover = BLOCK_SIZE as i64 - rec_len;
        }

        if leftover < ENTRY_HEADER_SIZE || i == tuples.len() - 1 {
            rec_len += leftover;
            leftover = BLOCK_SIZE as i64;
        }

        write_entry(&mut buf, tuple, rec_len);
    }

    buf
}

/// Byte length of the packed directory data for `names`, without building
/// the buffer. Used by the layout planner to size the directory's data
/// blocks up front.
///
/// Uses the exact same per-entry size formula as [`pack`] (name length plus
/// its trailing nul, then aligned) so this never drifts from what `pack`
/// actually produces.
pub fn packed_length(names: &[String]) -> u64 {
    let mut length: i64 = 0;
    let mut leftover: i64 = BLOCK_SIZE as i64;

    for name in names {
        let rec_len = ENTRY_HEADER_SIZE + align(name.len() as i64 + 1, NAME_ALIGNMENT);
        if leftover >= rec_len {
            length += rec_len;
            leftover -= rec_len;
        } else {
            length += leftover;
            length += rec_len;
            leftover = BLOCK_SIZE as i64 - rec_len;
        }
    }

    length as u64
}

/// Directories are bounded to direct blocks only (no indirect addressing),
/// per the design note in §9: a directory whose packed data would need more
/// than 12 blocks fails outright rather than growing an indirect chain.
pub fn blocks_needed(byte_len: u64, dir_path: impl AsRef<std::path::Path>) -> Result<u64> {
    let blocks = super::layout::ceil_div(byte_len, BLOCK_SIZE);
    if blocks > super::inode::DIRECT_POINTERS as u64 {
        return Err(Error::file_too_large(dir_path.as_ref()));
    }
    Ok(blocks)
}

fn write_null_entry(buf: &mut Vec<u8>, leftover: i64) {
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(leftover as u16).to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.resize(buf.len() + (leftover - ENTRY_HEADER_SIZE) as usize, 0);
}

fn write_entry(buf: &mut Vec<u8>, tuple: &DirTuple, rec_len: i64) {
    let start = buf.len();
    buf.extend_from_slice(&tuple.inode.to_le_bytes());
    buf.extend_from_slice(&(rec_len as u16).to_le_bytes());
    buf.extend_from_slice(&(tuple.name.len() as u16).to_le_bytes());
    buf.extend_from_slice(tuple.name.as_bytes());
    buf.push(0);
    buf.resize(start + rec_len as usize, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_fills_whole_block() {
        let tuples = vec![DirTuple {
            inode: 2,
            name: ".".to_string(),
        }];
        let packed = pack(&tuples);
        assert_eq!(packed.len() as u64, BLOCK_SIZE);
        let rec_len = u16::from_le_bytes(packed[4..6].try_into().unwrap());
        assert_eq!(rec_len as u64, BLOCK_SIZE);
    }

    #[test]
    fn entries_never_cross_a_block_boundary() {
        let mut tuples = vec![
            DirTuple { inode: 2, name: ".".to_string() },
            DirTuple { inode: 2, name: "..".to_string() },
        ];
        for i in 0..100 {
            tuples.push(DirTuple {
                inode: 100 + i,
                name: format!("file-{i:03}.bin"),
            });
        }
        let packed = pack(&tuples);
        assert_eq!(packed.len() as u64 % BLOCK_SIZE, 0);

        let mut offset = 0usize;
        while offset < packed.len() {
            let block_end = offset + BLOCK_SIZE as usize;
            let mut cursor = offset;
            while cursor < block_end {
                let rec_len = u16::from_le_bytes(packed[cursor + 4..cursor + 6].try_into().unwrap());
                assert!(rec_len > 0, "zero-length record would loop forever");
                cursor += rec_len as usize;
            }
            assert_eq!(cursor, block_end, "entries must tile each block exactly");
            offset = block_end;
        }
    }

    #[test]
    fn more_than_twelve_blocks_of_entries_fails() {
        assert!(blocks_needed(13 * BLOCK_SIZE, "/some/dir").is_err());
        assert!(blocks_needed(12 * BLOCK_SIZE, "/some/dir").is_ok());
    }
}
