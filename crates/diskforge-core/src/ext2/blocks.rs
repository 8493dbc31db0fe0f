//! Indirect block addressing (§4.1, §9).
//!
//! `compute_blocks` mirrors `computeBlocks` in
//! `examples/original_source/compiler/fs/ext2/scan.go`: translating a data
//! block count into a total block count (data blocks plus singly/doubly/
//! triply-indirect control block overhead), bucketed by the same three
//! thresholds (12, 268, 65804).
//!
//! The original's emission loop (`writeFile`/`inodePointers`) lays out
//! doubly- and triply-indirect groups at a fixed stride of 256 regardless of
//! how many blocks the last group actually holds, which overshoots
//! `computeBlocks`'s tight ceiling-based total whenever the last group is
//! partial. [`build_tree`] instead packs each level tightly (every L2/L3
//! control block holds up to `PTRS_PER_BLOCK` children, the last one fewer),
//! which is the only packing consistent with `compute_blocks`'s own formula
//! for a partial last group.

use crate::error::{Error, Result};

use super::inode::DIRECT_POINTERS;
use super::layout::{ceil_div, BLOCK_SIZE};

/// Pointers per indirect block: 1024-byte blocks of 4-byte `u32` addresses.
pub const PTRS_PER_BLOCK: u64 = BLOCK_SIZE / 4;

const SINGLE_THRESHOLD: u64 = DIRECT_POINTERS as u64;
const DOUBLE_THRESHOLD: u64 = SINGLE_THRESHOLD + PTRS_PER_BLOCK;
const TRIPLE_THRESHOLD: u64 = DOUBLE_THRESHOLD + PTRS_PER_BLOCK * PTRS_PER_BLOCK;
const BOUNDS: u64 = TRIPLE_THRESHOLD + PTRS_PER_BLOCK * PTRS_PER_BLOCK * PTRS_PER_BLOCK;

/// One control block in the indirect tree: its relative position within
/// the file's own block run, and the relative positions of its children in
/// pointer order (to be translated into absolute addresses and written out
/// as the control block's contents).
#[derive(Debug, Clone)]
pub struct ControlBlock {
    pub relative_position: u64,
    pub children: Vec<u64>,
}

/// The full block layout for one file's data, addressed relative to the
/// start of the file's own block run (not absolute filesystem addresses;
/// the caller maps these through [`super::layout::GroupLayout::map_data_block`]).
#[derive(Debug, Clone)]
pub struct IndirectTree {
    pub total_blocks: u64,
    pub singly_indirect: Option<u64>,
    pub doubly_indirect: Option<u64>,
    pub triply_indirect: Option<u64>,
    /// `data_positions[i]` is the relative block position holding logical
    /// data block `i`.
    pub data_positions: Vec<u64>,
    pub controls: Vec<ControlBlock>,
}

enum Entry {
    Data(u64),
    Control,
}

/// Builds the indirect-addressing tree for a file with `data_blocks` blocks
/// of data, tightly packed per level.
pub fn build_tree(data_blocks: u64) -> Result<IndirectTree> {
    if data_blocks > BOUNDS {
        return Err(Error::file_too_large(format!(
            "{data_blocks} data blocks exceeds ext2 triple-indirect bound of {BOUNDS}"
        )));
    }

    let mut entries: Vec<Entry> = Vec::new();
    let mut data_positions = vec![0u64; data_blocks as usize];
    let mut controls: Vec<ControlBlock> = Vec::new();

    let direct_count = data_blocks.min(SINGLE_THRESHOLD);
    for logical in 0..direct_count {
        data_positions[logical as usize] = push_data(&mut entries, logical);
    }

    let mut next_logical = direct_count;
    let mut singly_indirect = None;
    let mut doubly_indirect = None;
    let mut triply_indirect = None;

    if next_logical < data_blocks {
        let remaining = data_blocks - next_logical;
        let count = remaining.min(PTRS_PER_BLOCK);
        let (pos, children) = push_group(&mut entries, &mut data_positions, next_logical, count);
        singly_indirect = Some(pos);
        controls.push(ControlBlock {
            relative_position: pos,
            children,
        });
        next_logical += count;
    }

    if next_logical < data_blocks {
        let l1_pos = push_control(&mut entries);
        doubly_indirect = Some(l1_pos);
        let mut l1_children = Vec::new();
        while next_logical < data_blocks && l1_children.len() < (PTRS_PER_BLOCK as usize) {
            let remaining = data_blocks - next_logical;
            let count = remaining.min(PTRS_PER_BLOCK);
            let (l2_pos, l2_children) =
                push_group(&mut entries, &mut data_positions, next_logical, count);
            l1_children.push(l2_pos);
            controls.push(ControlBlock {
                relative_position: l2_pos,
                children: l2_children,
            });
            next_logical += count;
        }
        controls.push(ControlBlock {
            relative_position: l1_pos,
            children: l1_children,
        });
    }

    if next_logical < data_blocks {
        let l1_pos = push_control(&mut entries);
        triply_indirect = Some(l1_pos);
        let mut l1_children = Vec::new();
        while next_logical < data_blocks {
            let l2_pos = push_control(&mut entries);
            let mut l2_children = Vec::new();
            while next_logical < data_blocks && l2_children.len() < (PTRS_PER_BLOCK as usize) {
                let remaining = data_blocks - next_logical;
                let count = remaining.min(PTRS_PER_BLOCK);
                let (l3_pos, l3_children) =
                    push_group(&mut entries, &mut data_positions, next_logical, count);
                l2_children.push(l3_pos);
                controls.push(ControlBlock {
                    relative_position: l3_pos,
                    children: l3_children,
                });
                next_logical += count;
            }
            controls.push(ControlBlock {
                relative_position: l2_pos,
                children: l2_children,
            });
            l1_children.push(l2_pos);
        }
        controls.push(ControlBlock {
            relative_position: l1_pos,
            children: l1_children,
        });
    }

    // Controls were pushed inner-first; callers write control blocks after
    // their children exist but order doesn't matter for correctness since
    // each entry only references relative positions, not other controls'
    // contents.
    controls.sort_by_key(|c| c.relative_position);

    Ok(IndirectTree {
        total_blocks: entries.len() as u64,
        singly_indirect,
        doubly_indirect,
        triply_indirect,
        data_positions,
        controls,
    })
}

fn push_data(entries: &mut Vec<Entry>, logical: u64) -> u64 {
    let pos = entries.len() as u64;
    entries.push(Entry::Data(logical));
    pos
}

fn push_control(entries: &mut Vec<Entry>) -> u64 {
    let pos = entries.len() as u64;
    entries.push(Entry::Control);
    pos
}

fn push_group(
    entries: &mut Vec<Entry>,
    data_positions: &mut [u64],
    start_logical: u64,
    count: u64,
) -> (u64, Vec<u64>) {
    let ctrl_pos = push_control(entries);
    let mut children = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let logical = start_logical + offset;
        let pos = push_data(entries, logical);
        data_positions[logical as usize] = pos;
        children.push(pos);
    }
    (ctrl_pos, children)
}

/// Total block count (data plus control overhead) needed to store
/// `byte_len` bytes of file content.
pub fn compute_blocks(byte_len: u64) -> Result<u64> {
    let data_blocks = ceil_div(byte_len, BLOCK_SIZE);
    Ok(build_tree(data_blocks)?.total_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_entirely_in_direct_pointers() {
        let tree = build_tree(5).unwrap();
        assert_eq!(tree.total_blocks, 5);
        assert!(tree.singly_indirect.is_none());
    }

    #[test]
    fn singly_indirect_anchor_at_slot_twelve() {
        let tree = build_tree(SINGLE_THRESHOLD + 1).unwrap();
        assert_eq!(tree.singly_indirect, Some(12));
        assert_eq!(tree.total_blocks, SINGLE_THRESHOLD + 1 + 1);
    }

    #[test]
    fn doubly_indirect_anchor_at_slot_269() {
        let tree = build_tree(DOUBLE_THRESHOLD + 1).unwrap();
        assert_eq!(tree.doubly_indirect, Some(269));
    }

    #[test]
    fn triply_indirect_anchor_at_slot_66062() {
        let tree = build_tree(TRIPLE_THRESHOLD + 1).unwrap();
        assert_eq!(tree.triply_indirect, Some(66062));
    }

    #[test]
    fn partial_last_group_matches_tight_formula() {
        // One full singly-indirect block plus a partial doubly group.
        let data_blocks = DOUBLE_THRESHOLD + 300;
        let tree = build_tree(data_blocks).unwrap();
        let expected = data_blocks + 1 /* singly ctrl */ + 1 /* doubly L1 */
            + ceil_div(300, PTRS_PER_BLOCK) /* doubly L2 ctrl blocks */;
        assert_eq!(tree.total_blocks, expected);
    }

    #[test]
    fn data_positions_cover_every_logical_block() {
        let data_blocks = DOUBLE_THRESHOLD + 50;
        let tree = build_tree(data_blocks).unwrap();
        assert_eq!(tree.data_positions.len() as u64, data_blocks);
        let mut seen: Vec<u64> = tree.data_positions.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len() as u64, data_blocks);
    }

    #[test]
    fn beyond_bounds_fails() {
        assert!(build_tree(BOUNDS + 1).is_err());
    }

    #[test]
    fn compute_blocks_wraps_byte_length() {
        assert_eq!(compute_blocks(1).unwrap(), 1);
        assert_eq!(compute_blocks(BLOCK_SIZE * SINGLE_THRESHOLD).unwrap(), SINGLE_THRESHOLD);
    }
}
