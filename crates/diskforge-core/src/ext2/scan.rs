//! Recursive directory walk (§4.1), grounded on `scanRoot`/`scan` in
//! `examples/original_source/compiler/fs/ext2/scan.go`.
//!
//! Inode numbering: 1 is reserved blank, 2 is the root directory, 3-10 are
//! reserved blank, real entries start at 11. Data blocks are allocated from
//! a single filesystem-wide cursor in directory-preorder, so a file or
//! directory's own block run is contiguous; [`super::blocks::build_tree`]
//! places that run's indirect control blocks relative to its start.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use super::blocks::build_tree;
use super::dirent::{self, DirTuple};
use super::inode::{Inode, DIRECTORY_PERMISSIONS, FILE_PERMISSIONS, ROOT_INODE};
use super::layout::{ceil_div, GroupLayout, BLOCK_SIZE};
use crate::write_instruction::WriteInstruction;

pub const FIRST_RESERVED_INODE: u32 = 1;
pub const RESERVED_INODE_COUNT: u32 = 10;

/// Result of walking a host directory tree into ext2 structures.
pub struct ScanResult {
    /// Inodes in on-disk order: `inodes[0]` is inode number 1.
    pub inodes: Vec<Inode>,
    pub instructions: Vec<WriteInstruction>,
    /// Directory count per block group, for the BGDT's `directories` field.
    pub group_directories: Vec<u32>,
    /// Total data blocks consumed (including indirect control blocks).
    pub total_data_blocks: u64,
}

/// Counts inodes a host directory tree needs beyond the 10 reserved ones
/// (the root directory itself is reserved inode 2, so only `root`'s
/// descendants count), so the layout planner can size the inode table
/// before the real scan.
pub fn count_inodes(root: &Path) -> Result<u64> {
    fn walk(path: &Path) -> Result<u64> {
        let mut count = 1; // this entry itself
        if path.is_dir() {
            for entry in read_sorted(path)? {
                count += walk(&entry)?;
            }
        }
        Ok(count)
    }
    let mut total = 0;
    for entry in read_sorted(root)? {
        total += walk(&entry)?;
    }
    Ok(total)
}

fn read_sorted(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|e| Error::io(e, dir))?
        .map(|e| e.map(|e| e.path()).map_err(|e| Error::io(e, dir)))
        .collect::<Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

struct Walker<'a> {
    layout: &'a GroupLayout,
    build_time: u32,
    next_block: u64,
    next_inode: u32,
    inodes: Vec<Inode>,
    instructions: Vec<WriteInstruction>,
    group_directories: Vec<u32>,
}

impl<'a> Walker<'a> {
    fn alloc_inode(&mut self) -> u32 {
        let number = self.next_inode;
        self.next_inode += 1;
        number
    }

    fn place_blocks(
        &mut self,
        byte_len: u64,
        path_for_errors: &Path,
    ) -> Result<(u64, u64, super::blocks::IndirectTree)> {
        let data_blocks = ceil_div(byte_len, BLOCK_SIZE);
        let tree = build_tree(data_blocks).map_err(|_| Error::file_too_large(path_for_errors))?;
        let start = self.next_block;
        self.next_block += tree.total_blocks;
        Ok((start, tree.total_blocks, tree))
    }

    fn write_inode_pointers(&self, inode: &mut Inode, start: u64, tree: &super::blocks::IndirectTree) {
        for (logical, &relpos) in tree.data_positions.iter().enumerate() {
            if logical < super::inode::DIRECT_POINTERS {
                inode.direct_pointers[logical] = self.layout.map_data_block(start + relpos) as u32;
            }
        }
        if let Some(relpos) = tree.singly_indirect {
            inode.singly_indirect = self.layout.map_data_block(start + relpos) as u32;
        }
        if let Some(relpos) = tree.doubly_indirect {
            inode.doubly_indirect = self.layout.map_data_block(start + relpos) as u32;
        }
        if let Some(relpos) = tree.triply_indirect {
            inode.triply_indirect = self.layout.map_data_block(start + relpos) as u32;
        }
    }

    fn write_control_blocks(&mut self, start: u64, tree: &super::blocks::IndirectTree) {
        for control in &tree.controls {
            let mut buf = Vec::with_capacity(BLOCK_SIZE as usize);
            for &child in &control.children {
                let addr = self.layout.map_data_block(start + child) as u32;
                buf.extend_from_slice(&addr.to_le_bytes());
            }
            buf.resize(BLOCK_SIZE as usize, 0);
            let addr = self.layout.map_data_block(start + control.relative_position);
            self.instructions
                .push(WriteInstruction::buffer(addr * BLOCK_SIZE, buf));
        }
    }

    fn write_dir_data(&mut self, data: Vec<u8>, start: u64, tree: &super::blocks::IndirectTree) {
        for (logical, chunk) in data.chunks(BLOCK_SIZE as usize).enumerate() {
            let relpos = tree.data_positions[logical];
            let addr = self.layout.map_data_block(start + relpos);
            self.instructions
                .push(WriteInstruction::buffer(addr * BLOCK_SIZE, chunk.to_vec()));
        }
    }

    fn write_file_data(&mut self, path: &Path, byte_len: u64, start: u64, tree: &super::blocks::IndirectTree) {
        let whole_blocks = byte_len / BLOCK_SIZE;
        for logical in 0..tree.data_positions.len() as u64 {
            let relpos = tree.data_positions[logical as usize];
            let addr = self.layout.map_data_block(start + relpos);
            let length = if logical < whole_blocks {
                BLOCK_SIZE
            } else {
                byte_len - whole_blocks * BLOCK_SIZE
            };
            self.instructions.push(WriteInstruction::file_slice(
                addr * BLOCK_SIZE,
                length,
                path,
                logical * BLOCK_SIZE,
            ));
        }
    }

    fn scan_dir(&mut self, path: &Path, this: u32, parent: u32) -> Result<()> {
        let children = read_sorted(path)?;
        let names: Vec<String> = children
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        let mut header_names = vec![".".to_string(), "..".to_string()];
        header_names.extend(names.iter().cloned());
        let data_len = dirent::packed_length(&header_names);
        dirent::blocks_needed(data_len, path)?;

        let (start, total_blocks, tree) = self.place_blocks(data_len, path)?;

        let dir_child_count = children.iter().filter(|p| p.is_dir()).count() as u32;
        let links = if this == ROOT_INODE {
            2 + dir_child_count
        } else {
            1 + dir_child_count
        };

        let mut inode = Inode::new(DIRECTORY_PERMISSIONS, self.build_time);
        inode.set_size(ceil_div(data_len, BLOCK_SIZE) * BLOCK_SIZE);
        inode.links = links as u16;
        inode.sectors = (total_blocks * super::layout::SECTORS_PER_BLOCK) as u32;
        self.write_inode_pointers(&mut inode, start, &tree);

        self.record_inode(this, inode);
        self.group_directories[((this - 1) as u64 / self.layout.inodes_per_group) as usize] += 1;

        let mut child_inodes = Vec::with_capacity(children.len());
        for child in &children {
            let child_inode = self.alloc_inode();
            child_inodes.push(child_inode);
        }

        let mut tuples = vec![
            DirTuple { inode: this, name: ".".to_string() },
            DirTuple { inode: parent, name: "..".to_string() },
        ];
        for (name, child_inode) in names.iter().zip(child_inodes.iter()) {
            tuples.push(DirTuple { inode: *child_inode, name: name.clone() });
        }
        let packed = dirent::pack(&tuples);

        self.write_control_blocks(start, &tree);
        self.write_dir_data(packed, start, &tree);

        for (child_path, child_inode) in children.iter().zip(child_inodes.iter()) {
            if child_path.is_dir() {
                self.scan_dir(child_path, *child_inode, this)?;
            } else {
                self.scan_file(child_path, *child_inode)?;
            }
        }

        Ok(())
    }

    fn scan_file(&mut self, path: &Path, this: u32) -> Result<()> {
        let metadata = fs::metadata(path).map_err(|e| Error::io(e, path))?;
        let byte_len = metadata.len();
        let (start, total_blocks, tree) = self.place_blocks(byte_len, path)?;

        let mut inode = Inode::new(FILE_PERMISSIONS, self.build_time);
        inode.set_size(byte_len);
        inode.sectors = (total_blocks * super::layout::SECTORS_PER_BLOCK) as u32;
        self.write_inode_pointers(&mut inode, start, &tree);

        self.write_control_blocks(start, &tree);
        self.write_file_data(path, byte_len, start, &tree);

        self.record_inode(this, inode);
        Ok(())
    }

    fn record_inode(&mut self, number: u32, inode: Inode) {
        let index = (number - FIRST_RESERVED_INODE) as usize;
        if index >= self.inodes.len() {
            self.inodes.resize(index + 1, Inode::reserved());
        }
        self.inodes[index] = inode;
    }
}

/// Walks `root` and produces the inode table, directory/file data
/// instructions, and per-group directory counts. `layout` must already be
/// sized for at least [`count_inodes`]`(root) + `[`RESERVED_INODE_COUNT`].
pub fn scan_root(root: &Path, layout: &GroupLayout, build_time: u32) -> Result<ScanResult> {
    let mut walker = Walker {
        layout,
        build_time,
        next_block: 0,
        next_inode: RESERVED_INODE_COUNT + 1,
        inodes: Vec::new(),
        instructions: Vec::new(),
        group_directories: vec![0u32; layout.total_groups as usize],
    };

    // Reserved inodes 1, 3..=10 stay blank; inode 2 is the root directory.
    for i in 1..=RESERVED_INODE_COUNT {
        walker.record_inode(i, Inode::reserved());
    }
    walker.scan_dir(root, ROOT_INODE, ROOT_INODE)?;

    Ok(ScanResult {
        inodes: walker.inodes,
        instructions: walker.instructions,
        group_directories: walker.group_directories,
        total_data_blocks: walker.next_block,
    })
}
