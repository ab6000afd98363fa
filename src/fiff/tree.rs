//! FIF block tree.
//!
//! The file is a flat chain of tags; `FIFF_BLOCK_START` / `FIFF_BLOCK_END`
//! pairs nest them into blocks.  [`read_tree`] rebuilds that nesting from a
//! tag directory, resolving each block's kind from its start tag.
use std::io::{Read, Seek};
use anyhow::Result;

use super::constants::*;
use super::tag::{read_directory, read_i32, read_tag_header, TagHeader};

/// One block of the FIF tree.
#[derive(Debug, Default, Clone)]
pub struct Node {
    /// Block kind (e.g. `FIFFB_MEAS`, `FIFFB_HPI_COIL`, …); 0 for the root.
    pub block:    i32,
    /// Non-structural tags directly inside this block.
    pub entries:  Vec<TagHeader>,
    pub children: Vec<Node>,
}

impl Node {
    fn with_kind(block: i32) -> Self {
        Node { block, ..Node::default() }
    }

    /// Depth-first search for the first block of the given kind, this node included.
    pub fn find_block(&self, kind: i32) -> Option<&Node> {
        if self.block == kind {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_block(kind))
    }

    /// Every block of the given kind, in file order.
    pub fn find_blocks(&self, kind: i32) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_blocks(kind, &mut out);
        out
    }

    fn collect_blocks<'a>(&'a self, kind: i32, out: &mut Vec<&'a Node>) {
        if self.block == kind {
            out.push(self);
        }
        for child in &self.children {
            child.collect_blocks(kind, out);
        }
    }

    /// First tag of the given kind in this node's own entries (no recursion).
    pub fn find_tag(&self, kind: i32) -> Option<&TagHeader> {
        self.entries.iter().find(|e| e.kind == kind)
    }
}

/// Build the block tree from a flat directory, reading block kinds from the file.
///
/// Unbalanced files are tolerated: blocks still open at the end of the
/// directory are closed into their parents.
pub fn read_tree<R: Read + Seek>(reader: &mut R, directory: &[TagHeader]) -> Result<Node> {
    let mut stack: Vec<Node> = vec![Node::default()];

    for tag in directory {
        match tag.kind {
            FIFF_BLOCK_START => {
                stack.push(Node::with_kind(read_i32(reader, tag)?));
            }
            FIFF_BLOCK_END if stack.len() > 1 => {
                close_top(&mut stack);
            }
            FIFF_BLOCK_END => {} // stray end tag at root level
            _ => {
                if let Some(node) = stack.last_mut() {
                    node.entries.push(*tag);
                }
            }
        }
    }

    while stack.len() > 1 {
        close_top(&mut stack);
    }
    Ok(stack.pop().unwrap_or_default())
}

fn close_top(stack: &mut Vec<Node>) {
    if let Some(finished) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(finished);
        }
    }
}

/// Read every tag header by following the `next` pointer chain.
pub fn scan_directory<R: Read + Seek>(reader: &mut R) -> Result<Vec<TagHeader>> {
    let mut directory = Vec::new();
    let mut pos = Some(0u64);
    while let Some(p) = pos {
        let tag = read_tag_header(reader, p)?;
        pos = tag.next_pos();
        directory.push(tag);
    }
    Ok(directory)
}

/// Load the tag directory embedded in the file, if there is a usable one.
///
/// The first tag must be `FIFF_FILE_ID` and the second `FIFF_DIR_POINTER`
/// with a positive offset to a `FIFFT_DIR_ENTRY_STRUCT` tag.  Anything else
/// returns `Ok(None)` and the caller falls back to [`scan_directory`].
pub fn try_load_directory<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<TagHeader>>> {
    let id_tag = read_tag_header(reader, 0)?;
    if id_tag.kind != FIFF_FILE_ID {
        return Ok(None);
    }
    let Some(next) = id_tag.next_pos() else {
        return Ok(None);
    };
    let dir_ptr_tag = read_tag_header(reader, next)?;
    if dir_ptr_tag.kind != FIFF_DIR_POINTER {
        return Ok(None);
    }
    let dirpos = read_i32(reader, &dir_ptr_tag)?;
    if dirpos <= 0 {
        return Ok(None);
    }
    let dir_tag = read_tag_header(reader, dirpos as u64)?;
    if dir_tag.ftype != FIFFT_DIR_ENTRY_STRUCT {
        return Ok(None);
    }
    Ok(Some(read_directory(reader, &dir_tag)?))
}
