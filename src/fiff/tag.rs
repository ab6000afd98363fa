//! FIFF tag I/O.
//!
//! On-disk layout of one tag (always big-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  kind : i32  │  type : u32  │  size : i32  │  next : i32 │  ← 16 bytes
//! ├──────────────────────────────────────────────────────────┤
//! │  <size bytes of payload data>                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `next == 0` means the next tag follows immediately (pos + 16 + size),
//! `next > 0` is an absolute byte offset and `next == -1` ends the chain.
use std::io::{Read, Seek, SeekFrom};
use anyhow::{bail, Context, Result};

use super::constants::*;

/// Size of a tag header on disk.
pub const TAG_HEADER_LEN: u64 = 16;

/// Tag header without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub kind: i32,
    pub ftype: u32,   // "type" is a Rust keyword
    pub size: i32,
    pub next: i32,
    pub pos: u64,     // byte offset of the header in the file
}

impl TagHeader {
    /// Byte position of the first payload byte.
    #[inline]
    pub fn data_pos(&self) -> u64 {
        self.pos + TAG_HEADER_LEN
    }

    /// Payload length in bytes (negative sizes read as empty).
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Position of the next tag header, or `None` at the end of the chain.
    pub fn next_pos(&self) -> Option<u64> {
        match self.next {
            FIFFV_NEXT_SEQ => Some(self.data_pos() + self.payload_len() as u64),
            n if n > 0 => Some(n as u64),
            _ => None,
        }
    }

    fn from_bytes(buf: &[u8; 16], pos: u64) -> Self {
        TagHeader {
            kind:  be_i32(&buf[0..4]),
            ftype: be_u32(&buf[4..8]),
            size:  be_i32(&buf[8..12]),
            next:  be_i32(&buf[12..16]),
            pos,
        }
    }
}

/// Read only the 16-byte tag header at the given file position.
pub fn read_tag_header<R: Read + Seek>(reader: &mut R, pos: u64) -> Result<TagHeader> {
    reader.seek(SeekFrom::Start(pos))
        .with_context(|| format!("seek to tag header @ {pos:#x}"))?;
    let mut buf = [0u8; 16];
    reader.read_exact(&mut buf)
        .with_context(|| format!("read tag header @ {pos:#x}"))?;
    Ok(TagHeader::from_bytes(&buf, pos))
}

// ── Payload readers ───────────────────────────────────────────────────────

/// Read a single big-endian i32 payload.
pub fn read_i32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_payload_into(reader, tag, &mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Read an i32 array payload.
pub fn read_i32_array<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<i32>> {
    Ok(read_struct_records(reader, tag, 4)?
        .iter()
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Read a single big-endian f32 payload.
pub fn read_f32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<f32> {
    let mut buf = [0u8; 4];
    read_payload_into(reader, tag, &mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

/// Read a Latin-1 string payload.
pub fn read_string<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<String> {
    let raw = read_raw_bytes(reader, tag)?;
    // ISO-8859-1 maps byte-for-byte onto the first 256 code points.
    Ok(raw.iter().map(|&b| b as char).collect())
}

/// Read the entire payload as raw bytes (struct payloads are parsed later).
pub fn read_raw_bytes<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; tag.payload_len()];
    read_payload_into(reader, tag, &mut buf)?;
    Ok(buf)
}

/// Split a struct-array payload into fixed-size records.
///
/// A single tag may pack several structs back to back (digitizer tags do
/// this in some acquisition software).  Trailing bytes that do not fill a
/// whole record are an error.
pub fn read_struct_records<R: Read + Seek>(
    reader: &mut R,
    tag: &TagHeader,
    record_len: usize,
) -> Result<Vec<Vec<u8>>> {
    let raw = read_raw_bytes(reader, tag)?;
    if raw.len() % record_len != 0 {
        bail!(
            "tag kind {} @ {:#x}: payload of {} bytes is not a multiple of {record_len}",
            tag.kind, tag.pos, raw.len()
        );
    }
    Ok(raw.chunks_exact(record_len).map(<[u8]>::to_vec).collect())
}

// ── Directory tag (FIFFT_DIR_ENTRY_STRUCT) ────────────────────────────────

/// Read a directory of tag headers embedded in a `FIFF_DIR_POINTER` target.
/// Each entry has the layout of a tag header, except that the last field
/// holds the file position of the tag it describes.
pub fn read_directory<R: Read + Seek>(
    reader: &mut R,
    tag: &TagHeader,
) -> Result<Vec<TagHeader>> {
    if tag.ftype != FIFFT_DIR_ENTRY_STRUCT {
        bail!("expected FIFFT_DIR_ENTRY_STRUCT, got {}", tag.ftype);
    }
    let records = read_struct_records(reader, tag, TAG_HEADER_LEN as usize)?;
    Ok(records
        .iter()
        .map(|r| TagHeader {
            kind:  be_i32(&r[0..4]),
            ftype: be_u32(&r[4..8]),
            size:  be_i32(&r[8..12]),
            next:  FIFFV_NEXT_NONE,
            pos:   be_u32(&r[12..16]) as u64,
        })
        .collect())
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn read_payload_into<R: Read + Seek>(reader: &mut R, tag: &TagHeader, buf: &mut [u8]) -> Result<()> {
    reader
        .seek(SeekFrom::Start(tag.data_pos()))
        .with_context(|| format!("seek to tag data @ {:#x}", tag.data_pos()))?;
    reader
        .read_exact(buf)
        .with_context(|| format!("read {} payload bytes of tag kind {}", buf.len(), tag.kind))?;
    Ok(())
}

/// Big-endian i32 from a 4-byte slice.
#[inline]
pub(crate) fn be_i32(b: &[u8]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub(crate) fn be_f32(b: &[u8]) -> f32 {
    f32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
