//! A single entry of the SFS node table and its materialization logic.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::BcfError;
use crate::sfs::SfsReader;

/// One 512-byte node record: a file or directory inside the archive.
///
/// Leaves additionally carry their resolved chunk-offset table (absolute byte
/// offsets of every data chunk payload, in file order); directories carry a
/// name → node-index map of their children.
pub struct SfsNode {
    pub(crate) pointer_table_init: u32,
    pub file_size: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub last_access_time: u64,
    pub permissions: u32,
    pub parent_index: i32,
    pub is_directory: bool,
    pub name: String,
    pub(crate) chunk_offsets: Vec<u64>,
    pub(crate) children: BTreeMap<String, usize>,
}

impl SfsNode {
    /// Parse a raw 512-byte table record. Layout: u32 chunk-table start,
    /// u64 file size, three u64 timestamps, u32 permissions, i32 parent
    /// index, 176 reserved bytes, u8 directory flag, 3 reserved bytes,
    /// 256-byte null-terminated name, 32 reserved bytes.
    pub(crate) fn from_record(record: &[u8]) -> SfsNode {
        let name_field = &record[224..480];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(name_field.len());
        let name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        SfsNode {
            pointer_table_init: LittleEndian::read_u32(&record[0..4]),
            file_size: LittleEndian::read_u64(&record[4..12]),
            creation_time: LittleEndian::read_u64(&record[12..20]),
            modification_time: LittleEndian::read_u64(&record[20..28]),
            last_access_time: LittleEndian::read_u64(&record[28..36]),
            permissions: LittleEndian::read_u32(&record[36..40]),
            parent_index: LittleEndian::read_i32(&record[40..44]),
            is_directory: record[220] != 0,
            name,
            chunk_offsets: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    /// Number of data chunks backing this leaf.
    pub fn chunk_count(&self) -> usize {
        self.chunk_offsets.len()
    }

    pub fn children(&self) -> &BTreeMap<String, usize> {
        &self.children
    }

    /// Materialize the whole entry into memory. Returns exactly
    /// `file_size` bytes.
    pub fn read_to_memory(&self, reader: &SfsReader) -> Result<Vec<u8>, BcfError> {
        if self.is_directory {
            return Err(BcfError::InvalidFormat("cannot materialize a directory"));
        }
        let mut data = Vec::with_capacity(self.file_size as usize);
        gather_chunks(
            reader.archive(),
            &self.chunk_offsets,
            reader.usable_chunk_size(),
            self.file_size,
            &mut data,
        )?;
        Ok(data)
    }

    /// Stream the entry to `dest`, writing exactly `file_size` bytes.
    pub fn extract_to(&self, reader: &SfsReader, dest: &Path) -> Result<(), BcfError> {
        if self.is_directory {
            return Err(BcfError::InvalidFormat("cannot materialize a directory"));
        }
        debug!(
            "extracting '{}' ({} bytes, {} chunks) to {}",
            self.name,
            self.file_size,
            self.chunk_offsets.len(),
            dest.display()
        );
        let mut out = BufWriter::new(File::create(dest)?);
        gather_chunks(
            reader.archive(),
            &self.chunk_offsets,
            reader.usable_chunk_size(),
            self.file_size,
            &mut out,
        )?;
        out.flush()?;
        Ok(())
    }
}

/// Gather a leaf's scattered data chunks in table order into `sink`.
///
/// Every chunk contributes a full `usable_chunk_size` bytes except the last,
/// which is trimmed to the remaining file size.
pub(crate) fn gather_chunks<R: Read + Seek, W: Write>(
    mut src: R,
    chunk_offsets: &[u64],
    usable_chunk_size: u32,
    file_size: u64,
    sink: &mut W,
) -> Result<(), BcfError> {
    let mut remaining = file_size;
    let mut buf = vec![0u8; usable_chunk_size as usize];
    for &offset in chunk_offsets {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(usable_chunk_size as u64) as usize;
        src.seek(SeekFrom::Start(offset))?;
        src.read_exact(&mut buf[..take])
            .map_err(|e| BcfError::from_read(e, "SFS data chunk"))?;
        sink.write_all(&buf[..take])?;
        remaining -= take as u64;
    }
    if remaining != 0 {
        return Err(BcfError::Truncated("SFS chunk-offset table"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CHUNK_SIZE: u64 = 64;
    const USABLE: u32 = 32;
    const PAYLOAD_BASE: u64 = 312;

    /// Lay out `content` over the given chunk indices of a synthetic archive
    /// body with 64-byte chunks.
    fn archive_with_chunks(chunk_indices: &[u32], content: &[u8]) -> Vec<u8> {
        let max_index = *chunk_indices.iter().max().unwrap() as u64;
        let mut raw = vec![0u8; (280 + (max_index + 1) * CHUNK_SIZE) as usize];
        for (i, chunk) in content.chunks(USABLE as usize).enumerate() {
            let start = (CHUNK_SIZE * chunk_indices[i] as u64 + PAYLOAD_BASE) as usize;
            raw[start..start + chunk.len()].copy_from_slice(chunk);
        }
        raw
    }

    #[test]
    fn gathers_non_contiguous_chunks_in_table_order() {
        // 100 bytes over four 32-byte chunks stored out of order; the last
        // chunk contributes exactly 4 bytes.
        let content: Vec<u8> = (0..100u8).collect();
        let chunk_indices = [5u32, 7, 6, 9];
        let raw = archive_with_chunks(&chunk_indices, &content);

        let offsets: Vec<u64> = chunk_indices
            .iter()
            .map(|&c| CHUNK_SIZE * c as u64 + PAYLOAD_BASE)
            .collect();

        let mut out = Vec::new();
        gather_chunks(Cursor::new(&raw), &offsets, USABLE, 100, &mut out).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn short_table_reports_truncation() {
        let content: Vec<u8> = (0..100u8).collect();
        let raw = archive_with_chunks(&[5, 7, 6, 9], &content);
        // Only three chunks resolved for a 100-byte file.
        let offsets: Vec<u64> = [5u32, 7, 6]
            .iter()
            .map(|&c| CHUNK_SIZE * c as u64 + PAYLOAD_BASE)
            .collect();
        let mut out = Vec::new();
        let err = gather_chunks(Cursor::new(&raw), &offsets, USABLE, 100, &mut out).unwrap_err();
        assert!(matches!(err, BcfError::Truncated(_)));
    }

    #[test]
    fn node_record_round_trip() {
        let mut record = [0u8; 512];
        LittleEndian::write_u32(&mut record[0..4], 42);
        LittleEndian::write_u64(&mut record[4..12], 123_456);
        LittleEndian::write_u32(&mut record[36..40], 0o644);
        LittleEndian::write_i32(&mut record[40..44], 3);
        record[220] = 0;
        record[224..224 + 9].copy_from_slice(b"FrameData");

        let node = SfsNode::from_record(&record);
        assert_eq!(node.pointer_table_init, 42);
        assert_eq!(node.file_size, 123_456);
        assert_eq!(node.permissions, 0o644);
        assert_eq!(node.parent_index, 3);
        assert!(!node.is_directory);
        assert_eq!(node.name, "FrameData");
    }
}
