//! Read-only access to Bruker's "Single-File-System" (SFS) archive, the
//! container format inside a `.bcf` acquisition file.
//!
//! An SFS archive is divided into fixed-size chunks. Every chunk carries a
//! 32-byte header whose first four bytes hold the index of the next chunk in
//! a multi-chunk payload; the remaining bytes of the header are reserved.
//! The node table (one 512-byte record per contained file or directory) and
//! every file body are stored as such chunk chains, so nothing in the archive
//! is guaranteed to be contiguous.
//!
//! # Known Limitations
//!
//! SFS archives with compression or encryption enabled are rejected.

pub mod node;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info};

use crate::error::BcfError;
pub use node::SfsNode;

pub(crate) const SFS_MAGIC: [u8; 8] = *b"AAMVHFSS";
/// File offset of the f32 format version, immediately followed by the u32 chunk size.
const VERSION_OFFSET: u64 = 0x124;
/// File offset of the tree locator: u32 tree address, u32 item count, u32 chunk count.
const TREE_LOCATOR_OFFSET: u64 = 320;
/// Every chunk starts with a 32-byte header; only the payload after it is usable.
pub(crate) const CHUNK_HEADER_SIZE: u32 = 32;
/// Offset of a chunk's next-chunk field relative to the start of the archive:
/// `chunk_size * index + CHUNK_NEXT_BASE`.
pub(crate) const CHUNK_NEXT_BASE: u64 = 280;
/// Offset of a chunk's payload relative to the start of the archive:
/// `chunk_size * index + CHUNK_PAYLOAD_BASE` (the 280-byte archive preamble
/// plus the 32-byte chunk header).
pub(crate) const CHUNK_PAYLOAD_BASE: u64 = 312;
pub(crate) const NODE_RECORD_SIZE: usize = 512;

/// Parsed SFS archive: header fields plus the fully resolved node tree.
///
/// The tree is an arena of [`SfsNode`] records keyed by their index in the
/// node table; directories hold name → index maps. The archive file handle is
/// kept open for the lifetime of the reader and borrowed immutably whenever a
/// node is materialized.
pub struct SfsReader {
    file: File,
    path: PathBuf,
    archive_len: u64,
    version: f32,
    chunk_size: u32,
    usable_chunk_size: u32,
    nodes: Vec<SfsNode>,
    root_children: BTreeMap<String, usize>,
}

impl SfsReader {
    /// Open an archive and eagerly build the node tree and all chunk-offset
    /// tables. The file is only ever read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SfsReader, BcfError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BcfError::NotFound(path.display().to_string())
            } else {
                BcfError::Io(e)
            }
        })?;
        let archive_len = file.metadata()?.len();

        let mut f = &file;
        let mut magic = [0u8; 8];
        f.read_exact(&mut magic)
            .map_err(|e| BcfError::from_read(e, "SFS magic"))?;
        if magic != SFS_MAGIC {
            return Err(BcfError::InvalidFormat("bad SFS magic"));
        }

        f.seek(SeekFrom::Start(VERSION_OFFSET))?;
        let version = f
            .read_f32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "SFS version"))?;
        let chunk_size = f
            .read_u32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "SFS chunk size"))?;
        if chunk_size <= CHUNK_HEADER_SIZE {
            return Err(BcfError::InvalidFormat("SFS chunk size too small"));
        }
        let usable_chunk_size = chunk_size - CHUNK_HEADER_SIZE;

        f.seek(SeekFrom::Start(TREE_LOCATOR_OFFSET))?;
        let tree_address = f
            .read_u32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "SFS tree address"))?;
        let num_tree_items = f
            .read_u32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "SFS tree item count"))?;
        // Total chunk count follows but the reader has no use for it.
        let _num_chunks = f
            .read_u32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "SFS chunk count"))?;

        debug!(
            "SFS header: version={} chunk_size={} tree_address={} items={}",
            version, chunk_size, tree_address, num_tree_items
        );

        let mut reader = SfsReader {
            file,
            path,
            archive_len,
            version,
            chunk_size,
            usable_chunk_size,
            nodes: Vec::new(),
            root_children: BTreeMap::new(),
        };

        let raw_tree = reader.read_node_table(tree_address, num_tree_items)?;
        reader.build_tree(&raw_tree, num_tree_items)?;
        reader.resolve_chunk_tables()?;
        reader.check_plain_container()?;

        Ok(reader)
    }

    pub fn version(&self) -> f32 {
        self.version
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn usable_chunk_size(&self) -> u32 {
        self.usable_chunk_size
    }

    pub fn input_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn archive(&self) -> &File {
        &self.file
    }

    /// Entries at the root of the archive, name → node index.
    pub fn root_children(&self) -> &BTreeMap<String, usize> {
        &self.root_children
    }

    pub fn node(&self, index: usize) -> &SfsNode {
        &self.nodes[index]
    }

    /// Walk the tree along a `/`-separated archive path.
    pub fn lookup(&self, sfs_path: &str) -> Option<&SfsNode> {
        let mut children = &self.root_children;
        let mut found: Option<&SfsNode> = None;
        for part in sfs_path.split('/').filter(|p| !p.is_empty()) {
            let index = *children.get(part)?;
            let node = &self.nodes[index];
            children = &node.children;
            found = Some(node);
        }
        found
    }

    pub fn file_exists(&self, sfs_path: &str) -> bool {
        self.lookup(sfs_path).is_some()
    }

    /// Extract one archive entry below `output_dir`, recreating the archive's
    /// directory layout, and return the path of the written file.
    pub fn extract_file(&self, output_dir: &Path, sfs_path: &str) -> Result<PathBuf, BcfError> {
        let node = self
            .lookup(sfs_path)
            .ok_or_else(|| BcfError::MissingSubfile(sfs_path.to_string()))?;
        if node.is_directory {
            return Err(BcfError::InvalidFormat("archive entry is a directory"));
        }
        let dest = output_dir.join(sfs_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        node.extract_to(self, &dest)?;
        Ok(dest)
    }

    /// Extract the whole archive below `output_dir`.
    pub fn extract_all(&self, output_dir: &Path) -> Result<(), BcfError> {
        fs::create_dir_all(output_dir)?;
        self.extract_children(output_dir, &self.root_children)
    }

    fn extract_children(
        &self,
        dir: &Path,
        children: &BTreeMap<String, usize>,
    ) -> Result<(), BcfError> {
        for (name, &index) in children {
            let node = &self.nodes[index];
            let dest = dir.join(name);
            if node.is_directory {
                fs::create_dir_all(&dest)?;
                self.extract_children(&dest, &node.children)?;
            } else {
                info!("Saving file: {}", dest.display());
                node.extract_to(self, &dest)?;
            }
        }
        Ok(())
    }

    /// Dump the node tree through the `log` facade.
    pub fn print_tree(&self) {
        self.print_children(0, &self.root_children);
    }

    fn print_children(&self, level: usize, children: &BTreeMap<String, usize>) {
        for (name, &index) in children {
            let node = &self.nodes[index];
            if node.is_directory {
                debug!("{:indent$}{}/", "", name, indent = level * 2);
                self.print_children(level + 1, &node.children);
            } else {
                debug!("{:indent$}{}: {}", "", name, node.file_size, indent = level * 2);
            }
        }
    }

    /// Absolute byte offset of a chunk's payload.
    pub(crate) fn chunk_payload_offset(&self, chunk_index: u32) -> u64 {
        self.chunk_size as u64 * chunk_index as u64 + CHUNK_PAYLOAD_BASE
    }

    fn check_chunk_in_bounds(&self, chunk_index: u32) -> Result<(), BcfError> {
        let end = self.chunk_payload_offset(chunk_index) + self.usable_chunk_size as u64;
        if end > self.archive_len {
            return Err(BcfError::CorruptTree("chunk index beyond archive end"));
        }
        Ok(())
    }

    /// Read the raw node table, following the chunk chain when it spans more
    /// than one chunk.
    fn read_node_table(&self, tree_address: u32, num_items: u32) -> Result<Vec<u8>, BcfError> {
        let table_bytes = num_items as usize * NODE_RECORD_SIZE;
        if table_bytes == 0 {
            return Ok(Vec::new());
        }

        // Records never straddle chunks, so the chain length follows from
        // how many whole records fit into one chunk payload.
        let records_per_chunk = self.usable_chunk_size as usize / NODE_RECORD_SIZE;
        if records_per_chunk == 0 {
            return Err(BcfError::InvalidFormat(
                "SFS chunk size too small for node records",
            ));
        }
        let tree_chunks = (num_items as usize + records_per_chunk - 1) / records_per_chunk;

        let mut f = self.archive();
        let mut raw = Vec::with_capacity(table_bytes);
        if tree_chunks == 1 {
            self.check_chunk_in_bounds(tree_address)?;
            f.seek(SeekFrom::Start(self.chunk_payload_offset(tree_address)))?;
            raw.resize(table_bytes, 0);
            f.read_exact(&mut raw)
                .map_err(|e| BcfError::from_read(e, "SFS node table"))?;
        } else {
            let chunk_bytes = records_per_chunk * NODE_RECORD_SIZE;
            let mut address = tree_address;
            let mut buf = vec![0u8; chunk_bytes];
            for _ in 0..tree_chunks {
                self.check_chunk_in_bounds(address)?;
                f.seek(SeekFrom::Start(
                    self.chunk_size as u64 * address as u64 + CHUNK_NEXT_BASE,
                ))?;
                let next = f
                    .read_u32::<LittleEndian>()
                    .map_err(|e| BcfError::from_read(e, "SFS node table chain"))?;
                f.seek(SeekFrom::Current(28))?;
                f.read_exact(&mut buf)
                    .map_err(|e| BcfError::from_read(e, "SFS node table"))?;
                raw.extend_from_slice(&buf);
                address = next;
            }
            raw.truncate(table_bytes);
        }
        Ok(raw)
    }

    /// Parse the 512-byte records and wire up the parent/child arena.
    fn build_tree(&mut self, raw_tree: &[u8], num_items: u32) -> Result<(), BcfError> {
        let num_items = num_items as usize;
        let mut nodes = Vec::with_capacity(num_items);
        for i in 0..num_items {
            let record = &raw_tree[i * NODE_RECORD_SIZE..(i + 1) * NODE_RECORD_SIZE];
            nodes.push(SfsNode::from_record(record));
        }

        // Parent indices must stay inside the table; -1 marks a root entry.
        for node in &nodes {
            if node.parent_index < -1 || node.parent_index >= num_items as i32 {
                return Err(BcfError::CorruptTree("parent index out of range"));
            }
        }
        // A parent chain longer than the table can only mean a cycle.
        for start in 0..num_items {
            let mut current = nodes[start].parent_index;
            let mut steps = 0usize;
            while current != -1 {
                steps += 1;
                if steps > num_items {
                    return Err(BcfError::CorruptTree("cyclic parent link"));
                }
                current = nodes[current as usize].parent_index;
            }
        }

        for index in 0..num_items {
            let name = nodes[index].name.clone();
            match nodes[index].parent_index {
                -1 => {
                    self.root_children.insert(name, index);
                }
                parent => {
                    nodes[parent as usize].children.insert(name, index);
                }
            }
        }

        self.nodes = nodes;
        Ok(())
    }

    fn resolve_chunk_tables(&mut self) -> Result<(), BcfError> {
        for index in 0..self.nodes.len() {
            if self.nodes[index].is_directory {
                continue;
            }
            let offsets = self.resolve_chunk_table(&self.nodes[index])?;
            self.nodes[index].chunk_offsets = offsets;
        }
        Ok(())
    }

    /// Resolve a leaf's ordered chunk-offset table into absolute byte offsets.
    fn resolve_chunk_table(&self, node: &SfsNode) -> Result<Vec<u64>, BcfError> {
        let usable = self.usable_chunk_size as u64;
        let data_chunks = ((node.file_size + usable - 1) / usable) as usize;
        if data_chunks == 0 {
            return Ok(Vec::new());
        }

        // Number of chunks needed to hold `data_chunks` u32 indices.
        let indices_per_chunk = self.usable_chunk_size as usize / 4;
        let table_chunks = (data_chunks + indices_per_chunk - 1) / indices_per_chunk;

        let mut f = self.archive();
        let mut raw = vec![0u8; table_chunks * self.usable_chunk_size as usize];
        if table_chunks == 1 {
            self.check_chunk_in_bounds(node.pointer_table_init)?;
            f.seek(SeekFrom::Start(
                self.chunk_payload_offset(node.pointer_table_init),
            ))?;
            f.read_exact(&mut raw)
                .map_err(|e| BcfError::from_read(e, "SFS chunk table"))?;
        } else {
            let mut address = node.pointer_table_init;
            for i in 0..table_chunks {
                self.check_chunk_in_bounds(address)?;
                f.seek(SeekFrom::Start(
                    self.chunk_size as u64 * address as u64 + CHUNK_NEXT_BASE,
                ))?;
                let next = f
                    .read_u32::<LittleEndian>()
                    .map_err(|e| BcfError::from_read(e, "SFS chunk table chain"))?;
                f.seek(SeekFrom::Current(28))?;
                let start = i * self.usable_chunk_size as usize;
                f.read_exact(&mut raw[start..start + self.usable_chunk_size as usize])
                    .map_err(|e| BcfError::from_read(e, "SFS chunk table"))?;
                address = next;
            }
        }

        let mut offsets = Vec::with_capacity(data_chunks);
        for i in 0..data_chunks {
            let chunk_index = LittleEndian::read_u32(&raw[i * 4..i * 4 + 4]);
            self.check_chunk_in_bounds(chunk_index)?;
            offsets.push(self.chunk_payload_offset(chunk_index));
        }
        Ok(offsets)
    }

    /// Best-effort rejection of compressed/encrypted archives: the `Version`
    /// entry of a plain archive materializes to readable text.
    fn check_plain_container(&self) -> Result<(), BcfError> {
        if let Some(&index) = self.root_children.get("Version") {
            let node = &self.nodes[index];
            if !node.is_directory {
                let bytes = node.read_to_memory(self)?;
                if !is_plain_text(&bytes) {
                    return Err(BcfError::Unsupported(
                        "archive appears to be compressed or encrypted",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Accepts ASCII text and UTF-16LE text (with or without a BOM).
fn is_plain_text(bytes: &[u8]) -> bool {
    fn ascii(b: u8) -> bool {
        b == b'\t' || b == b'\n' || b == b'\r' || (0x20..0x7f).contains(&b)
    }
    if bytes.is_empty() {
        return true;
    }
    if bytes.iter().all(|&b| ascii(b)) {
        return true;
    }
    let utf16 = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
    utf16.len() % 2 == 0 && utf16.chunks_exact(2).all(|p| ascii(p[0]) && p[1] == 0)
}
