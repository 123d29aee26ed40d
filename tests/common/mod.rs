//! Builders for synthetic SFS archives, shared by the integration tests.
//!
//! `RawArchive` hands out direct control over chunks for the corner-case
//! tests; `ArchiveComposer` lays out a whole tree of files the way the
//! acquisition software would, computing tree chains and pointer tables.

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};

pub const CHUNK_HEADER_SIZE: usize = 32;
pub const CHUNK_NEXT_BASE: usize = 280;
pub const CHUNK_PAYLOAD_BASE: usize = 312;
pub const NODE_RECORD_SIZE: usize = 512;

/// Low-level archive image with direct chunk access.
pub struct RawArchive {
    pub chunk_size: u32,
    pub data: Vec<u8>,
}

impl RawArchive {
    pub fn new(chunk_size: u32, num_chunks: u32) -> RawArchive {
        let len = 280 + num_chunks as usize * chunk_size as usize;
        let mut data = vec![0u8; len];
        data[..8].copy_from_slice(b"AAMVHFSS");
        LittleEndian::write_f32(&mut data[0x124..0x128], 2.01);
        LittleEndian::write_u32(&mut data[0x128..0x12c], chunk_size);
        RawArchive { chunk_size, data }
    }

    pub fn usable(&self) -> usize {
        self.chunk_size as usize - CHUNK_HEADER_SIZE
    }

    pub fn set_tree(&mut self, tree_address: u32, num_items: u32, num_chunks: u32) {
        LittleEndian::write_u32(&mut self.data[320..324], tree_address);
        LittleEndian::write_u32(&mut self.data[324..328], num_items);
        LittleEndian::write_u32(&mut self.data[328..332], num_chunks);
    }

    pub fn set_next_chunk(&mut self, chunk: u32, next: u32) {
        let at = self.chunk_size as usize * chunk as usize + CHUNK_NEXT_BASE;
        LittleEndian::write_u32(&mut self.data[at..at + 4], next);
    }

    pub fn payload_mut(&mut self, chunk: u32) -> &mut [u8] {
        let start = self.chunk_size as usize * chunk as usize + CHUNK_PAYLOAD_BASE;
        let usable = self.usable();
        &mut self.data[start..start + usable]
    }

    /// Spread `content` over the given data chunks in order.
    pub fn fill_chunks(&mut self, chunks: &[u32], content: &[u8]) {
        let usable = self.usable();
        for (i, piece) in content.chunks(usable).enumerate() {
            self.payload_mut(chunks[i])[..piece.len()].copy_from_slice(piece);
        }
    }

    /// Write a chunk-index table into one table chunk.
    pub fn write_pointer_table(&mut self, table_chunk: u32, indices: &[u32]) {
        let payload = self.payload_mut(table_chunk);
        for (i, &index) in indices.iter().enumerate() {
            LittleEndian::write_u32(&mut payload[i * 4..i * 4 + 4], index);
        }
    }

    /// Place node records into a tree chunk, starting at its payload.
    pub fn write_node_records(&mut self, tree_chunk: u32, records: &[Vec<u8>]) {
        let payload = self.payload_mut(tree_chunk);
        for (i, record) in records.iter().enumerate() {
            payload[i * NODE_RECORD_SIZE..(i + 1) * NODE_RECORD_SIZE].copy_from_slice(record);
        }
    }

    pub fn corrupt_magic(&mut self) {
        self.data[..8].copy_from_slice(b"NOTBRUKR");
    }

    pub fn write_to(&self, path: &std::path::Path) {
        std::fs::write(path, &self.data).unwrap();
    }
}

pub fn node_record(
    pointer_table_init: u32,
    file_size: u64,
    parent: i32,
    is_dir: bool,
    name: &str,
) -> Vec<u8> {
    let mut record = vec![0u8; NODE_RECORD_SIZE];
    LittleEndian::write_u32(&mut record[0..4], pointer_table_init);
    LittleEndian::write_u64(&mut record[4..12], file_size);
    LittleEndian::write_i32(&mut record[40..44], parent);
    record[220] = is_dir as u8;
    record[224..224 + name.len()].copy_from_slice(name.as_bytes());
    record
}

enum Entry {
    Dir { name: String, parent: i32 },
    File { name: String, parent: i32, content: Vec<u8> },
}

/// High-level archive layout: add directories and files, then `build` an
/// image with consistent tree chains and pointer tables.
pub struct ArchiveComposer {
    chunk_size: u32,
    entries: Vec<Entry>,
}

impl ArchiveComposer {
    pub fn new(chunk_size: u32) -> ArchiveComposer {
        assert!(chunk_size as usize >= CHUNK_HEADER_SIZE + NODE_RECORD_SIZE);
        ArchiveComposer {
            chunk_size,
            entries: Vec::new(),
        }
    }

    pub fn add_dir(&mut self, name: &str, parent: i32) -> i32 {
        self.entries.push(Entry::Dir {
            name: name.to_string(),
            parent,
        });
        (self.entries.len() - 1) as i32
    }

    pub fn add_file(&mut self, name: &str, parent: i32, content: &[u8]) -> i32 {
        self.entries.push(Entry::File {
            name: name.to_string(),
            parent,
            content: content.to_vec(),
        });
        (self.entries.len() - 1) as i32
    }

    pub fn build(&self) -> RawArchive {
        let usable = self.chunk_size as usize - CHUNK_HEADER_SIZE;
        let records_per_chunk = usable / NODE_RECORD_SIZE;
        let indices_per_chunk = usable / 4;

        let num_items = self.entries.len();
        // Records never straddle chunks.
        let tree_chunks = (num_items + records_per_chunk - 1) / records_per_chunk;

        // Chunk 0 belongs to the archive header; the tree comes right after,
        // then one run of table + data chunks per file.
        let mut next_chunk = 1u32 + tree_chunks as u32;
        let mut layouts = Vec::new(); // (table_chunks, data_chunks) per entry
        for entry in &self.entries {
            match entry {
                Entry::Dir { .. } => layouts.push((Vec::new(), Vec::new())),
                Entry::File { content, .. } => {
                    let data_count = (content.len() + usable - 1) / usable;
                    let table_count = if data_count == 0 {
                        0
                    } else {
                        (data_count + indices_per_chunk - 1) / indices_per_chunk
                    };
                    let table: Vec<u32> =
                        (next_chunk..next_chunk + table_count as u32).collect();
                    next_chunk += table_count as u32;
                    let data: Vec<u32> = (next_chunk..next_chunk + data_count as u32).collect();
                    next_chunk += data_count as u32;
                    layouts.push((table, data));
                }
            }
        }

        let mut archive = RawArchive::new(self.chunk_size, next_chunk);
        archive.set_tree(1, num_items as u32, next_chunk);

        // Node records, split over the tree chain.
        let records: Vec<Vec<u8>> = self
            .entries
            .iter()
            .zip(&layouts)
            .map(|(entry, (table, _))| match entry {
                Entry::Dir { name, parent } => node_record(0, 0, *parent, true, name),
                Entry::File {
                    name,
                    parent,
                    content,
                } => node_record(
                    table.first().copied().unwrap_or(0),
                    content.len() as u64,
                    *parent,
                    false,
                    name,
                ),
            })
            .collect();
        if tree_chunks == 1 {
            archive.write_node_records(1, &records);
        } else {
            for (i, batch) in records.chunks(records_per_chunk).enumerate() {
                let chunk = 1 + i as u32;
                archive.write_node_records(chunk, batch);
                archive.set_next_chunk(chunk, chunk + 1);
            }
        }

        // Pointer tables and file contents.
        for (entry, (table, data)) in self.entries.iter().zip(&layouts) {
            if let Entry::File { content, .. } = entry {
                for (i, batch) in data.chunks(indices_per_chunk).enumerate() {
                    archive.write_pointer_table(table[i], batch);
                    if i + 1 < table.len() {
                        archive.set_next_chunk(table[i], table[i + 1]);
                    }
                }
                archive.fill_chunks(data, content);
            }
        }

        archive
    }
}
