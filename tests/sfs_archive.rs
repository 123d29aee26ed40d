//! Container-level scenarios: header validation, tree construction, chunk
//! chains, materialization round-trips and the corrupt-archive rejections.

mod common;

use common::{node_record, ArchiveComposer, RawArchive};

use bcf2hdf5::{BcfError, SfsReader};

const CHUNK_SIZE: u32 = 2048;

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn write_archive(archive: &RawArchive) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.bcf");
    archive.write_to(&path);
    (dir, path)
}

#[test]
fn bad_magic_is_invalid_format() {
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    composer.add_file("Version", -1, b"Version 6");
    let mut archive = composer.build();
    archive.corrupt_magic();
    let (_dir, path) = write_archive(&archive);

    let err = SfsReader::open(&path).unwrap_err();
    assert!(matches!(err, BcfError::InvalidFormat(_)));
}

#[test]
fn missing_input_is_not_found() {
    let err = SfsReader::open("/nonexistent/scan.bcf").unwrap_err();
    assert!(matches!(err, BcfError::NotFound(_)));
}

#[test]
fn tree_lookup_walks_directories() {
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    let ebsd = composer.add_dir("EBSDData", -1);
    composer.add_file("FrameDescription", ebsd, &pattern_bytes(44));
    composer.add_file("Version", -1, b"Version 6");
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    assert_eq!(reader.chunk_size(), CHUNK_SIZE);
    assert_eq!(reader.usable_chunk_size(), CHUNK_SIZE - 32);

    let node = reader.lookup("EBSDData/FrameDescription").unwrap();
    assert_eq!(node.name, "FrameDescription");
    assert_eq!(node.file_size, 44);
    assert!(!node.is_directory);

    assert!(reader.lookup("EBSDData").unwrap().is_directory);
    assert!(reader.lookup("EBSDData/Missing").is_none());
    assert!(reader.lookup("Missing/FrameDescription").is_none());
    assert!(!reader.file_exists(""));
}

#[test]
fn read_and_extract_round_trip() {
    // Three data chunks; the last one is partial.
    let content = pattern_bytes(2 * 2016 + 968);
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    let ebsd = composer.add_dir("EBSDData", -1);
    composer.add_file("FrameData", ebsd, &content);
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    let node = reader.lookup("EBSDData/FrameData").unwrap();
    assert_eq!(node.chunk_count(), 3);

    let in_memory = node.read_to_memory(&reader).unwrap();
    assert_eq!(in_memory.len(), content.len());
    assert_eq!(in_memory, content);

    let out_dir = tempfile::tempdir().unwrap();
    let extracted = reader
        .extract_file(out_dir.path(), "EBSDData/FrameData")
        .unwrap();
    let on_disk = std::fs::read(&extracted).unwrap();
    assert_eq!(on_disk, in_memory);
}

#[test]
fn multi_chunk_node_table_follows_the_chain() {
    // Eleven records at three per chunk forces a three-chunk tree chain.
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    let ebsd = composer.add_dir("EBSDData", -1);
    for i in 0..9 {
        composer.add_file(&format!("File{}", i), ebsd, &pattern_bytes(100 + i));
    }
    composer.add_file("Version", -1, b"Version 6");
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    for i in 0..9 {
        let node = reader.lookup(&format!("EBSDData/File{}", i)).unwrap();
        assert_eq!(node.file_size as usize, 100 + i);
        assert_eq!(node.read_to_memory(&reader).unwrap(), pattern_bytes(100 + i));
    }
}

#[test]
fn multi_chunk_pointer_table_follows_the_chain() {
    // chunk_size 544 keeps the fixture small: 512 usable bytes per chunk and
    // 128 chunk indices per table chunk, so 130 data chunks need a two-chunk
    // pointer table.
    let content = pattern_bytes(130 * 512 - 40);
    let mut composer = ArchiveComposer::new(544);
    composer.add_file("FrameData", -1, &content);
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    let node = reader.lookup("FrameData").unwrap();
    assert_eq!(node.chunk_count(), 130);
    assert_eq!(node.read_to_memory(&reader).unwrap(), content);
}

#[test]
fn parent_index_out_of_range_is_corrupt() {
    let mut archive = RawArchive::new(CHUNK_SIZE, 2);
    archive.set_tree(1, 1, 2);
    let record = node_record(0, 0, 7, true, "Orphan");
    archive.write_node_records(1, &[record]);
    let (_dir, path) = write_archive(&archive);

    let err = SfsReader::open(&path).unwrap_err();
    assert!(matches!(err, BcfError::CorruptTree(_)));
}

#[test]
fn cyclic_parent_link_is_corrupt() {
    let mut archive = RawArchive::new(CHUNK_SIZE, 2);
    archive.set_tree(1, 2, 2);
    let a = node_record(0, 0, 1, true, "A");
    let b = node_record(0, 0, 0, true, "B");
    archive.write_node_records(1, &[a, b]);
    let (_dir, path) = write_archive(&archive);

    let err = SfsReader::open(&path).unwrap_err();
    assert!(matches!(err, BcfError::CorruptTree(_)));
}

#[test]
fn chunk_index_beyond_archive_is_corrupt() {
    let mut archive = RawArchive::new(CHUNK_SIZE, 3);
    archive.set_tree(1, 1, 3);
    // Leaf whose pointer table lives in chunk 2 but references chunk 999.
    let record = node_record(2, 100, -1, false, "FrameData");
    archive.write_node_records(1, &[record]);
    archive.write_pointer_table(2, &[999]);
    let (_dir, path) = write_archive(&archive);

    let err = SfsReader::open(&path).unwrap_err();
    assert!(matches!(err, BcfError::CorruptTree(_)));
}

#[test]
fn binary_version_entry_is_unsupported() {
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    composer.add_file("Version", -1, &[0x1F, 0x8B, 0x08, 0x00, 0x00, 0x99]);
    let (_dir, path) = write_archive(&composer.build());

    let err = SfsReader::open(&path).unwrap_err();
    assert!(matches!(err, BcfError::Unsupported(_)));
}

#[test]
fn missing_entry_reports_missing_subfile() {
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    composer.add_dir("EBSDData", -1);
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let err = reader
        .extract_file(out_dir.path(), "EBSDData/FrameData")
        .unwrap_err();
    assert!(matches!(err, BcfError::MissingSubfile(_)));
}

#[test]
fn extract_all_mirrors_the_tree() {
    let mut composer = ArchiveComposer::new(CHUNK_SIZE);
    let ebsd = composer.add_dir("EBSDData", -1);
    composer.add_file("Auxiliarien", ebsd, b"MapWidth=2\n");
    composer.add_file("Version", -1, b"Version 6");
    let (_dir, path) = write_archive(&composer.build());

    let reader = SfsReader::open(&path).unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    reader.extract_all(out_dir.path()).unwrap();

    assert_eq!(
        std::fs::read(out_dir.path().join("EBSDData/Auxiliarien")).unwrap(),
        b"MapWidth=2\n"
    );
    assert_eq!(
        std::fs::read(out_dir.path().join("Version")).unwrap(),
        b"Version 6"
    );
}
