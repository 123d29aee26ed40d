//! Loader for the `IndexingResults` sub-file and the small `Auxiliarien`
//! KEY=VALUE header that carries the scan dimensions.
//!
//! `IndexingResults` is a flat run of packed 30-byte records, one per
//! measured scan point, stored in acquisition order (which is not
//! row-major). These structs match version 6 of the indexing results as
//! reported by the archive's `Version` entry; Bruker may change the layout
//! without notice.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::info;

use crate::bruker::frames::FrameDescriptionHeader;
use crate::error::BcfError;

pub const INDEX_RECORD_SIZE: usize = 30;

/// One packed indexing record, little-endian. Euler angles are in radians.
#[derive(Debug, Clone, Copy)]
pub struct IndexResult {
    pub x_index: u16,
    pub y_index: u16,
    pub radon_quality: f32,
    pub detected_bands: u16,
    pub euler1: f32,
    pub euler2: f32,
    pub euler3: f32,
    pub phase: i16,
    pub indexed_bands: u16,
    pub mad: f32,
}

impl IndexResult {
    pub fn from_bytes(raw: &[u8; INDEX_RECORD_SIZE]) -> IndexResult {
        IndexResult {
            x_index: LittleEndian::read_u16(&raw[0..2]),
            y_index: LittleEndian::read_u16(&raw[2..4]),
            radon_quality: LittleEndian::read_f32(&raw[4..8]),
            detected_bands: LittleEndian::read_u16(&raw[8..10]),
            euler1: LittleEndian::read_f32(&raw[10..14]),
            euler2: LittleEndian::read_f32(&raw[14..18]),
            euler3: LittleEndian::read_f32(&raw[18..22]),
            phase: LittleEndian::read_i16(&raw[22..24]),
            indexed_bands: LittleEndian::read_u16(&raw[24..26]),
            mad: LittleEndian::read_f32(&raw[26..30]),
        }
    }
}

/// Per-scan-point arrays produced from `IndexingResults`, plus the scan
/// bounding box. All arrays are sized `map_width * map_height`; grid cells
/// without a record stay zero.
pub struct IndexingResults {
    pub map_width: i32,
    pub map_height: i32,
    /// x,y pairs, 2 entries per point.
    pub positions: Vec<u16>,
    /// phi1, PHI, phi2 in radians, 3 entries per point, already transformed
    /// into the Bunge convention used by the output file.
    pub eulers: Vec<f32>,
    pub radon_quality: Vec<f32>,
    pub detected_bands: Vec<u16>,
    pub phase: Vec<i16>,
    pub indexed_bands: Vec<u16>,
    pub mad: Vec<f32>,
    /// minX, minY, maxX, maxY over all records.
    pub roi: [u16; 4],
    pub measured_points: usize,
}

impl IndexingResults {
    pub fn point_count(&self) -> usize {
        self.map_width as usize * self.map_height as usize
    }
}

/// Read a full record, tolerating arbitrary split reads. Returns the number
/// of bytes obtained: 0 at a clean end of file, otherwise up to the record
/// size.
fn read_record<R: Read>(reader: &mut R, record: &mut [u8; INDEX_RECORD_SIZE]) -> Result<usize, BcfError> {
    let mut filled = 0;
    while filled < INDEX_RECORD_SIZE {
        let n = reader.read(&mut record[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Load `IndexingResults`, dimensioned by the `FrameDescription` header.
///
/// With `reorder` set, each record lands at its grid position
/// `map_width * y + x`; otherwise records keep their on-disk scan order.
pub fn load_indexing_results(
    description_file: &Path,
    results_file: &Path,
    reorder: bool,
) -> Result<IndexingResults, BcfError> {
    let header = FrameDescriptionHeader::read_from_file(description_file)?;
    let num_points = header.width as usize * header.height as usize;

    let mut results = IndexingResults {
        map_width: header.width,
        map_height: header.height,
        positions: vec![0u16; num_points * 2],
        eulers: vec![0f32; num_points * 3],
        radon_quality: vec![0f32; num_points],
        detected_bands: vec![0u16; num_points],
        phase: vec![0i16; num_points],
        indexed_bands: vec![0u16; num_points],
        mad: vec![0f32; num_points],
        roi: [u16::MAX, u16::MAX, u16::MIN, u16::MIN],
        measured_points: 0,
    };

    let mut reader = BufReader::new(File::open(results_file)?);
    let mut raw = [0u8; INDEX_RECORD_SIZE];
    let mut index = 0usize;
    loop {
        match read_record(&mut reader, &mut raw)? {
            0 => break,
            INDEX_RECORD_SIZE => {}
            _ => return Err(BcfError::Truncated("IndexingResults record")),
        }
        let record = IndexResult::from_bytes(&raw);

        if reorder {
            index = header.width as usize * record.y_index as usize + record.x_index as usize;
        }
        if index >= num_points {
            return Err(BcfError::InvalidFormat(
                "more indexing records than scan points",
            ));
        }

        results.roi[0] = results.roi[0].min(record.x_index);
        results.roi[1] = results.roi[1].min(record.y_index);
        results.roi[2] = results.roi[2].max(record.x_index);
        results.roi[3] = results.roi[3].max(record.y_index);

        results.positions[index * 2] = record.x_index;
        results.positions[index * 2 + 1] = record.y_index;

        // Bunge-convention transform; computed in f64 so the stored f32
        // matches the acquisition software's output bit for bit.
        results.eulers[index * 3] = (std::f64::consts::PI - record.euler3 as f64) as f32;
        results.eulers[index * 3 + 1] = record.euler2;
        results.eulers[index * 3 + 2] = (std::f64::consts::PI - record.euler1 as f64) as f32;

        results.radon_quality[index] = record.radon_quality;
        results.detected_bands[index] = record.detected_bands;
        results.phase[index] = record.phase;
        results.indexed_bands[index] = record.indexed_bands;
        results.mad[index] = record.mad;

        results.measured_points += 1;
        index += 1;
    }

    info!(
        "ROI: ({}, {}) -> ({}, {})",
        results.roi[0], results.roi[1], results.roi[2], results.roi[3]
    );
    info!("Total measured points: {}", results.measured_points);
    Ok(results)
}

/// Scan dimensions from the `Auxiliarien` KEY=VALUE text.
#[derive(Debug, Clone, Copy)]
pub struct ScanSizes {
    pub map_width: i32,
    pub map_height: i32,
    pub pattern_width: i32,
    pub pattern_height: i32,
}

/// Parse `Auxiliarien`. The file looks like:
///
/// ```text
/// AcquisitionStep=1
/// MapWidth=512
/// MapHeight=384
/// EBSPWidth=80
/// EBSPHeight=60
/// ```
pub fn read_scan_sizes(path: &Path) -> Result<ScanSizes, BcfError> {
    let contents = std::fs::read(path)?;
    let contents = String::from_utf8_lossy(&contents);

    let mut map_width = None;
    let mut map_height = None;
    let mut pattern_width = None;
    let mut pattern_height = None;
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "MapWidth" => map_width = value.parse().ok(),
                "MapHeight" => map_height = value.parse().ok(),
                "EBSPWidth" => pattern_width = value.parse().ok(),
                "EBSPHeight" => pattern_height = value.parse().ok(),
                _ => {}
            }
        }
    }

    match (map_width, map_height, pattern_width, pattern_height) {
        (Some(map_width), Some(map_height), Some(pattern_width), Some(pattern_height)) => {
            Ok(ScanSizes {
                map_width,
                map_height,
                pattern_width,
                pattern_height,
            })
        }
        _ => Err(BcfError::InvalidFormat(
            "Auxiliarien is missing scan dimensions",
        )),
    }
}
