//! The `FrameDescription` and `FrameData` sub-files.
//!
//! `FrameDescription` maps every scan point to the byte offset of its
//! diffraction pattern inside `FrameData`; a sentinel of all ones marks a
//! scan point that was never measured. `FrameData` itself is a sequence of
//! 25-byte pattern headers each followed by raw pixel bytes, in acquisition
//! order rather than grid order.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use crate::error::BcfError;

/// Offset value meaning "no pattern was recorded at this grid cell".
pub const MISSING_PATTERN: u64 = u64::MAX;
/// Size of the per-pattern header preceding the pixel bytes in `FrameData`.
pub const FRAME_DATA_HEADER_SIZE: u64 = 25;

/// The 12-byte header at the start of `FrameDescription`.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptionHeader {
    pub width: i32,
    pub height: i32,
    pub pattern_count: i32,
}

impl FrameDescriptionHeader {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<FrameDescriptionHeader, BcfError> {
        let width = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "FrameDescription header"))?;
        let height = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "FrameDescription header"))?;
        let pattern_count = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| BcfError::from_read(e, "FrameDescription header"))?;
        if width < 0 || height < 0 || pattern_count < 0 {
            return Err(BcfError::InvalidFormat("negative FrameDescription dimension"));
        }
        Ok(FrameDescriptionHeader {
            width,
            height,
            pattern_count,
        })
    }

    pub fn read_from_file(path: &Path) -> Result<FrameDescriptionHeader, BcfError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

/// The fully loaded scan-point → pattern-offset map.
pub struct FrameDescription {
    pub header: FrameDescriptionHeader,
    /// One offset per scan point; `MISSING_PATTERN` where no pattern exists.
    /// Always parsed as fixed 64-bit values regardless of host word size.
    pub offsets: Vec<u64>,
}

impl FrameDescription {
    pub fn load(path: &Path) -> Result<FrameDescription, BcfError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = FrameDescriptionHeader::read_from(&mut reader)?;
        let mut offsets = vec![0u64; header.pattern_count as usize];
        reader
            .read_u64_into::<LittleEndian>(&mut offsets)
            .map_err(|e| BcfError::from_read(e, "FrameDescription offsets"))?;
        Ok(FrameDescription { header, offsets })
    }

    /// Scan points that actually carry a pattern.
    pub fn measured_points(&self) -> usize {
        self.offsets
            .iter()
            .filter(|&&offset| offset != MISSING_PATTERN)
            .count()
    }

    /// Log a summary of the scan coverage, as an up-front sanity check
    /// before the expensive pattern streaming starts.
    pub fn describe(&self) {
        info!(
            "FrameDescription: {}x{} grid, {} possible points, {} measured",
            self.header.width,
            self.header.height,
            self.header.pattern_count,
            self.measured_points()
        );
    }
}

/// The 25-byte header preceding every pattern in `FrameData`.
#[derive(Debug, Clone, Copy)]
pub struct FrameDataHeader {
    pub x_index: i32,
    pub y_index: i32,
    pub data_size: i32,
    pub width: i32,
    pub height: i32,
    pub bytes_per_pixel: i32,
    pub pixel_format: u8,
}

impl FrameDataHeader {
    pub fn read_from<R: Read>(reader: &mut R) -> Result<FrameDataHeader, BcfError> {
        let mut raw = [0u8; FRAME_DATA_HEADER_SIZE as usize];
        reader
            .read_exact(&mut raw)
            .map_err(|e| BcfError::from_read(e, "FrameData header"))?;
        use byteorder::ByteOrder;
        Ok(FrameDataHeader {
            x_index: LittleEndian::read_i32(&raw[0..4]),
            y_index: LittleEndian::read_i32(&raw[4..8]),
            data_size: LittleEndian::read_i32(&raw[8..12]),
            width: LittleEndian::read_i32(&raw[12..16]),
            height: LittleEndian::read_i32(&raw[16..20]),
            bytes_per_pixel: LittleEndian::read_i32(&raw[20..24]),
            pixel_format: raw[24],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    fn description_bytes(width: i32, height: i32, offsets: &[u64]) -> Vec<u8> {
        let mut raw = vec![0u8; 12 + offsets.len() * 8];
        LittleEndian::write_i32(&mut raw[0..4], width);
        LittleEndian::write_i32(&mut raw[4..8], height);
        LittleEndian::write_i32(&mut raw[8..12], offsets.len() as i32);
        LittleEndian::write_u64_into(offsets, &mut raw[12..]);
        raw
    }

    #[test]
    fn parses_description_header_and_offsets() {
        let raw = description_bytes(2, 2, &[0, MISSING_PATTERN, 1225, MISSING_PATTERN]);
        let mut cursor = Cursor::new(&raw);
        let header = FrameDescriptionHeader::read_from(&mut cursor).unwrap();
        assert_eq!(header.width, 2);
        assert_eq!(header.height, 2);
        assert_eq!(header.pattern_count, 4);

        let mut offsets = vec![0u64; 4];
        cursor.read_u64_into::<LittleEndian>(&mut offsets).unwrap();
        assert_eq!(offsets, [0, MISSING_PATTERN, 1225, MISSING_PATTERN]);
    }

    #[test]
    fn short_header_is_truncated() {
        let mut cursor = Cursor::new(&[0u8; 7][..]);
        let err = FrameDescriptionHeader::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, BcfError::Truncated(_)));
    }

    #[test]
    fn parses_frame_data_header() {
        let mut raw = [0u8; 25];
        LittleEndian::write_i32(&mut raw[0..4], 3);
        LittleEndian::write_i32(&mut raw[4..8], 1);
        LittleEndian::write_i32(&mut raw[8..12], 80 * 60 + 17);
        LittleEndian::write_i32(&mut raw[12..16], 80);
        LittleEndian::write_i32(&mut raw[16..20], 60);
        LittleEndian::write_i32(&mut raw[20..24], 1);
        raw[24] = 0;

        let header = FrameDataHeader::read_from(&mut Cursor::new(&raw[..])).unwrap();
        assert_eq!(header.x_index, 3);
        assert_eq!(header.y_index, 1);
        assert_eq!(header.width, 80);
        assert_eq!(header.height, 60);
        assert_eq!(header.bytes_per_pixel, 1);
    }
}
