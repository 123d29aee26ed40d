//! Row-by-row streaming of diffraction patterns out of `FrameData` and into
//! a growable, chunked 3-D HDF5 dataset.
//!
//! The pattern cube for a full scan easily reaches tens of gigabytes, so the
//! pipeline never holds more than one row of patterns in memory: a single
//! reusable buffer of `map_width` patterns is filled, the dataset is
//! extended by one row of scan points, and the buffer is written as a
//! hyperslab before the next row starts.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::bruker::frames::{FRAME_DATA_HEADER_SIZE, MISSING_PATTERN};
use crate::bruker::results;
use crate::error::BcfError;
use crate::h5::{self, Group};

/// The two pixel widths Bruker cameras produce. Sealed: the streaming code
/// is only ever instantiated for these.
pub trait PatternPixel: hdf5::H5Type + Copy + Default + sealed::Sealed + 'static {
    const BYTES: usize;

    /// Read `dst.len()` little-endian pixels.
    fn read_pixels<R: Read>(reader: &mut R, dst: &mut [Self]) -> std::io::Result<()>;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
}

impl PatternPixel for u8 {
    const BYTES: usize = 1;

    fn read_pixels<R: Read>(reader: &mut R, dst: &mut [Self]) -> std::io::Result<()> {
        reader.read_exact(dst)
    }
}

impl PatternPixel for u16 {
    const BYTES: usize = 2;

    fn read_pixels<R: Read>(reader: &mut R, dst: &mut [Self]) -> std::io::Result<()> {
        reader.read_u16_into::<LittleEndian>(dst)
    }
}

/// Geometry of the scan grid and of the individual patterns.
#[derive(Debug, Clone, Copy)]
pub struct PatternGeometry {
    pub map_width: usize,
    pub map_height: usize,
    pub pattern_width: usize,
    pub pattern_height: usize,
}

impl PatternGeometry {
    fn pattern_len(&self) -> usize {
        self.pattern_width * self.pattern_height
    }

    fn row_len(&self) -> usize {
        self.map_width * self.pattern_len()
    }
}

/// Stream every pattern into a `RawPatterns` dataset under `data_group`.
///
/// `offsets` is the frame-description array: one `FrameData` byte offset per
/// scan point in row-major grid order, `MISSING_PATTERN` where no pattern
/// was recorded (those slots stay zero-filled). With `flip_patterns` the
/// rows of each pattern are written bottom-up.
///
/// If a pattern read fails mid-row, the remaining columns are zero-filled,
/// the slab for the current row is still written so the dataset stays
/// consistent, and the error is returned.
pub fn stream_patterns<P: PatternPixel, R: Read + Seek>(
    frame_data: &mut R,
    offsets: &[u64],
    geometry: PatternGeometry,
    flip_patterns: bool,
    data_group: &Group,
) -> Result<(), BcfError> {
    let PatternGeometry {
        map_width,
        map_height,
        pattern_width,
        pattern_height,
    } = geometry;
    if offsets.len() < map_width * map_height {
        return Err(BcfError::InvalidFormat(
            "frame description is shorter than the scan grid",
        ));
    }

    let dataset = h5::create_chunked_extensible::<P>(
        data_group,
        results::EBSP,
        [map_width, pattern_height, pattern_width],
        [map_width * map_height, pattern_height, pattern_width],
        [map_width, pattern_height, pattern_width],
    )?;

    let pattern_len = geometry.pattern_len();
    let mut row = vec![P::default(); geometry.row_len()];
    let mut scratch = vec![P::default(); pattern_len];
    let mut failure: Option<BcfError> = None;
    debug!(
        "streaming {} rows of {} patterns ({} bytes per row buffer)",
        map_height,
        map_width,
        row.len() * P::BYTES
    );

    for y in 0..map_height {
        for x in 0..map_width {
            let slot = &mut row[x * pattern_len..(x + 1) * pattern_len];
            let offset = offsets[y * map_width + x];
            if offset == MISSING_PATTERN {
                slot.fill(P::default());
                continue;
            }
            if let Err(err) = read_pattern(
                frame_data,
                offset,
                pattern_width,
                flip_patterns,
                slot,
                &mut scratch,
            ) {
                // Zero the rest of the row; the slab below still gets
                // written so the dataset closes in a consistent state.
                for slot in &mut row[x * pattern_len..] {
                    *slot = P::default();
                }
                failure = Some(err);
                break;
            }
        }

        h5::extend(
            &dataset,
            [map_width * (y + 1), pattern_height, pattern_width],
        )?;
        h5::write_slab(
            &dataset,
            map_width * y,
            [map_width, pattern_height, pattern_width],
            &row,
        )?;
        debug!("wrote pattern row {}/{}", y + 1, map_height);

        if let Some(err) = failure.take() {
            return Err(err);
        }
    }
    Ok(())
}

/// Read one pattern at `offset`, skipping its 25-byte header.
fn read_pattern<P: PatternPixel, R: Read + Seek>(
    frame_data: &mut R,
    offset: u64,
    pattern_width: usize,
    flip: bool,
    dst: &mut [P],
    scratch: &mut [P],
) -> Result<(), BcfError> {
    frame_data.seek(SeekFrom::Start(offset + FRAME_DATA_HEADER_SIZE))?;
    if flip {
        P::read_pixels(frame_data, scratch)
            .map_err(|e| BcfError::from_read(e, "FrameData pattern"))?;
        // Vertical flip: the last source row becomes the first destination
        // row; pixel order within a row is untouched.
        for (dst_row, src_row) in dst
            .chunks_exact_mut(pattern_width)
            .zip(scratch.chunks_exact(pattern_width).rev())
        {
            dst_row.copy_from_slice(src_row);
        }
    } else {
        P::read_pixels(frame_data, dst)
            .map_err(|e| BcfError::from_read(e, "FrameData pattern"))?;
    }
    Ok(())
}
