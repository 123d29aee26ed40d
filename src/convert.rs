//! The converter itself: stages the needed archive entries into a scratch
//! directory next to the input, loads the indexing results, writes the
//! DREAM.3D metadata layout and finally streams the pattern cube.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::bruker::frames::{FrameDataHeader, FrameDescription};
use crate::bruker::indexing::{self, IndexingResults};
use crate::bruker::{files, header, results, sem};
use crate::error::BcfError;
use crate::h5::{self, Group};
use crate::metadata;
use crate::patterns::{self, PatternGeometry};
use crate::sfs::SfsReader;

const FILE_VERSION: i32 = 3;
const MANUFACTURER: &str = "DREAM.3D";
const FORMAT_VERSION: &str = "0.2.0";

const RADIANS_TO_DEGREES: f64 = 57.295779513082323;

/// Converts one `.bcf` archive into one HDF5 file.
pub struct BcfConverter {
    input: PathBuf,
    output: PathBuf,
    reorder: bool,
    flip_patterns: bool,
}

impl BcfConverter {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, output: Q) -> BcfConverter {
        BcfConverter {
            input: input.into(),
            output: output.into(),
            reorder: false,
            flip_patterns: false,
        }
    }

    /// Keep scan order (false, the default) or rewrite every per-point array
    /// into row-major grid order.
    pub fn set_reorder(&mut self, reorder: bool) {
        self.reorder = reorder;
    }

    /// Vertically flip every pattern while streaming.
    pub fn set_flip_patterns(&mut self, flip_patterns: bool) {
        self.flip_patterns = flip_patterns;
    }

    /// Run the conversion. A failed run removes the partially written
    /// output; consumers treat the presence of the `FileVersion` attribute
    /// plus the `EBSD/Data` arrays as the success signal.
    pub fn execute(&self) -> Result<(), BcfError> {
        let result = self.run();
        if result.is_err() {
            if let Err(remove_err) = std::fs::remove_file(&self.output) {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "could not remove partial output {}: {}",
                        self.output.display(),
                        remove_err
                    );
                }
            }
        }
        result
    }

    fn run(&self) -> Result<(), BcfError> {
        let base_name = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or(BcfError::InvalidFormat("input path has no file name"))?;

        // Scratch directory next to the input; removed on every exit path
        // when the guard drops.
        let scratch_parent = self
            .input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}_", base_name))
            .tempdir_in(&scratch_parent)?;
        info!("Using scratch directory: {}", scratch.path().display());

        let archive = SfsReader::open(&self.input)?;
        archive.print_tree();

        let file = h5::create_file(&self.output)?;
        h5::write_scalar_attribute(&file, "FileVersion", FILE_VERSION)?;
        h5::write_string(&file, "Manufacturer", MANUFACTURER)?;
        h5::write_string(&file, "Version", FORMAT_VERSION)?;

        let top_group = h5::create_group(&file, &base_name)?;
        let ebsd_group = h5::create_group(&top_group, "EBSD")?;
        let data_group = h5::create_group(&ebsd_group, "Data")?;
        let header_group = h5::create_group(&ebsd_group, "Header")?;
        let sem_group = h5::create_group(&top_group, sem::SEM)?;

        let description_path =
            self.extract(&archive, scratch.path(), files::FRAME_DESCRIPTION)?;
        let indexing_path = self.extract(&archive, scratch.path(), files::INDEXING_RESULTS)?;
        let auxiliarien_path = self.extract(&archive, scratch.path(), files::AUXILIARIEN)?;

        let sizes = indexing::read_scan_sizes(&auxiliarien_path)?;
        info!(
            "Scan: {}x{} points, {}x{} pattern pixels",
            sizes.map_width, sizes.map_height, sizes.pattern_width, sizes.pattern_height
        );

        let indexed =
            indexing::load_indexing_results(&description_path, &indexing_path, self.reorder)?;
        self.write_point_data(&data_group, &sem_group, &indexed)?;

        // Header block.
        let phase_list_path = self.extract(&archive, scratch.path(), files::PHASE_LIST)?;
        let num_points = indexed.point_count();
        h5::write_scalar(&header_group, header::NCOLS, sizes.map_width)?;
        h5::write_scalar(&header_group, header::NROWS, sizes.map_height)?;
        h5::write_scalar(&header_group, header::NPOINTS, num_points as u64)?;
        h5::write_string(
            &header_group,
            header::ORIGINAL_FILE,
            &self.input.display().to_string(),
        )?;
        h5::write_scalar(&header_group, header::PATTERN_WIDTH, sizes.pattern_width)?;
        h5::write_scalar(&header_group, header::PATTERN_HEIGHT, sizes.pattern_height)?;
        h5::write_string(&header_group, header::GRID_TYPE, header::ISOMETRIC)?;
        h5::write_scalar(&header_group, header::Z_OFFSET, 0.0f64)?;
        metadata::write_phase_information(&header_group, &phase_list_path)?;

        let sem_image_path = self.extract(&archive, scratch.path(), files::SEM_IMAGE)?;
        metadata::write_sem_data(&sem_group, &header_group, &sem_image_path)?;

        let calibration_path = self.extract(&archive, scratch.path(), files::CALIBRATION)?;
        let (pcx, pcy) =
            metadata::write_calibration_data(&sem_group, &header_group, &calibration_path)?;
        h5::write_vector(&data_group, results::PCX, &vec![pcx; num_points])?;
        h5::write_vector(&data_group, results::PCY, &vec![pcy; num_points])?;

        let options_path = self.extract(&archive, scratch.path(), files::AUX_INDEXING_OPTIONS)?;
        metadata::write_aux_indexing_options(&sem_group, &header_group, &options_path)?;

        let camera_path = self.extract(&archive, scratch.path(), files::CAMERA_CONFIGURATION)?;
        let pixel_byte_count = metadata::write_camera_configuration(&header_group, &camera_path)?;

        // The heavyweight part comes last: stage FrameData and stream the
        // pattern cube with the element type the camera reports.
        let frame_data_path = self.extract(&archive, scratch.path(), files::FRAME_DATA)?;
        let description = FrameDescription::load(&description_path)?;
        description.describe();

        let geometry = PatternGeometry {
            map_width: sizes.map_width as usize,
            map_height: sizes.map_height as usize,
            pattern_width: sizes.pattern_width as usize,
            pattern_height: sizes.pattern_height as usize,
        };
        let mut frame_data = BufReader::new(File::open(&frame_data_path)?);
        log_first_pattern_header(&mut frame_data, pixel_byte_count);
        match pixel_byte_count {
            1 => patterns::stream_patterns::<u8, _>(
                &mut frame_data,
                &description.offsets,
                geometry,
                self.flip_patterns,
                &data_group,
            )?,
            2 => patterns::stream_patterns::<u16, _>(
                &mut frame_data,
                &description.offsets,
                geometry,
                self.flip_patterns,
                &data_group,
            )?,
            _ => return Err(BcfError::InvalidFormat("unrecognized camera pixel format")),
        }

        info!("Wrote {}", self.output.display());
        Ok(())
    }

    fn extract(
        &self,
        archive: &SfsReader,
        scratch: &Path,
        entry: &str,
    ) -> Result<PathBuf, BcfError> {
        let sfs_path = format!("{}/{}", files::EBSD_DATA, entry);
        archive.extract_file(scratch, &sfs_path)
    }

    /// All per-scan-point arrays except the pattern cube.
    fn write_point_data(
        &self,
        data_group: &Group,
        sem_group: &Group,
        indexed: &IndexingResults,
    ) -> Result<(), BcfError> {
        let num_points = indexed.point_count();

        let x_beam: Vec<i32> = (0..num_points)
            .map(|i| indexed.positions[i * 2] as i32)
            .collect();
        h5::write_vector(data_group, results::X_BEAM, &x_beam)?;
        h5::write_vector(sem_group, sem::SEM_IX, &x_beam)?;

        let y_beam: Vec<i32> = (0..num_points)
            .map(|i| indexed.positions[i * 2 + 1] as i32)
            .collect();
        h5::write_vector(data_group, results::Y_BEAM, &y_beam)?;
        h5::write_vector(sem_group, sem::SEM_IY, &y_beam)?;

        // One dataset per Euler component, converted to degrees.
        for (component, name) in [results::PHI1, results::PHI, results::PHI2]
            .into_iter()
            .enumerate()
        {
            let degrees: Vec<f32> = (0..num_points)
                .map(|i| (indexed.eulers[i * 3 + component] as f64 * RADIANS_TO_DEGREES) as f32)
                .collect();
            h5::write_vector(data_group, name, &degrees)?;
        }

        h5::write_vector(data_group, results::RADON_QUALITY, &indexed.radon_quality)?;

        let band_count: Vec<i32> = indexed.detected_bands.iter().map(|&v| v as i32).collect();
        h5::write_vector(data_group, results::RADON_BAND_COUNT, &band_count)?;

        let phase: Vec<i32> = indexed.phase.iter().map(|&v| v as i32).collect();
        h5::write_vector(data_group, results::PHASE, &phase)?;

        let indexed_bands: Vec<i32> = indexed.indexed_bands.iter().map(|&v| v as i32).collect();
        h5::write_vector(data_group, results::N_INDEXED_BANDS, &indexed_bands)?;

        h5::write_vector(data_group, results::MAD, &indexed.mad)?;
        Ok(())
    }
}

/// Parse and log the first pattern header, warning when the camera
/// configuration disagrees with what the data stream says.
fn log_first_pattern_header<R: std::io::Read>(frame_data: &mut R, pixel_byte_count: i32) {
    match FrameDataHeader::read_from(frame_data) {
        Ok(first) => {
            info!(
                "Pattern size is W={} H={} bytes_per_pixel={}",
                first.width, first.height, first.bytes_per_pixel
            );
            if first.bytes_per_pixel != pixel_byte_count {
                warn!(
                    "camera configuration reports {} bytes/pixel but FrameData starts with {}",
                    pixel_byte_count, first.bytes_per_pixel
                );
            }
        }
        Err(err) => warn!("could not parse the first FrameData header: {}", err),
    }
}
