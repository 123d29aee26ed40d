//! Extraction of the XML metadata sub-files into the output HDF5 layout.
//!
//! Four XML documents ride inside the archive: the SEM image description,
//! the EBSD detector calibration, the auxiliary indexing options and the
//! camera configuration; the phase list is a fifth, structurally richer one.
//! The scalar fields are listed in extraction tables of
//! (XML path, destination dataset, type, default) so the mapping stays in
//! one place; only the SEM image planes and the phase list need structural
//! code.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{info, warn};

use crate::bruker::{header, sem};
use crate::error::BcfError;
use crate::h5::{self, Group};
use crate::xml::XmlElement;

/// Which of the two metadata groups a field lands in.
#[derive(Clone, Copy)]
enum Dest {
    Sem,
    Header,
}

/// Typed extraction with the default used when the element is absent.
#[derive(Clone, Copy)]
enum FieldSpec {
    Str(&'static str),
    I32(i32),
    F32(f32),
    F64(f64),
}

struct ScalarField {
    xml_path: &'static str,
    dataset: &'static str,
    dest: Dest,
    spec: FieldSpec,
}

fn apply_fields(
    instance: &XmlElement,
    sem_group: &Group,
    header_group: &Group,
    fields: &[ScalarField],
) -> Result<(), BcfError> {
    for field in fields {
        let group = match field.dest {
            Dest::Sem => sem_group,
            Dest::Header => header_group,
        };
        match field.spec {
            FieldSpec::Str(default) => {
                let value = instance.str_by_path(field.xml_path, default);
                h5::write_string(group, field.dataset, &value)?;
            }
            FieldSpec::I32(default) => {
                h5::write_scalar(group, field.dataset, instance.i32_by_path(field.xml_path, default))?;
            }
            FieldSpec::F32(default) => {
                h5::write_scalar(group, field.dataset, instance.f32_by_path(field.xml_path, default))?;
            }
            FieldSpec::F64(default) => {
                h5::write_scalar(group, field.dataset, instance.f64_by_path(field.xml_path, default))?;
            }
        }
    }
    Ok(())
}

fn class_instance<'a>(
    root: &'a XmlElement,
    document: &'static str,
) -> Result<&'a XmlElement, BcfError> {
    root.first_by_path(document)
        .and_then(|d| d.first_by_path("ClassInstance"))
        .ok_or(BcfError::InvalidFormat("XML ClassInstance entry not found"))
}

/// SEM image description: acquisition date/time, image geometry and
/// resolution, the Base64-encoded image planes, and the beam conditions.
pub fn write_sem_data(
    sem_group: &Group,
    header_group: &Group,
    sem_file: &Path,
) -> Result<(), BcfError> {
    let root = XmlElement::parse_file(sem_file)?;
    let instance = class_instance(&root, "TRTImageData")?;

    const FIELDS: &[ScalarField] = &[
        ScalarField { xml_path: "Date", dataset: "Date", dest: Dest::Header, spec: FieldSpec::Str("NOT FOUND") },
        ScalarField { xml_path: "Time", dataset: "Time", dest: Dest::Header, spec: FieldSpec::Str("NOT FOUND") },
        ScalarField { xml_path: "Width", dataset: "SEM ImageWidth", dest: Dest::Sem, spec: FieldSpec::I32(-1) },
        ScalarField { xml_path: "Height", dataset: "SEM ImageHeight", dest: Dest::Sem, spec: FieldSpec::I32(-1) },
    ];
    apply_fields(instance, sem_group, header_group, FIELDS)?;
    h5::write_string_attribute(header_group, "Date", "Format (ISO 8601)", "dd.mm.yyyy")?;
    h5::write_string_attribute(header_group, "Time", "Format (ISO 8601)", "hh:mm:ss")?;

    // A calibration of zero would make the step size degenerate.
    let mut x_res = instance.f32_by_path("XCalibration", f32::MAX);
    if x_res == 0.0 {
        x_res = 1.0;
    }
    h5::write_scalar(sem_group, "SEM XResolution", x_res)?;
    h5::write_scalar(header_group, "SEPixelSizeX", x_res)?;
    h5::write_scalar(header_group, "XSTEP", x_res)?;

    let mut y_res = instance.f32_by_path("YCalibration", f32::MAX);
    if y_res == 0.0 {
        y_res = 1.0;
    }
    h5::write_scalar(sem_group, "SEM YResolution", y_res)?;
    h5::write_scalar(header_group, "SEPixelSizeY", y_res)?;
    h5::write_scalar(header_group, "YSTEP", y_res)?;

    let width = instance.i32_by_path("Width", -1);
    let height = instance.i32_by_path("Height", -1);
    let item_size = instance.i32_by_path("ItemSize", -1);
    let plane_count = instance.i32_by_path("PlaneCount", 0);
    for plane in 0..plane_count {
        write_sem_image_plane(
            sem_group,
            header_group,
            instance,
            plane,
            width,
            height,
            item_size,
        )?;
    }

    // Beam conditions live one headered class deeper.
    let mut sem_kv = 0.0f32;
    let mut sem_mag = -1.0f32;
    if let Some(rem_header) = instance.first_by_path("TRTHeaderedClass/ClassInstance") {
        sem_kv = rem_header.f32_by_path("Energy", f32::MAX);
        sem_mag = rem_header.f32_by_path("Magnification", f32::MAX);
    }
    h5::write_scalar(sem_group, "SEM KV", sem_kv)?;
    h5::write_scalar(header_group, "KV", sem_kv)?;
    h5::write_scalar(sem_group, "SEM Magnification", sem_mag)?;
    h5::write_scalar(header_group, "Magnification", sem_mag)?;

    Ok(())
}

/// Decode one `Plane<n>` element and write it, with the HDF5 image
/// attributes, into both the SEM group and the EBSD header group.
fn write_sem_image_plane(
    sem_group: &Group,
    header_group: &Group,
    instance: &XmlElement,
    plane: i32,
    width: i32,
    height: i32,
    item_size: i32,
) -> Result<(), BcfError> {
    let tag = format!("Plane{}", plane);
    let plane_element = match instance.first_by_path(&tag) {
        Some(element) => element,
        None => return Ok(()),
    };
    let encoded: String = plane_element
        .str_by_path("Data", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if encoded.is_empty() {
        return Ok(());
    }
    let decoded = match BASE64.decode(encoded.as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!("SEM image plane {} holds invalid Base64 data, skipping", plane);
            return Ok(());
        }
    };
    let name = plane_element.str_by_path("Name", "NOT FOUND");
    let description = plane_element.str_by_path("Description", "NOT FOUND");

    let rows = height as usize;
    let cols = width as usize;
    let expected = rows * cols * item_size.max(0) as usize;
    if expected == 0 || decoded.len() < expected {
        warn!(
            "SEM image plane {} is {} bytes but {}x{}x{} requires {}, skipping",
            plane,
            decoded.len(),
            width,
            height,
            item_size,
            expected
        );
        return Ok(());
    }

    for group in [sem_group, header_group] {
        match item_size {
            1 => h5::write_matrix::<u8>(group, sem::SEM_IMAGE, rows, cols, &decoded[..expected])?,
            2 => {
                // Reassemble the pixels instead of reinterpreting the raw
                // buffer, so byte order stays explicit.
                let pixels: Vec<u16> = decoded[..expected]
                    .chunks_exact(2)
                    .map(|p| u16::from_le_bytes([p[0], p[1]]))
                    .collect();
                h5::write_matrix::<u16>(group, sem::SEM_IMAGE, rows, cols, &pixels)?;
            }
            _ => {
                warn!("SEM image plane {} has unsupported item size {}", plane, item_size);
                return Ok(());
            }
        }
        h5::write_string_attribute(group, sem::SEM_IMAGE, "CLASS", "IMAGE")?;
        h5::write_string_attribute(group, sem::SEM_IMAGE, "IMAGE_SUBCLASS", "IMAGE_INDEXED")?;
        h5::write_string_attribute(group, sem::SEM_IMAGE, "IMAGE_VERSION", "1.2")?;
        h5::write_string_attribute(group, sem::SEM_IMAGE, "Name", &name)?;
        h5::write_string_attribute(group, sem::SEM_IMAGE, "Description", &description)?;
    }
    Ok(())
}

/// Detector calibration. Returns the pattern-center coordinates so the
/// orchestrator can broadcast them over the scan grid.
pub fn write_calibration_data(
    sem_group: &Group,
    header_group: &Group,
    calibration_file: &Path,
) -> Result<(f32, f32), BcfError> {
    let root = XmlElement::parse_file(calibration_file)?;
    let instance = class_instance(&root, "TEBSDCalibration")?;

    const FIELDS: &[ScalarField] = &[
        ScalarField { xml_path: "WorkingDistance", dataset: "SEM WD", dest: Dest::Sem, spec: FieldSpec::F64(-1.0) },
        ScalarField { xml_path: "WorkingDistance", dataset: "WD", dest: Dest::Header, spec: FieldSpec::F64(-1.0) },
        ScalarField { xml_path: "TopClip", dataset: "TopClip", dest: Dest::Header, spec: FieldSpec::F64(-1.0) },
        ScalarField { xml_path: "PCX", dataset: "PCX", dest: Dest::Header, spec: FieldSpec::F32(-1.0) },
        ScalarField { xml_path: "PCY", dataset: "PCY", dest: Dest::Header, spec: FieldSpec::F32(-1.0) },
        // SampleTilt is deliberately sourced from the ProbeTilt element;
        // Bruker's name for the quantity differs from DREAM.3D's.
        ScalarField { xml_path: "ProbeTilt", dataset: "SampleTilt", dest: Dest::Header, spec: FieldSpec::F32(-1.0) },
    ];
    apply_fields(instance, sem_group, header_group, FIELDS)?;

    let pcx = instance.f32_by_path("PCX", -1.0);
    let pcy = instance.f32_by_path("PCY", -1.0);
    Ok((pcx, pcy))
}

/// Indexing thresholds used during acquisition.
pub fn write_aux_indexing_options(
    sem_group: &Group,
    header_group: &Group,
    options_file: &Path,
) -> Result<(), BcfError> {
    let root = XmlElement::parse_file(options_file)?;
    let instance = class_instance(&root, "TEBSDAuxIndexingOptions")?;

    const FIELDS: &[ScalarField] = &[
        ScalarField { xml_path: "MinIndexedBandCount", dataset: "MinIndexedBands", dest: Dest::Header, spec: FieldSpec::I32(-1) },
        ScalarField { xml_path: "MaxMAD", dataset: "MADMax", dest: Dest::Header, spec: FieldSpec::F64(0.0) },
    ];
    apply_fields(instance, sem_group, header_group, FIELDS)
}

/// Camera configuration. Returns the pattern pixel width in bytes, which
/// selects the element type of the streamed pattern cube.
pub fn write_camera_configuration(
    header_group: &Group,
    camera_file: &Path,
) -> Result<i32, BcfError> {
    let root = XmlElement::parse_file(camera_file)?;
    let instance = class_instance(&root, "TCameraConfiguration")?;

    let pixel_format = instance.str_by_path("PixelFormat", "");
    let pixel_byte_count = match pixel_format.as_str() {
        "Gray8" => 1,
        "Gray16" => 2,
        _ => return Err(BcfError::InvalidFormat("unrecognized camera pixel format")),
    };
    info!("Camera pixel format: {} ({} byte/pixel)", pixel_format, pixel_byte_count);
    h5::write_scalar(header_group, header::PIXEL_BYTE_COUNT, pixel_byte_count)?;
    Ok(pixel_byte_count)
}

/// Phase list: one numbered subgroup per phase under `Phases`, each with
/// name, formula, lattice constants, space group and atom positions.
pub fn write_phase_information(
    header_group: &Group,
    phase_list_file: &Path,
) -> Result<(), BcfError> {
    let phases_group = h5::create_group(header_group, header::PHASES)?;

    let root = XmlElement::parse_file(phase_list_file)?;
    let instance = class_instance(&root, "TEBSDExtPhaseEntryList")?;
    let phase_instances = instance
        .first_by_path("ChildClassInstances")
        .ok_or(BcfError::InvalidFormat("phase list has no ChildClassInstances"))?;

    for (index, phase) in phase_instances.children.iter().enumerate() {
        let group = h5::create_group(&phases_group, &(index + 1).to_string())?;

        let name = phase.attribute("Name").unwrap_or("NOT FOUND");
        h5::write_string(&group, "Name", name)?;

        let entry = match phase.first_by_path("TEBSDPhaseEntry") {
            Some(entry) => entry,
            None => continue,
        };
        h5::write_string(&group, "Formula", &entry.str_by_path("Chem", "NOT FOUND"))?;

        let mut lattice_constants = [0f32; 6];
        if let Some(cell) = entry.first_by_path("Cell") {
            parse_triplet(&cell.str_by_path("Dim", "0.0,0.0,0.0"), &mut lattice_constants[0..3]);
            parse_triplet(&cell.str_by_path("Angles", "0.0,0.0,0.0"), &mut lattice_constants[3..6]);
        }
        h5::write_vector(&group, "LatticeConstants", &lattice_constants)?;

        h5::write_scalar(&group, "Setting", entry.i32_by_path("SE", -1))?;
        h5::write_string(&group, "SpaceGroup", &entry.str_by_path("SG", "NOT FOUND"))?;
        h5::write_scalar(&group, "IT", entry.i32_by_path("IT", -1))?;

        let atoms_group = h5::create_group(&group, "AtomPositions")?;
        let atom_count = entry.i32_by_path("AT", 0);
        for atom in 1..=atom_count {
            let tag = format!("POS{}", atom - 1);
            let position = entry.str_by_path(&tag, "NOT FOUND");
            h5::write_string(&atoms_group, &atom.to_string(), &position)?;
        }
    }
    Ok(())
}

/// Parse up to three comma-separated floats into `out`.
fn parse_triplet(line: &str, out: &mut [f32]) {
    for (slot, token) in out.iter_mut().zip(line.split(',')) {
        *slot = token.trim().parse().unwrap_or(0.0);
    }
}
