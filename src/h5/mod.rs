//! Thin facade over the `hdf5` crate.
//!
//! Everything the converter writes goes through these helpers, so the rest
//! of the crate never spells out dataspace/builder details and the
//! underlying library could be swapped behind this one module. All handles
//! (file, groups, datasets, attributes) close on drop.

use hdf5::types::VarLenUnicode;
use hdf5::{Extent, H5Type};
use ndarray::{s, ArrayView2, ArrayView3};

use crate::error::BcfError;

pub use hdf5::{Dataset, File, Group};

/// Create (truncate) an output file.
pub fn create_file(path: &std::path::Path) -> Result<File, BcfError> {
    Ok(File::create(path)?)
}

pub fn create_group(parent: &Group, name: &str) -> Result<Group, BcfError> {
    Ok(parent.create_group(name)?)
}

pub fn write_scalar<T: H5Type>(parent: &Group, name: &str, value: T) -> Result<(), BcfError> {
    let dataset = parent.new_dataset::<T>().create(name)?;
    dataset.write_scalar(&value)?;
    Ok(())
}

pub fn write_string(parent: &Group, name: &str, value: &str) -> Result<(), BcfError> {
    let dataset = parent.new_dataset::<VarLenUnicode>().create(name)?;
    dataset.write_scalar(&to_h5_string(value)?)?;
    Ok(())
}

/// Attach a string attribute to an existing dataset of `parent`.
pub fn write_string_attribute(
    parent: &Group,
    dataset_name: &str,
    attr_name: &str,
    value: &str,
) -> Result<(), BcfError> {
    let dataset = parent.dataset(dataset_name)?;
    let attr = dataset.new_attr::<VarLenUnicode>().create(attr_name)?;
    attr.write_scalar(&to_h5_string(value)?)?;
    Ok(())
}

/// Attach a scalar attribute directly to a group (or the file root).
pub fn write_scalar_attribute<T: H5Type>(
    location: &Group,
    attr_name: &str,
    value: T,
) -> Result<(), BcfError> {
    let attr = location.new_attr::<T>().create(attr_name)?;
    attr.write_scalar(&value)?;
    Ok(())
}

/// Write a one-dimensional dataset from a slice.
pub fn write_vector<T: H5Type>(parent: &Group, name: &str, data: &[T]) -> Result<(), BcfError> {
    let dataset = parent.new_dataset::<T>().shape(data.len()).create(name)?;
    dataset.write(data)?;
    Ok(())
}

/// Write a two-dimensional dataset from a row-major slice.
pub fn write_matrix<T: H5Type>(
    parent: &Group,
    name: &str,
    rows: usize,
    cols: usize,
    data: &[T],
) -> Result<(), BcfError> {
    let view = ArrayView2::from_shape((rows, cols), data)
        .map_err(|_| BcfError::InvalidFormat("matrix dimensions do not match data length"))?;
    let dataset = parent.new_dataset::<T>().shape((rows, cols)).create(name)?;
    dataset.write(view)?;
    Ok(())
}

/// Create a 3-D chunked dataset that can grow along its first dimension,
/// filled with zeros where nothing is written.
pub fn create_chunked_extensible<T: H5Type + Default>(
    parent: &Group,
    name: &str,
    initial: [usize; 3],
    max: [usize; 3],
    chunk: [usize; 3],
) -> Result<Dataset, BcfError> {
    let dataset = parent
        .new_dataset::<T>()
        .chunk((chunk[0], chunk[1], chunk[2]))
        .fill_value(T::default())
        .shape((
            Extent::new(initial[0], Some(max[0])),
            Extent::new(initial[1], Some(max[1])),
            Extent::new(initial[2], Some(max[2])),
        ))
        .create(name)?;
    Ok(dataset)
}

/// Grow an extensible dataset to `dims`.
pub fn extend(dataset: &Dataset, dims: [usize; 3]) -> Result<(), BcfError> {
    dataset.resize((dims[0], dims[1], dims[2]))?;
    Ok(())
}

/// Write one hyperslab of shape `count` starting at `[offset, 0, 0]`.
pub fn write_slab<T: H5Type>(
    dataset: &Dataset,
    offset: usize,
    count: [usize; 3],
    data: &[T],
) -> Result<(), BcfError> {
    let view = ArrayView3::from_shape((count[0], count[1], count[2]), data)
        .map_err(|_| BcfError::InvalidFormat("slab dimensions do not match data length"))?;
    dataset.write_slice(view, s![offset..offset + count[0], .., ..])?;
    Ok(())
}

fn to_h5_string(value: &str) -> Result<VarLenUnicode, BcfError> {
    // Interior nulls cannot be represented in a C-style HDF5 string.
    let cleaned: String = value.chars().filter(|&c| c != '\0').collect();
    cleaned
        .parse::<VarLenUnicode>()
        .map_err(|_| BcfError::InvalidFormat("string is not valid for HDF5"))
}
