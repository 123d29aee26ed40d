use thiserror::Error;

/// Stable, user-visible error kinds for the converter.
///
/// Every library function reports through this enum; nothing retries I/O.
/// The binaries print the first error and exit non-zero.
#[derive(Error, Debug)]
pub enum BcfError {
    #[error("input file not found: {0}")]
    NotFound(String),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("unsupported SFS variant: {0}")]
    Unsupported(&'static str),
    #[error("truncated read in {0}")]
    Truncated(&'static str),
    #[error("corrupt SFS node tree: {0}")]
    CorruptTree(&'static str),
    #[error("required archive entry missing: {0}")]
    MissingSubfile(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HDF5 write failed: {0}")]
    HdfWrite(#[from] hdf5::Error),
}

impl BcfError {
    /// Collapse a short read into `Truncated`, keeping everything else as `Io`.
    pub(crate) fn from_read(err: std::io::Error, what: &'static str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            BcfError::Truncated(what)
        } else {
            BcfError::Io(err)
        }
    }
}
