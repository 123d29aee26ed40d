pub mod bruker;
pub mod convert;
pub mod error;
pub mod h5;
pub mod metadata;
pub mod patterns;
pub mod sfs;
pub mod xml;

pub use convert::BcfConverter;
pub use error::BcfError;
pub use sfs::{SfsNode, SfsReader};
