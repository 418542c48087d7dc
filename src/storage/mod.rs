//! File system storage management
//!
//! The served directory and the filename checks guarding it.

pub mod operations;
pub mod validation;

pub use operations::FileStore;
pub use validation::{TEMP_SUFFIX, validate_filename};
