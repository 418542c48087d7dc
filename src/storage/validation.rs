//! Filename validation
//!
//! Clients address shared files by bare name. Anything that could escape
//! the served directory or collide with an in-flight upload is refused
//! before a path is built.

use crate::error::StorageError;

/// Suffix of the temporary file an upload is written to until it completes.
pub const TEMP_SUFFIX: &str = ".part";

pub const MAX_FILENAME_LENGTH: usize = 255;

/// Validate that a client supplied name is a plain file name
pub fn validate_filename(filename: &str) -> Result<&str, StorageError> {
    if filename.is_empty()
        || filename.len() > MAX_FILENAME_LENGTH
        || filename.trim() != filename
        || filename.contains('\0')
        || filename.ends_with(TEMP_SUFFIX)
    {
        return Err(StorageError::InvalidFilename(filename.to_string()));
    }

    if filename == "." || filename.contains("..") || filename.contains(['/', '\\']) {
        return Err(StorageError::PathTraversal(filename.to_string()));
    }

    Ok(filename)
}
