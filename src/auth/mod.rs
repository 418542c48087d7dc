//! Authentication system
//!
//! Account storage and credential validation.

pub mod accounts;
pub mod validator;

pub use accounts::{AccountStore, FileAccountStore, MemoryAccountStore};
pub use validator::validate_credentials;
