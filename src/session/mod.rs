//! Session management
//!
//! Tracks which authenticated user owns which chat connection.

pub mod registry;

pub use registry::{ConnectionId, SessionRegistry};
