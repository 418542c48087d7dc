//! Server core functionality
//!
//! The single-threaded connection multiplexer and the per-connection state
//! it drives.

pub mod connection;
pub mod core;
pub mod shutdown;

pub use connection::{Connection, ConnectionState};
pub use core::Server;
pub use shutdown::ShutdownHandle;
