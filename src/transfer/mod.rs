//! File transfer engine
//!
//! Chunked uploads and downloads driven by connection readiness.

pub mod context;
pub mod file_ops;

pub use context::{FileTransferContext, TransferDirection};
pub use file_ops::{Progress, receive_chunk, send_chunk};
