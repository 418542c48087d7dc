//! Error types
//!
//! Defines domain-specific error types for each module of the chat server.

use std::io;
use thiserror::Error;

/// Authentication module errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed credentials")]
    MalformedCredentials,

    #[error("Invalid password for user: {0}")]
    BadCredentials(String),

    #[error("User already logged in: {0}")]
    AlreadyLoggedIn(String),

    #[error("Account store unavailable: {0}")]
    Store(#[source] io::Error),
}

/// Storage module errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidFilename(String),

    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("Upload already in progress: {0}")]
    UploadInProgress(String),

    #[error("File too large: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Transfer module errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer of {filename} timed out after {transferred}/{declared} bytes")]
    TimedOut {
        filename: String,
        transferred: u64,
        declared: u64,
    },

    #[error("Peer closed during transfer of {filename} at {transferred}/{declared} bytes")]
    PeerClosed {
        filename: String,
        transferred: u64,
        declared: u64,
    },

    #[error("Transfer failed: {0}")]
    Io(#[from] io::Error),
}

/// Protocol module errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed file header: {0}")]
    MalformedHeader(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Not logged in")]
    NotLoggedIn,
}

/// General chat server error that encompasses all error types
#[derive(Debug, Error)]
pub enum ChatServerError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
