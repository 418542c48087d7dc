//! Error handlers
//!
//! Maps errors onto the reply line a client sees and decides whether the
//! connection survives the error.

use crate::error::types::{
    AuthError, ChatServerError, ProtocolError, StorageError, TransferError,
};
use crate::protocol::responses;
use log::{error, warn};

/// Log an error at a level matching its severity
pub fn handle_error(err: &ChatServerError) {
    match err {
        ChatServerError::Auth(AuthError::Store(_))
        | ChatServerError::Storage(StorageError::Io(_))
        | ChatServerError::Config(_)
        | ChatServerError::Io(_) => error!("Chat server error: {err}"),
        _ => warn!("{err}"),
    }
}

/// Convert error to the protocol line sent back to the client
pub fn error_reply(err: &ChatServerError) -> &'static str {
    match err {
        ChatServerError::Auth(_) => responses::INVALID_USER,
        ChatServerError::Storage(StorageError::FileNotFound(_)) => responses::FILE_NOT_FOUND,
        ChatServerError::Storage(StorageError::InvalidFilename(_))
        | ChatServerError::Storage(StorageError::PathTraversal(_)) => responses::INVALID_FILE_NAME,
        ChatServerError::Storage(StorageError::UploadInProgress(_)) => {
            responses::UPLOAD_IN_PROGRESS
        }
        ChatServerError::Storage(StorageError::FileTooLarge { .. }) => responses::FILE_TOO_LARGE,
        ChatServerError::Storage(StorageError::Io(_)) => responses::TRANSFER_FAILED,
        ChatServerError::Transfer(TransferError::TimedOut { .. }) => responses::TRANSFER_TIMED_OUT,
        ChatServerError::Transfer(_) => responses::TRANSFER_FAILED,
        ChatServerError::Protocol(ProtocolError::UnknownCommand(_)) => responses::UNKNOWN_COMMAND,
        ChatServerError::Protocol(ProtocolError::MalformedHeader(_)) => {
            responses::MALFORMED_HEADER
        }
        ChatServerError::Protocol(ProtocolError::LineTooLong(_)) => responses::LINE_TOO_LONG,
        ChatServerError::Protocol(ProtocolError::NotLoggedIn) => responses::NOT_LOGGED_IN,
        ChatServerError::Config(_) | ChatServerError::Io(_) => responses::TRANSFER_FAILED,
    }
}

/// Whether the connection is closed after the reply is flushed.
///
/// File connections are single-purpose: once a transfer request fails there
/// is nothing left for them to do. Chat-level errors keep the connection.
pub fn closes_connection(err: &ChatServerError) -> bool {
    matches!(
        err,
        ChatServerError::Storage(_)
            | ChatServerError::Transfer(_)
            | ChatServerError::Protocol(ProtocolError::MalformedHeader(_))
            | ChatServerError::Io(_)
    )
}
