//! Protocol replies
//!
//! Fixed reply lines and the formatters for the few that carry data. Lines
//! are stored without their terminator; the codec appends it.

pub const INVALID_USER: &str = "Invalid user";
pub const FILE_NOT_FOUND: &str = "File not found";
pub const LOGGED_OUT: &str = "Server message: You have been logged out!";
pub const NOT_LOGGED_IN: &str = "Not logged in";
pub const UNKNOWN_COMMAND: &str = "Unknown command";
pub const LINE_TOO_LONG: &str = "Line too long";
pub const MALFORMED_HEADER: &str = "Malformed file header";
pub const INVALID_FILE_NAME: &str = "Invalid file name";
pub const FILE_TOO_LARGE: &str = "File too large";
pub const UPLOAD_IN_PROGRESS: &str = "Upload in progress";
pub const TRANSFER_FAILED: &str = "Transfer failed";
pub const TRANSFER_TIMED_OUT: &str = "Transfer timed out";
pub const TOO_MANY_CONNECTIONS: &str = "Too many connections";

const MESSAGE_SENT: &str = "Message sent to users";

/// Confirmation sent to the author of a broadcast
pub fn message_sent(recipients: usize) -> String {
    format!("{MESSAGE_SENT}{recipients}")
}

/// A chat line as seen by the other users
pub fn chat_line(sender: &str, text: &str) -> String {
    format!("{sender}: {text}")
}

/// Header announcing the raw file bytes that follow it
pub fn upload_header(filename: &str, size: u64) -> String {
    format!("{}{filename}-{size}", super::commands::FILE_UPLOAD_PREFIX)
}
