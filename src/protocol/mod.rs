//! Chat protocol implementation
//!
//! Line framing, command parsing, replies and command handling.

pub mod codec;
pub mod commands;
pub mod handlers;
pub mod responses;

pub use codec::{LineCodec, encode};
pub use commands::{Command, parse_command};
pub use handlers::{CommandResult, CommandStatus, Delivery, DispatchContext, handle_command};
