//! Command handlers module for the chat server.
//!
//! Interprets one parsed [`Command`] from one connection. Handlers never
//! touch sockets: they return a [`CommandResult`] listing the replies for
//! the originating connection, the lines to deliver to other connections,
//! and the state change the multiplexer must apply.

use log::{debug, info};

use crate::config::ServerConfig;
use crate::error::handlers::{closes_connection, error_reply, handle_error};
use crate::error::{ChatServerError, ProtocolError, StorageError};
use crate::protocol::Command;
use crate::protocol::responses;
use crate::session::{ConnectionId, SessionRegistry};
use crate::storage::FileStore;
use crate::transfer::FileTransferContext;

/// Represents the outcome status of executing a command.
#[derive(Debug)]
pub enum CommandStatus {
    Success,
    Failure(String),
    /// The connection is now bound to a session.
    Authenticated,
    /// The connection's session was removed; it may log in again.
    LoggedOut,
    BeginUpload(FileTransferContext),
    BeginDownload(FileTransferContext),
    /// Flush the replies, then close.
    CloseConnection,
}

/// A line addressed to another connection.
#[derive(Debug, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub line: String,
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub replies: Vec<String>,
    pub deliveries: Vec<Delivery>,
}

impl CommandResult {
    fn new(status: CommandStatus) -> Self {
        Self {
            status,
            replies: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    fn reply(mut self, line: impl Into<String>) -> Self {
        self.replies.push(line.into());
        self
    }

    fn from_error(err: impl Into<ChatServerError>) -> Self {
        let err = err.into();
        handle_error(&err);

        let status = if closes_connection(&err) {
            CommandStatus::CloseConnection
        } else {
            CommandStatus::Failure(err.to_string())
        };
        Self::new(status).reply(error_reply(&err))
    }
}

/// Shared state a handler may read or update.
pub struct DispatchContext<'a> {
    pub sessions: &'a mut SessionRegistry,
    pub storage: &'a FileStore,
    pub config: &'a ServerConfig,
}

/// Dispatches a received command to its corresponding handler.
pub fn handle_command(
    ctx: &mut DispatchContext<'_>,
    connection: ConnectionId,
    command: Command,
) -> CommandResult {
    match command {
        Command::Credentials { username, password } => {
            handle_credentials(ctx, connection, &username, &password)
        }
        Command::Logout => handle_logout(ctx, connection),
        Command::Upload { filename, size } => handle_upload(ctx, &filename, size),
        Command::Download { filename } => handle_download(ctx, &filename),
        Command::ListFiles => handle_list(ctx),
        Command::Chat(text) => handle_chat(ctx, connection, &text),
        Command::Unknown(line) => CommandResult::from_error(ProtocolError::UnknownCommand(line)),
        Command::MalformedHeader(line) => {
            CommandResult::from_error(ProtocolError::MalformedHeader(line))
        }
    }
}

/// Logs in, registering unknown usernames on the fly.
///
/// Success is silent; a rejected login leaves the connection open.
fn handle_credentials(
    ctx: &mut DispatchContext<'_>,
    connection: ConnectionId,
    username: &str,
    password: &str,
) -> CommandResult {
    match ctx.sessions.try_login(connection, username, password) {
        Ok(()) => CommandResult::new(CommandStatus::Authenticated),
        Err(e) => CommandResult::from_error(e),
    }
}

fn handle_logout(ctx: &mut DispatchContext<'_>, connection: ConnectionId) -> CommandResult {
    if ctx.sessions.logout(connection).is_none() {
        debug!("Logout from {connection} without a session");
    }
    CommandResult::new(CommandStatus::LoggedOut).reply(responses::LOGGED_OUT)
}

/// Handles an upload header: the connection becomes the receiving end.
fn handle_upload(ctx: &mut DispatchContext<'_>, filename: &str, size: u64) -> CommandResult {
    let max_size = ctx.config.max_upload_size_bytes();
    let (file_path, temp_path) = match ctx.storage.prepare_storage(filename, size, max_size) {
        Ok(paths) => paths,
        Err(e) => return CommandResult::from_error(e),
    };

    match FileTransferContext::upload(filename, size, file_path, temp_path) {
        Ok(transfer) => CommandResult::new(CommandStatus::BeginUpload(transfer)),
        Err(e) => CommandResult::from_error(StorageError::from(e)),
    }
}

/// Handles a download request: header first, then the raw bytes.
fn handle_download(ctx: &mut DispatchContext<'_>, filename: &str) -> CommandResult {
    let path = match ctx.storage.prepare_retrieval(filename) {
        Ok(path) => path,
        Err(e) => return CommandResult::from_error(e),
    };

    match FileTransferContext::download(filename, path) {
        Ok(transfer) => {
            let header = responses::upload_header(filename, transfer.declared_size());
            CommandResult::new(CommandStatus::BeginDownload(transfer)).reply(header)
        }
        Err(e) => CommandResult::from_error(StorageError::from(e)),
    }
}

/// One reply line per shared file; nothing at all for an empty directory.
fn handle_list(ctx: &mut DispatchContext<'_>) -> CommandResult {
    match ctx.storage.list_files() {
        Ok(files) => CommandResult {
            status: CommandStatus::Success,
            replies: files,
            deliveries: Vec::new(),
        },
        Err(e) => CommandResult::from_error(e),
    }
}

/// Sends a chat line to every other active session and confirms the count.
fn handle_chat(ctx: &mut DispatchContext<'_>, connection: ConnectionId, text: &str) -> CommandResult {
    let Some(sender) = ctx.sessions.username_of(connection) else {
        return CommandResult::from_error(ProtocolError::NotLoggedIn);
    };

    let line = responses::chat_line(sender, text);
    let deliveries: Vec<Delivery> = ctx
        .sessions
        .all_active()
        .into_iter()
        .filter(|(_, to)| *to != connection)
        .map(|(_, to)| Delivery {
            to,
            line: line.clone(),
        })
        .collect();

    info!("{} broadcast to {} user(s)", sender, deliveries.len());

    CommandResult {
        status: CommandStatus::Success,
        replies: vec![responses::message_sent(deliveries.len())],
        deliveries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAccountStore;
    use crate::protocol::parse_command;
    use std::fs;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        sessions: SessionRegistry,
        storage: FileStore,
        config: ServerConfig,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            Self {
                sessions: SessionRegistry::new(Box::new(MemoryAccountStore::new())),
                storage: FileStore::open(dir.path()).unwrap(),
                config: ServerConfig::default(),
                dir,
            }
        }

        fn files(&self) -> &Path {
            self.dir.path()
        }

        fn send(&mut self, connection: u64, line: &str) -> CommandResult {
            let connection = ConnectionId::new(connection);
            let authenticated = self.sessions.username_of(connection).is_some();
            let mut ctx = DispatchContext {
                sessions: &mut self.sessions,
                storage: &self.storage,
                config: &self.config,
            };
            handle_command(&mut ctx, connection, parse_command(line, authenticated))
        }
    }

    #[test]
    fn test_login_is_silent_and_rejection_keeps_connection() {
        let mut fx = Fixture::new();

        let result = fx.send(1, "alice:pw1");
        assert!(matches!(result.status, CommandStatus::Authenticated));
        assert!(result.replies.is_empty());

        let result = fx.send(2, "alice:pw1");
        assert!(matches!(result.status, CommandStatus::Failure(_)));
        assert_eq!(result.replies, vec!["Invalid user"]);

        fx.send(1, "*Logout");
        let result = fx.send(2, "alice:wrong");
        assert!(matches!(result.status, CommandStatus::Failure(_)));
        assert_eq!(result.replies, vec!["Invalid user"]);
    }

    #[test]
    fn test_alice_and_bob_scenario() {
        let mut fx = Fixture::new();
        fx.send(1, "alice:pw1");
        fx.send(2, "bob:pw2");

        let result = fx.send(1, "hello");
        assert_eq!(result.replies, vec!["Message sent to users1"]);
        assert_eq!(
            result.deliveries,
            vec![Delivery {
                to: ConnectionId::new(2),
                line: "alice: hello".to_string()
            }]
        );
    }

    #[test]
    fn test_broadcast_reaches_every_other_session() {
        let mut fx = Fixture::new();
        for (id, user) in [(1, "u1"), (2, "u2"), (3, "u3"), (4, "u4")] {
            fx.send(id, &format!("{user}:pw"));
        }
        // Not logged in; never a recipient.
        fx.send(5, "*Get file list");

        let result = fx.send(3, "ping");
        let mut recipients: Vec<u64> = result.deliveries.iter().map(|d| d.to.value()).collect();
        recipients.sort();
        assert_eq!(recipients, vec![1, 2, 4]);
        assert_eq!(result.replies, vec!["Message sent to users3"]);
    }

    #[test]
    fn test_lonely_broadcast_confirms_zero() {
        let mut fx = Fixture::new();
        fx.send(1, "alice:pw1");
        let result = fx.send(1, "anyone?");
        assert!(result.deliveries.is_empty());
        assert_eq!(result.replies, vec!["Message sent to users0"]);
    }

    #[test]
    fn test_chat_requires_login() {
        let mut fx = Fixture::new();
        let result = fx.send(1, "hello");
        assert_eq!(result.replies, vec!["Not logged in"]);
        assert!(result.deliveries.is_empty());
    }

    #[test]
    fn test_logout_allows_new_login() {
        let mut fx = Fixture::new();
        fx.send(1, "alice:pw1");

        let result = fx.send(1, "*Logout");
        assert!(matches!(result.status, CommandStatus::LoggedOut));
        assert_eq!(result.replies, vec!["Server message: You have been logged out!"]);

        assert!(matches!(
            fx.send(1, "bob:pw2").status,
            CommandStatus::Authenticated
        ));
    }

    #[test]
    fn test_list_files() {
        let mut fx = Fixture::new();
        assert!(fx.send(1, "*Get file list").replies.is_empty());

        fs::write(fx.files().join("b.txt"), b"b").unwrap();
        fs::write(fx.files().join("a.txt"), b"a").unwrap();
        assert_eq!(fx.send(1, "*Get file list").replies, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_download_missing_file_closes() {
        let mut fx = Fixture::new();
        let result = fx.send(1, "*File download-ghost.txt");
        assert!(matches!(result.status, CommandStatus::CloseConnection));
        assert_eq!(result.replies, vec!["File not found"]);
        assert!(!fx.files().join("ghost.txt").exists());
    }

    #[test]
    fn test_download_announces_size() {
        let mut fx = Fixture::new();
        fs::write(fx.files().join("notes.txt"), b"hello world").unwrap();

        let result = fx.send(1, "*File download-notes.txt");
        assert_eq!(result.replies, vec!["*File upload-notes.txt-11"]);
        match result.status {
            CommandStatus::BeginDownload(transfer) => {
                assert_eq!(transfer.declared_size(), 11);
                assert_eq!(transfer.transferred(), 0);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_upload_starts_transfer() {
        let mut fx = Fixture::new();
        let result = fx.send(1, "*File upload-photo.png-2048");
        assert!(result.replies.is_empty());
        match result.status {
            CommandStatus::BeginUpload(transfer) => {
                assert_eq!(transfer.declared_size(), 2048);
                assert_eq!(transfer.filename(), "photo.png");
                transfer.abort();
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_upload_rejections_close() {
        let mut fx = Fixture::new();

        let result = fx.send(1, "*File upload-../escape.txt-4");
        assert!(matches!(result.status, CommandStatus::CloseConnection));
        assert_eq!(result.replies, vec!["Invalid file name"]);

        let too_big = fx.config.max_upload_size_bytes() + 1;
        let result = fx.send(1, &format!("*File upload-big.iso-{too_big}"));
        assert!(matches!(result.status, CommandStatus::CloseConnection));
        assert_eq!(result.replies, vec!["File too large"]);

        let result = fx.send(1, "*File upload-nosize");
        assert!(matches!(result.status, CommandStatus::CloseConnection));
        assert_eq!(result.replies, vec!["Malformed file header"]);
    }

    #[test]
    fn test_concurrent_upload_of_same_name_refused() {
        let mut fx = Fixture::new();
        let first = fx.send(1, "*File upload-clip.mov-100");
        assert!(matches!(first.status, CommandStatus::BeginUpload(_)));

        let second = fx.send(2, "*File upload-clip.mov-100");
        assert_eq!(second.replies, vec!["Upload in progress"]);
    }

    #[test]
    fn test_unknown_command() {
        let mut fx = Fixture::new();
        fx.send(1, "alice:pw1");
        let result = fx.send(1, "*Dance");
        assert!(matches!(result.status, CommandStatus::Failure(_)));
        assert_eq!(result.replies, vec!["Unknown command"]);
        assert!(result.deliveries.is_empty());
    }
}
