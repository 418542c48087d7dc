//! Connection multiplexer
//!
//! One task owns the listener, every connection, the session registry and
//! the file store. It waits on readiness for all sockets at once and only
//! ever performs non-blocking I/O, so a slow peer never stalls the others.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::{Future, poll_fn};
use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, MissedTickBehavior};

use crate::auth::AccountStore;
use crate::config::ServerConfig;
use crate::error::handlers::{error_reply, handle_error};
use crate::error::{ChatServerError, TransferError};
use crate::protocol::{
    CommandStatus, Delivery, DispatchContext, encode, handle_command, parse_command, responses,
};
use crate::server::ShutdownHandle;
use crate::server::connection::{Connection, ConnectionState, ReadStatus, Readiness};
use crate::session::{ConnectionId, SessionRegistry};
use crate::storage::FileStore;
use crate::transfer::{Progress, TransferDirection};

/// Why a connection leaves the table.
#[derive(Debug, Error)]
enum Disconnect {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("closed after final reply")]
    Requested,

    #[error("file transfer finished")]
    TransferDone,

    #[error("output queue exceeded {0} bytes")]
    SlowConsumer(usize),

    #[error("idle timeout")]
    Idle,

    #[error("server shutting down")]
    Shutdown,

    #[error(transparent)]
    Failed(#[from] ChatServerError),
}

impl From<io::Error> for Disconnect {
    fn from(e: io::Error) -> Self {
        Disconnect::Failed(e.into())
    }
}

impl From<TransferError> for Disconnect {
    fn from(e: TransferError) -> Self {
        Disconnect::Failed(e.into())
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    storage: FileStore,
    sessions: SessionRegistry,
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: u64,
    scratch: Vec<u8>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Validates the configuration, prepares the shared directory and binds
    /// the listener.
    pub async fn bind(
        config: ServerConfig,
        accounts: Box<dyn AccountStore + Send>,
    ) -> Result<Self, ChatServerError> {
        config.validate()?;

        let storage = FileStore::open(config.files_dir_path())?;
        info!("Shared files directory: {}", storage.root().display());

        let listener = TcpListener::bind(config.listen_addr()?).await?;
        let local_addr = listener.local_addr()?;
        info!("Server bound to {local_addr}");

        Ok(Self {
            listener,
            local_addr,
            scratch: vec![0; config.chunk_size],
            config,
            storage,
            sessions: SessionRegistry::new(accounts),
            connections: HashMap::new(),
            next_connection_id: 1,
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves until a shutdown is requested, then closes every connection.
    pub async fn run(mut self) {
        info!(
            "Starting chat server on {} (max {} connections)",
            self.local_addr, self.config.max_connections
        );

        let mut sweep = time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => self.admit(accepted),
                events = next_ready(&self.connections) => self.dispatch(events),
                _ = sweep.tick() => self.sweep_deadlines(),
            }
        }

        self.close_all();
        info!("Server stopped");
    }

    fn admit(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {e}");
                return;
            }
        };

        if self.connections.len() >= self.config.max_connections {
            warn!(
                "Rejecting {peer}: {} connections open",
                self.connections.len()
            );
            // Best effort; the socket is dropped either way.
            let _ = stream.try_write(&encode(responses::TOO_MANY_CONNECTIONS));
            return;
        }

        let id = ConnectionId::new(self.next_connection_id);
        self.next_connection_id += 1;

        let connection = Connection::new(id, peer, stream, self.config.max_line_length);
        self.connections.insert(id, connection);
        info!(
            "Accepted {peer} as {id} ({}/{} connections)",
            self.connections.len(),
            self.config.max_connections
        );
    }

    fn dispatch(&mut self, events: Vec<(ConnectionId, Readiness)>) {
        for (id, readiness) in events {
            // Gone if an earlier event in this batch retired it.
            let Some(mut conn) = self.connections.remove(&id) else {
                continue;
            };

            match self.service(&mut conn, readiness) {
                Ok(()) => {
                    self.connections.insert(id, conn);
                }
                Err(reason) => self.retire(conn, reason),
            }
        }
    }

    fn service(&mut self, conn: &mut Connection, readiness: Readiness) -> Result<(), Disconnect> {
        if let Some(e) = readiness.error {
            return Err(e.into());
        }

        if readiness.readable {
            if conn.state().reads_lines() {
                self.read_lines(conn)?;
            } else {
                self.pump(conn)?;
            }
        }

        if readiness.writable {
            conn.flush()?;
            if conn.transfer_direction() == Some(TransferDirection::Download) {
                self.pump(conn)?;
            }
        }

        self.settle_output(conn)
    }

    fn read_lines(&mut self, conn: &mut Connection) -> Result<(), Disconnect> {
        match conn.receive(&mut self.scratch)? {
            ReadStatus::Eof => return Err(Disconnect::PeerClosed),
            ReadStatus::WouldBlock => return Ok(()),
            ReadStatus::Data(n) => debug!("{}: read {n} bytes", conn.id()),
        }

        while conn.state().reads_lines() {
            match conn.next_line() {
                Ok(Some(line)) => self.execute(conn, &line)?,
                Ok(None) => break,
                Err(e) => {
                    let err = ChatServerError::from(e);
                    handle_error(&err);
                    conn.queue_line(error_reply(&err));
                }
            }
        }
        Ok(())
    }

    /// Runs one protocol line and applies the outcome to the connection.
    fn execute(&mut self, conn: &mut Connection, line: &str) -> Result<(), Disconnect> {
        let authenticated = self.sessions.username_of(conn.id()).is_some();
        let command = parse_command(line, authenticated);

        let mut ctx = DispatchContext {
            sessions: &mut self.sessions,
            storage: &self.storage,
            config: &self.config,
        };
        let result = handle_command(&mut ctx, conn.id(), command);

        for reply in &result.replies {
            conn.queue_line(reply);
        }
        self.deliver(result.deliveries);

        match result.status {
            CommandStatus::Success => {}
            CommandStatus::Failure(reason) => debug!("{}: {reason}", conn.id()),
            CommandStatus::Authenticated => {
                conn.set_state(ConnectionState::ActiveChat);
            }
            CommandStatus::LoggedOut => {
                conn.set_state(ConnectionState::AuthenticatingChat);
            }
            CommandStatus::BeginUpload(transfer) => {
                self.leave_chat(conn);
                info!(
                    "{}: receiving {} ({} bytes)",
                    conn.id(),
                    transfer.filename(),
                    transfer.declared_size()
                );
                let progress = conn.begin_upload(transfer)?;
                self.settle_transfer(conn, progress)?;
            }
            CommandStatus::BeginDownload(transfer) => {
                self.leave_chat(conn);
                info!(
                    "{}: sending {} ({} bytes)",
                    conn.id(),
                    transfer.filename(),
                    transfer.declared_size()
                );
                conn.set_state(ConnectionState::DownloadingFile(transfer));
            }
            CommandStatus::CloseConnection => {
                conn.set_state(ConnectionState::Closing);
            }
        }
        Ok(())
    }

    /// A connection carrying file bytes is no longer a chat endpoint; any
    /// broadcast queued on it would land inside the file stream.
    fn leave_chat(&mut self, conn: &Connection) {
        if let Some(username) = self.sessions.logout(conn.id()) {
            info!("{username} left chat on {} to transfer a file", conn.id());
        }
    }

    /// Queues broadcast lines on their recipients and flushes what the
    /// sockets take now. A recipient that cannot keep up is dropped on its
    /// own; the sender is unaffected.
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut failed = Vec::new();

        for delivery in deliveries {
            let Some(target) = self.connections.get_mut(&delivery.to) else {
                continue;
            };
            target.queue_line(&delivery.line);
            if let Err(reason) = check_output(target, self.config.max_outbound_bytes) {
                failed.push((delivery.to, reason));
            }
        }

        for (id, reason) in failed {
            if let Some(conn) = self.connections.remove(&id) {
                self.retire(conn, reason);
            }
        }
    }

    /// Moves one chunk of the connection's file transfer.
    fn pump(&mut self, conn: &mut Connection) -> Result<(), Disconnect> {
        let Some(result) = conn.pump_transfer(&mut self.scratch) else {
            return Ok(());
        };

        match result {
            Ok(progress) => self.settle_transfer(conn, progress),
            Err(e) => {
                if conn.transfer_direction() == Some(TransferDirection::Upload) {
                    conn.queue_line(responses::TRANSFER_FAILED);
                }
                Err(e.into())
            }
        }
    }

    /// Finalizes a completed transfer. The connection closes either way.
    fn settle_transfer(&self, conn: &mut Connection, progress: Progress) -> Result<(), Disconnect> {
        if progress == Progress::Pending {
            return Ok(());
        }
        let Some(transfer) = conn.take_transfer() else {
            return Ok(());
        };

        match transfer.finish() {
            Ok(path) => {
                debug!("{}: transfer settled at {}", conn.id(), path.display());
                Err(Disconnect::TransferDone)
            }
            Err(e) => {
                conn.queue_line(responses::TRANSFER_FAILED);
                Err(TransferError::Io(e).into())
            }
        }
    }

    fn settle_output(&self, conn: &mut Connection) -> Result<(), Disconnect> {
        check_output(conn, self.config.max_outbound_bytes)?;

        if matches!(conn.state(), ConnectionState::Closing) && conn.outbound_len() == 0 {
            return Err(Disconnect::Requested);
        }
        Ok(())
    }

    /// Closes transfers past their deadline and connections idle too long.
    fn sweep_deadlines(&mut self) {
        let transfer_timeout = self.config.transfer_timeout();
        let idle_timeout = self.config.idle_timeout();

        let expired: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| match conn.transfer() {
                Some(transfer) => transfer.is_expired(transfer_timeout),
                None => idle_timeout.is_some_and(|limit| conn.idle_for() > limit),
            })
            .map(Connection::id)
            .collect();

        for id in expired {
            let Some(mut conn) = self.connections.remove(&id) else {
                continue;
            };

            let reason = match conn.take_transfer() {
                Some(transfer) => {
                    let err = TransferError::TimedOut {
                        filename: transfer.filename().to_string(),
                        transferred: transfer.transferred(),
                        declared: transfer.declared_size(),
                    };
                    // Text would corrupt a download stream.
                    if transfer.direction() == TransferDirection::Upload {
                        conn.queue_line(responses::TRANSFER_TIMED_OUT);
                    }
                    transfer.abort();
                    Disconnect::from(err)
                }
                None => Disconnect::Idle,
            };
            self.retire(conn, reason);
        }
    }

    /// Removes every trace of a connection and closes its socket.
    fn retire(&mut self, mut conn: Connection, reason: Disconnect) {
        match &reason {
            Disconnect::Failed(err) => handle_error(err),
            _ => debug!("{}: {reason}", conn.id()),
        }

        if let Some(username) = self.sessions.logout(conn.id()) {
            info!("{username} disconnected ({} active)", self.sessions.len());
        }
        if let Some(transfer) = conn.take_transfer() {
            transfer.abort();
        }
        if let Err(e) = conn.flush() {
            debug!("{}: final flush failed: {e}", conn.id());
        }

        info!(
            "Closed {} from {} ({reason}); {} connection(s) open",
            conn.id(),
            conn.peer(),
            self.connections.len()
        );
    }

    fn close_all(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            if let Some(conn) = self.connections.remove(&id) {
                self.retire(conn, Disconnect::Shutdown);
            }
        }
    }
}

/// Flushes what the socket takes now and enforces the output bound.
fn check_output(conn: &mut Connection, max_outbound: usize) -> Result<(), Disconnect> {
    conn.flush()?;
    if conn.outbound_len() > max_outbound {
        return Err(Disconnect::SlowConsumer(max_outbound));
    }
    Ok(())
}

/// Resolves once at least one connection is ready for its registered
/// interest, yielding every connection that is.
fn next_ready(
    connections: &HashMap<ConnectionId, Connection>,
) -> impl Future<Output = Vec<(ConnectionId, Readiness)>> + '_ {
    poll_fn(move |cx| {
        let ready: Vec<(ConnectionId, Readiness)> = connections
            .values()
            .filter_map(|conn| conn.poll_ready(cx).map(|readiness| (conn.id(), readiness)))
            .collect();

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAccountStore;
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::time::{Duration, timeout};

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            port: 0,
            files_dir: dir.join("files").to_string_lossy().into_owned(),
            accounts_file: dir.join("accounts.txt").to_string_lossy().into_owned(),
            sweep_interval_ms: 50,
            ..ServerConfig::default()
        }
    }

    /// Accepts the next pending client into the table without running the loop.
    async fn accept_next(server: &mut Server) -> ConnectionId {
        let accepted = server.listener.accept().await;
        server.admit(accepted);
        ConnectionId::new(server.next_connection_id - 1)
    }

    #[tokio::test]
    async fn test_slow_recipient_dropped_others_still_served() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            max_line_length: 64,
            max_outbound_bytes: 64 * 1024,
            ..test_config(dir.path())
        };
        let mut server = Server::bind(config, Box::new(MemoryAccountStore::new()))
            .await
            .unwrap();
        let addr = server.local_addr();

        let mut stalled_client = TcpStream::connect(addr).await.unwrap();
        let stalled = accept_next(&mut server).await;
        let reading_client = TcpStream::connect(addr).await.unwrap();
        let reading = accept_next(&mut server).await;

        // A backlog far beyond what the kernel buffers of a peer that never
        // reads can absorb.
        server
            .connections
            .get_mut(&stalled)
            .unwrap()
            .queue_line(&"x".repeat(32 * 1024 * 1024));

        server.deliver(vec![
            Delivery {
                to: stalled,
                line: "alice: hi".to_string(),
            },
            Delivery {
                to: reading,
                line: "alice: hi".to_string(),
            },
        ]);

        assert!(!server.connections.contains_key(&stalled));
        assert!(server.connections.contains_key(&reading));

        let mut reading_client = BufReader::new(reading_client);
        let mut line = String::new();
        timeout(Duration::from_secs(5), reading_client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "alice: hi\n");

        // The dropped peer sees end of stream once it drains what was sent.
        let mut drained = Vec::new();
        timeout(
            Duration::from_secs(10),
            stalled_client.read_to_end(&mut drained),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(drained.len() < 32 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_bind_creates_files_dir() {
        let dir = tempdir().unwrap();
        let server = Server::bind(test_config(dir.path()), Box::new(MemoryAccountStore::new()))
            .await
            .unwrap();

        assert!(dir.path().join("files").is_dir());
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            chunk_size: 0,
            ..test_config(dir.path())
        };
        let result = Server::bind(config, Box::new(MemoryAccountStore::new())).await;
        assert!(matches!(result, Err(ChatServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            max_connections: 1,
            ..test_config(dir.path())
        };
        let server = Server::bind(config, Box::new(MemoryAccountStore::new()))
            .await
            .unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        // Barrier: the first connection is registered once it gets a reply.
        first.write_all(b"*bogus\n").await.unwrap();
        let mut first = BufReader::new(first);
        let mut line = String::new();
        first.read_line(&mut line).await.unwrap();
        assert_eq!(line, "Unknown command\n");

        let second = TcpStream::connect(addr).await.unwrap();
        let mut second = BufReader::new(second);
        line.clear();
        timeout(Duration::from_secs(5), second.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "Too many connections\n");

        shutdown.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_connection_closed() {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            idle_timeout_secs: 1,
            ..test_config(dir.path())
        };
        let server = Server::bind(config, Box::new(MemoryAccountStore::new()))
            .await
            .unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        let client = TcpStream::connect(addr).await.unwrap();
        let mut client = BufReader::new(client);
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        shutdown.shutdown();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
