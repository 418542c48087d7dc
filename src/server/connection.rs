//! Connection state
//!
//! Everything the multiplexer keeps per socket: the protocol state, the
//! line reassembly buffer, queued output and the activity clock. The
//! interest set is derived from the state, never stored separately.

use log::{debug, warn};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::Interest;
use tokio::net::TcpStream;

use crate::error::{ProtocolError, TransferError};
use crate::protocol::{LineCodec, encode};
use crate::session::ConnectionId;
use crate::transfer::{FileTransferContext, Progress, TransferDirection, receive_chunk, send_chunk};

/// Protocol state of one connection.
#[derive(Debug)]
pub enum ConnectionState {
    /// Accepted, no identity bound. Credentials and file commands expected.
    AuthenticatingChat,
    ActiveChat,
    UploadingFile(FileTransferContext),
    DownloadingFile(FileTransferContext),
    /// Queued replies are flushed, then the connection is closed.
    Closing,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::AuthenticatingChat => "authenticating",
            ConnectionState::ActiveChat => "chat",
            ConnectionState::UploadingFile(_) => "uploading",
            ConnectionState::DownloadingFile(_) => "downloading",
            ConnectionState::Closing => "closing",
        }
    }

    /// Whether incoming bytes are protocol lines.
    pub fn reads_lines(&self) -> bool {
        matches!(
            self,
            ConnectionState::AuthenticatingChat | ConnectionState::ActiveChat
        )
    }
}

/// Which of a connection's registered interests fired.
#[derive(Debug, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: Option<io::Error>,
}

impl Readiness {
    fn is_ready(&self) -> bool {
        self.readable || self.writable || self.error.is_some()
    }
}

/// Result of one non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Data(usize),
    WouldBlock,
    Eof,
}

pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    codec: LineCodec,
    outbound: Vec<u8>,
    state: ConnectionState,
    last_activity: Instant,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, stream: TcpStream, max_line_length: usize) -> Self {
        Self {
            id,
            peer,
            stream,
            codec: LineCodec::new(max_line_length),
            outbound: Vec::new(),
            state: ConnectionState::AuthenticatingChat,
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Replaces the state, returning the previous one.
    pub fn set_state(&mut self, state: ConnectionState) -> ConnectionState {
        debug!("{} {} -> {}", self.id, self.state.name(), state.name());
        std::mem::replace(&mut self.state, state)
    }

    pub fn transfer(&self) -> Option<&FileTransferContext> {
        match &self.state {
            ConnectionState::UploadingFile(t) | ConnectionState::DownloadingFile(t) => Some(t),
            _ => None,
        }
    }

    /// Detaches the transfer context, leaving the connection `Closing`.
    pub fn take_transfer(&mut self) -> Option<FileTransferContext> {
        if self.transfer().is_none() {
            return None;
        }
        match self.set_state(ConnectionState::Closing) {
            ConnectionState::UploadingFile(t) | ConnectionState::DownloadingFile(t) => Some(t),
            _ => None,
        }
    }

    /// Interest set implied by the current state and output queue.
    pub fn interest(&self) -> Option<Interest> {
        let readable = self.state.reads_lines()
            || matches!(self.state, ConnectionState::UploadingFile(_));
        let writable = !self.outbound.is_empty()
            || matches!(
                self.state,
                ConnectionState::DownloadingFile(_) | ConnectionState::Closing
            );

        match (readable, writable) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Polls the socket for every interest currently registered.
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Option<Readiness> {
        let interest = self.interest()?;
        let mut readiness = Readiness::default();

        if interest.is_readable() {
            match self.stream.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => readiness.readable = true,
                Poll::Ready(Err(e)) => readiness.error = Some(e),
                Poll::Pending => {}
            }
        }
        if interest.is_writable() && readiness.error.is_none() {
            match self.stream.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => readiness.writable = true,
                Poll::Ready(Err(e)) => readiness.error = Some(e),
                Poll::Pending => {}
            }
        }

        readiness.is_ready().then_some(readiness)
    }

    /// Reads whatever is available into the line buffer.
    pub fn receive(&mut self, scratch: &mut [u8]) -> io::Result<ReadStatus> {
        match self.stream.try_read(scratch) {
            Ok(0) => Ok(ReadStatus::Eof),
            Ok(n) => {
                self.codec.extend(&scratch[..n]);
                self.touch();
                Ok(ReadStatus::Data(n))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    pub fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        self.codec.decode()
    }

    /// Starts an upload, consuming any file bytes that arrived with the header.
    pub fn begin_upload(&mut self, mut transfer: FileTransferContext) -> Result<Progress, TransferError> {
        let early = self.codec.take_buffered();
        if !early.is_empty() {
            let consumed = match transfer.absorb(&early) {
                Ok(consumed) => consumed,
                Err(e) => {
                    transfer.abort();
                    return Err(e.into());
                }
            };
            if consumed < early.len() {
                warn!(
                    "{}: discarding {} byte(s) past the declared size of {}",
                    self.id,
                    early.len() - consumed,
                    transfer.filename()
                );
            }
        }

        let progress = if transfer.is_complete() {
            Progress::Complete
        } else {
            Progress::Pending
        };
        self.set_state(ConnectionState::UploadingFile(transfer));
        Ok(progress)
    }

    /// Moves one chunk of the attached transfer.
    ///
    /// A download only proceeds once queued output, the header included, is
    /// fully flushed. `None` when there is nothing to move.
    pub fn pump_transfer(&mut self, scratch: &mut [u8]) -> Option<Result<Progress, TransferError>> {
        let result = match &mut self.state {
            ConnectionState::UploadingFile(transfer) => {
                receive_chunk(&self.stream, transfer, scratch)
            }
            ConnectionState::DownloadingFile(transfer) if self.outbound.is_empty() => {
                send_chunk(&self.stream, transfer, scratch)
            }
            _ => return None,
        };
        if result.is_ok() {
            self.last_activity = Instant::now();
        }
        Some(result)
    }

    pub fn transfer_direction(&self) -> Option<TransferDirection> {
        self.transfer().map(FileTransferContext::direction)
    }

    pub fn queue_line(&mut self, line: &str) {
        self.outbound.extend_from_slice(&encode(line));
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Writes as much queued output as the socket takes without blocking.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.try_write(&self.outbound) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                    self.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
