//! Module `context`
//!
//! Per-connection bookkeeping of a chunked file transfer: how many bytes
//! were announced, how many have moved, and the file on the server side.
//! `transferred` only grows and never passes `declared_size`.

use log::{info, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Client to server; the server writes the file.
    Upload,
    /// Server to client; the server reads the file.
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "upload"),
            TransferDirection::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug)]
pub struct FileTransferContext {
    direction: TransferDirection,
    filename: String,
    declared_size: u64,
    transferred: u64,
    file: File,
    /// Upload destination; the download source otherwise.
    path: PathBuf,
    /// Where upload bytes land until the transfer completes.
    temp_path: Option<PathBuf>,
    started_at: Instant,
}

impl FileTransferContext {
    /// Creates the temporary file an upload of `declared_size` bytes is written to.
    pub fn upload(
        filename: &str,
        declared_size: u64,
        file_path: PathBuf,
        temp_path: PathBuf,
    ) -> io::Result<Self> {
        let file = File::create(&temp_path)?;
        info!("Receiving {filename} ({declared_size} bytes) into {}", temp_path.display());

        Ok(Self {
            direction: TransferDirection::Upload,
            filename: filename.to_string(),
            declared_size,
            transferred: 0,
            file,
            path: file_path,
            temp_path: Some(temp_path),
            started_at: Instant::now(),
        })
    }

    /// Opens `path` for sending; the declared size is its current length.
    pub fn download(filename: &str, path: PathBuf) -> io::Result<Self> {
        let file = File::open(&path)?;
        let declared_size = file.metadata()?.len();
        info!("Sending {filename} ({declared_size} bytes) from {}", path.display());

        Ok(Self {
            direction: TransferDirection::Download,
            filename: filename.to_string(),
            declared_size,
            transferred: 0,
            file,
            path,
            temp_path: None,
            started_at: Instant::now(),
        })
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn remaining(&self) -> u64 {
        self.declared_size - self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.declared_size
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_expired(&self, deadline: Duration) -> bool {
        !self.is_complete() && self.elapsed() > deadline
    }

    /// Writes upload bytes to the file, returning how many were consumed.
    ///
    /// Bytes past the declared size are not consumed.
    pub fn absorb(&mut self, bytes: &[u8]) -> io::Result<usize> {
        debug_assert_eq!(self.direction, TransferDirection::Upload);

        let take = bytes.len().min(self.remaining_usize());
        if take > 0 {
            self.file.write_all(&bytes[..take])?;
            self.transferred += take as u64;
        }
        Ok(take)
    }

    /// Reads the next download bytes, starting at the current position.
    ///
    /// Nothing is marked as sent; call [`advance`](Self::advance) with what
    /// the socket actually took.
    pub fn next_chunk<'b>(&mut self, buf: &'b mut [u8]) -> io::Result<&'b [u8]> {
        debug_assert_eq!(self.direction, TransferDirection::Download);

        let want = buf.len().min(self.remaining_usize());
        self.file.seek(SeekFrom::Start(self.transferred))?;

        let mut filled = 0;
        while filled < want {
            match self.file.read(&mut buf[filled..want])? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank during download", self.filename),
                    ));
                }
                n => filled += n,
            }
        }
        Ok(&buf[..filled])
    }

    /// Records `sent` download bytes as delivered.
    pub fn advance(&mut self, sent: usize) {
        self.transferred = (self.transferred + sent as u64).min(self.declared_size);
    }

    /// Completes the transfer. Uploads are synced to disk and moved into place.
    pub fn finish(self) -> io::Result<PathBuf> {
        if let Some(temp_path) = &self.temp_path {
            self.file.sync_all()?;
            drop(self.file);
            fs::rename(temp_path, &self.path)?;
        }

        info!(
            "{} of {} complete ({} bytes in {:.2?})",
            self.direction,
            self.filename,
            self.transferred,
            self.started_at.elapsed()
        );
        Ok(self.path)
    }

    /// Abandons the transfer, removing any partial upload.
    pub fn abort(self) {
        warn!(
            "{} of {} aborted at {}/{} bytes",
            self.direction, self.filename, self.transferred, self.declared_size
        );
        if let Some(temp_path) = &self.temp_path {
            drop(self.file);
            if let Err(e) = fs::remove_file(temp_path) {
                warn!("Failed to remove partial upload {}: {}", temp_path.display(), e);
            }
        }
    }

    fn remaining_usize(&self) -> usize {
        usize::try_from(self.remaining()).unwrap_or(usize::MAX)
    }
}
