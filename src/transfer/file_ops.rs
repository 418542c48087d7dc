//! Module `file_ops`
//!
//! Moves file bytes between a non-blocking socket and a transfer context,
//! one bounded chunk per readiness event. A short read or write is normal
//! progress; the caller waits for the next event and calls again.

use log::debug;
use std::io::ErrorKind;
use tokio::net::TcpStream;

use crate::error::TransferError;
use crate::transfer::FileTransferContext;

/// Outcome of one pump step
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Complete,
}

fn progress_of(ctx: &FileTransferContext) -> Progress {
    if ctx.is_complete() {
        Progress::Complete
    } else {
        Progress::Pending
    }
}

/// Reads at most `scratch.len()` upload bytes from the socket into the file.
///
/// Never reads past the declared size, so bytes the peer sends after the
/// file stay in the socket.
pub fn receive_chunk(
    stream: &TcpStream,
    ctx: &mut FileTransferContext,
    scratch: &mut [u8],
) -> Result<Progress, TransferError> {
    if ctx.is_complete() {
        return Ok(Progress::Complete);
    }

    let limit = scratch
        .len()
        .min(usize::try_from(ctx.remaining()).unwrap_or(usize::MAX));

    match stream.try_read(&mut scratch[..limit]) {
        Ok(0) => {
            return Err(TransferError::PeerClosed {
                filename: ctx.filename().to_string(),
                transferred: ctx.transferred(),
                declared: ctx.declared_size(),
            });
        }
        Ok(n) => {
            ctx.absorb(&scratch[..n])?;
            debug!(
                "{}: received {} bytes ({}/{})",
                ctx.filename(),
                n,
                ctx.transferred(),
                ctx.declared_size()
            );
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }

    Ok(progress_of(ctx))
}

/// Writes at most `scratch.len()` download bytes from the file to the socket.
pub fn send_chunk(
    stream: &TcpStream,
    ctx: &mut FileTransferContext,
    scratch: &mut [u8],
) -> Result<Progress, TransferError> {
    if ctx.is_complete() {
        return Ok(Progress::Complete);
    }

    let chunk = ctx.next_chunk(scratch)?;

    match stream.try_write(chunk) {
        Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
        Ok(n) => {
            ctx.advance(n);
            debug!(
                "{}: sent {} bytes ({}/{})",
                ctx.filename(),
                n,
                ctx.transferred(),
                ctx.declared_size()
            );
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
        Err(e) => return Err(e.into()),
    }

    Ok(progress_of(ctx))
}
