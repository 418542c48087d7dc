//! Line codec
//!
//! Reassembles newline-terminated protocol lines from arbitrarily split
//! reads. One codec lives on each connection.

use crate::error::ProtocolError;

const TERMINATOR: u8 = b'\n';

#[derive(Debug)]
pub struct LineCodec {
    buffer: Vec<u8>,
    max_line_length: usize,
    /// Set after an oversized line: input is dropped up to the next terminator.
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_length,
            discarding: false,
        }
    }

    /// Appends freshly read bytes to the reassembly buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete line, or `Ok(None)` while more bytes are needed.
    ///
    /// The terminator and a preceding `\r` are stripped. A line longer than
    /// the configured bound yields `LineTooLong` once; the rest of that line
    /// is then skipped.
    pub fn decode(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == TERMINATOR);

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buffer.drain(..=pos);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(pos) if pos <= self.max_line_length => {
                    let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
                }
                Some(pos) => {
                    self.buffer.drain(..=pos);
                    Err(ProtocolError::LineTooLong(self.max_line_length))
                }
                None if self.buffer.len() > self.max_line_length => {
                    self.buffer.clear();
                    self.discarding = true;
                    Err(ProtocolError::LineTooLong(self.max_line_length))
                }
                None => Ok(None),
            };
        }
    }

    /// Hands over every byte received after the last decoded line.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        self.discarding = false;
        std::mem::take(&mut self.buffer)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Frames an outgoing line.
pub fn encode(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}
