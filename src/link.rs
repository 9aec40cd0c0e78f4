//! Line-oriented access to the board's serial port.

use crate::protocol::Command;
use log::trace;
use std::io::{self, Read, Write};

/// A source of text lines read with a bounded wait.
pub trait LineSource {
    /// Waits at most one read timeout for a complete line.
    ///
    /// Returns `Ok(None)` when no complete line arrived in that window.
    fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Owns the port and splits its byte stream into lines.
///
/// The port must be configured with a read timeout; a read that times out
/// is reported as "nothing yet" rather than as an error.
pub struct Link<T> {
    port: T,
    pending: Vec<u8>,
    read_buf: Vec<u8>,
}

impl<T> Link<T> {
    pub fn new(port: T) -> Self {
        Self {
            port,
            pending: Vec::new(),
            read_buf: vec![0; 128],
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.port
    }

    pub fn into_inner(self) -> T {
        self.port
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

impl<T: Write> Link<T> {
    /// Write one framed command.
    pub fn send(&mut self, command: &Command) -> io::Result<()> {
        let frame = command.frame();
        trace!("> {}", frame.trim_end());
        self.port.write_all(frame.as_bytes())?;
        self.port.flush()
    }
}

impl<T: Read> LineSource for Link<T> {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        match self.port.read(self.read_buf.as_mut_slice()) {
            Ok(0) => Ok(None),
            Ok(bytes_read) => {
                self.pending.extend_from_slice(&self.read_buf[..bytes_read]);
                let line = self.take_line();
                if let Some(line) = &line {
                    trace!("< {}", line);
                }
                Ok(line)
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
