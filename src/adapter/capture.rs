//! Output written by collaborators while a request runs
//!
//! Stdout carries DAP frames, so nothing a backend prints may reach it. The
//! backend gets a buffer instead, and the buffer is forwarded to the client
//! as a single `output` event once the request is done.

use std::io::{self, Write};

/// Category of forwarded output events
pub const CATEGORY: &str = "stdout";

#[derive(Debug, Default)]
pub struct OutputCapture {
    buffer: Vec<u8>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far, leaving the buffer empty
    pub fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Write for OutputCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
