//! Line splitting over a chunked byte stream.
//!
//! Chunk boundaries from a pipe are arbitrary; a line can arrive split across
//! reads. [`LineBuffer`] reassembles: each pushed chunk is appended to an
//! internal buffer, every completed line is emitted, and any trailing partial
//! line is retained for the next chunk.

/// Stateful splitter from byte chunks to complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in arrival order.
    ///
    /// Lines are split on `\n` with a trailing `\r` stripped. Invalid UTF-8
    /// is replaced rather than treated as an error; empty lines are emitted
    /// as-is and left to the caller to ignore.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The retained partial line, if any.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}
