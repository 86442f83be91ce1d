//! Newline-delimited reading with a per-line cap
//!
//! A line over the cap is skipped up to its newline and reading carries on,
//! so one oversized message never ends the stream.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Line content without its `\n` or `\r\n` terminator
    Text(String),
    /// A line that exceeded the cap; holds its skipped length
    Oversized(usize),
}

pub struct BoundedLines<R> {
    reader: BufReader<R>,
    max_length: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> BoundedLines<R> {
    pub fn new(reader: R, max_length: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_length,
            buf: Vec::new(),
        }
    }

    #[cfg(test)]
    fn with_capacity(reader: R, max_length: usize, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            max_length,
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<Line>> {
        self.buf.clear();
        let mut skipped: Option<usize> = None;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(match skipped {
                    Some(len) => Some(Line::Oversized(len)),
                    None if self.buf.is_empty() => None,
                    None => Some(self.take_text()),
                });
            }

            let (chunk_len, found) = match available.iter().position(|&b| b == b'\n') {
                Some(offset) => (offset, true),
                None => (available.len(), false),
            };

            match skipped {
                Some(len) => skipped = Some(len + chunk_len),
                None if self.buf.len() + chunk_len > self.max_length => {
                    skipped = Some(self.buf.len() + chunk_len);
                    self.buf.clear();
                }
                None => self.buf.extend_from_slice(&available[..chunk_len]),
            }
            self.reader.consume(chunk_len + usize::from(found));

            if found {
                return Ok(Some(match skipped {
                    Some(len) => Line::Oversized(len),
                    None => self.take_text(),
                }));
            }
        }
    }

    fn take_text(&mut self) -> Line {
        let bytes = self.buf.strip_suffix(b"\r").unwrap_or(&self.buf[..]);
        Line::Text(String::from_utf8_lossy(bytes).into_owned())
    }
}
