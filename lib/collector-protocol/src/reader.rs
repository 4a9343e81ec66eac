//! Blocking acquisition of protocol lines with a bounded line length.

use std::io::{self, BufRead};

use bytes::BytesMut;
use memchr::memchr;
use snafu::Snafu;
use tracing::warn;

use crate::LINE_MAX;

/// How a read attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// A line was placed in the buffer. `truncated` is set when the line
    /// hit the length cap before a newline was seen; the remainder stays
    /// in the reader, so the next read resumes after the break.
    Line {
        /// Whether the line was cut at the length cap.
        truncated: bool,
    },
    /// The producer closed the stream.
    Eof,
}

/// An error surfaced while reading the next line.
#[derive(Debug, Snafu)]
pub enum ReadError {
    /// The underlying reader failed.
    #[snafu(display("read failed: input error: {source}"))]
    Read {
        /// The I/O error reported by the reader.
        source: io::Error,
    },
    /// A user-supplied line source failed with its own code.
    #[snafu(display("read failed: user defined source returned {code}"))]
    UserDefined {
        /// The code the source reported.
        code: i32,
    },
}

/// A source of protocol lines.
///
/// [`BufLineSource`] covers files, pipes and sockets; a session may
/// install its own implementation in place of the default reader.
pub trait LineSource: Send {
    /// Clear `buf` and fill it with the next line. The trailing newline
    /// is consumed but not stored; a trailing carriage return is
    /// stripped as well.
    fn next_line(&mut self, buf: &mut BytesMut) -> Result<LineOutcome, ReadError>;
}

/// A [`LineSource`] over any buffered reader.
pub struct BufLineSource<R> {
    reader: R,
    max_line_bytes: usize,
}

impl<R: BufRead + Send> BufLineSource<R> {
    /// Wrap `reader` with the protocol default line cap of
    /// [`LINE_MAX`] bytes.
    pub fn new(reader: R) -> Self {
        Self::with_max_line_bytes(reader, LINE_MAX)
    }

    /// Wrap `reader` with an explicit line cap.
    pub fn with_max_line_bytes(reader: R, max_line_bytes: usize) -> Self {
        assert!(max_line_bytes > 0, "line cap must be positive");
        Self {
            reader,
            max_line_bytes,
        }
    }
}

impl<R: BufRead + Send> LineSource for BufLineSource<R> {
    fn next_line(&mut self, buf: &mut BytesMut) -> Result<LineOutcome, ReadError> {
        buf.clear();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(ref error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(ReadError::Read { source }),
            };

            if available.is_empty() {
                if buf.is_empty() {
                    return Ok(LineOutcome::Eof);
                }
                trim_carriage_return(buf);
                return Ok(LineOutcome::Line { truncated: false });
            }

            let room = self.max_line_bytes - buf.len();
            let (used, done) = match memchr(b'\n', available) {
                Some(newline) if newline <= room => {
                    buf.extend_from_slice(&available[..newline]);
                    (newline + 1, Some(false))
                }
                // a newline exists but lies past the cap, or no newline
                // fits in the remaining room: cut here and leave the
                // rest for the next read
                Some(_) => {
                    buf.extend_from_slice(&available[..room]);
                    (room, Some(true))
                }
                None if available.len() >= room => {
                    buf.extend_from_slice(&available[..room]);
                    (room, Some(true))
                }
                None => {
                    buf.extend_from_slice(available);
                    (available.len(), None)
                }
            };
            self.reader.consume(used);

            match done {
                Some(false) => {
                    trim_carriage_return(buf);
                    return Ok(LineOutcome::Line { truncated: false });
                }
                Some(true) => {
                    warn!(
                        message = "Line exceeds the configured maximum length; truncating.",
                        max_line_bytes = self.max_line_bytes,
                        internal_log_rate_limit = true
                    );
                    return Ok(LineOutcome::Line { truncated: true });
                }
                None => {}
            }
        }
    }
}

fn trim_carriage_return(buf: &mut BytesMut) {
    if buf.last() == Some(&b'\r') {
        buf.truncate(buf.len() - 1);
    }
}
