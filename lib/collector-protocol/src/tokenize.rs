//! Splitting protocol lines into keyword fields.
//!
//! A line is split on protocol whitespace (ASCII space and tab) into at
//! most [`MAX_WORDS`](crate::MAX_WORDS) fields. A field surrounded by `"`
//! or `'` captures whitespace; a backslash keeps the following byte from
//! terminating the field. Splitting is destructive: terminator bytes are
//! punched out of the line in place. In recoverable mode every punched
//! byte is journaled so [`Recovery::recover`] can restore the original
//! line before it is forwarded elsewhere.

use smallvec::SmallVec;
use snafu::Snafu;

use crate::{MAX_RECOVER_KEYWORDS, MAX_WORDS};

/// Protocol whitespace: ASCII space and tab.
#[inline]
pub const fn is_space(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

#[inline]
const fn is_quote(byte: u8) -> bool {
    byte == b'"' || byte == b'\''
}

/// An error produced while splitting a line.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TokenizeError {
    /// The recovery journal cannot hold another edit.
    #[snafu(display("line needs more than {MAX_RECOVER_KEYWORDS} recovery entries"))]
    RecoveryOverflow,
}

/// Journal of the in-place edits made by [`split_words`] in recoverable
/// mode. One journal is reused across lines; it is drained by
/// [`Recovery::recover`].
#[derive(Debug, Default)]
pub struct Recovery {
    edits: SmallVec<[(usize, u8); 16]>,
}

impl Recovery {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any edits are pending.
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    fn record(&mut self, pos: usize, original: u8) -> Result<(), TokenizeError> {
        if self.edits.len() == MAX_RECOVER_KEYWORDS {
            return RecoveryOverflowSnafu.fail();
        }
        self.edits.push((pos, original));
        Ok(())
    }

    /// Undo the journaled edits, restoring `line` to its pre-split
    /// contents byte for byte. Edits are undone in reverse order and the
    /// journal is left empty.
    pub fn recover(&mut self, line: &mut [u8]) {
        while let Some((pos, original)) = self.edits.pop() {
            if let Some(byte) = line.get_mut(pos) {
                *byte = original;
            }
        }
    }
}

/// The fields of a split line, held as index ranges into the caller's
/// buffer. Ranges never cover punched terminator bytes, so a field read
/// through [`Words::get`] is clean even after destructive splitting.
#[derive(Debug, Default, Clone)]
pub struct Words {
    ranges: SmallVec<[(usize, usize); MAX_WORDS]>,
}

impl Words {
    /// Number of fields.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the line had no fields at all.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Field `index` as UTF-8 text, or `None` when the field does not
    /// exist or is not valid UTF-8.
    pub fn get<'a>(&self, line: &'a [u8], index: usize) -> Option<&'a str> {
        std::str::from_utf8(self.raw(line, index)?).ok()
    }

    /// Field `index` as raw bytes.
    pub fn raw<'a>(&self, line: &'a [u8], index: usize) -> Option<&'a [u8]> {
        let &(start, end) = self.ranges.get(index)?;
        line.get(start..end)
    }

    fn push(&mut self, start: usize, end: usize) {
        self.ranges.push((start, end));
    }
}

/// First token of `line`, without splitting or mutating it. Returns
/// `None` for blank lines.
pub fn first_word(line: &[u8]) -> Option<&[u8]> {
    let start = line.iter().position(|&b| !is_space(b))?;
    let rest = &line[start..];
    let len = rest
        .iter()
        .position(|&b| is_space(b))
        .unwrap_or(rest.len());
    (len > 0).then(|| &rest[..len])
}

fn punch(
    line: &mut [u8],
    recovery: &mut Option<&mut Recovery>,
    pos: usize,
) -> Result<(), TokenizeError> {
    if let Some(journal) = recovery.as_deref_mut() {
        journal.record(pos, line[pos])?;
    }
    line[pos] = 0;
    Ok(())
}

/// Split `line` into up to [`MAX_WORDS`](crate::MAX_WORDS) fields.
///
/// Terminator bytes (closing quotes and the separator ending each bare
/// field) are overwritten with NUL in place. Pass a [`Recovery`] journal
/// to make the edits reversible; without one the split is destructive.
/// Content past the last field slot lands in that slot unsplit, with
/// trailing whitespace removed.
pub fn split_words(
    line: &mut [u8],
    mut recovery: Option<&mut Recovery>,
) -> Result<Words, TokenizeError> {
    let mut words = Words::default();
    let n = line.len();
    let mut i = 0;

    while i < n {
        while i < n && is_space(line[i]) {
            i += 1;
        }
        if i >= n {
            break;
        }

        if words.len() + 1 == MAX_WORDS {
            let mut end = n;
            while end > i && is_space(line[end - 1]) {
                end -= 1;
            }
            words.push(i, end);
            break;
        }

        if is_quote(line[i]) {
            let quote = line[i];
            let start = i + 1;
            let mut j = start;
            while j < n {
                if line[j] == b'\\' && j + 1 < n {
                    j += 2;
                } else if line[j] == quote {
                    break;
                } else {
                    j += 1;
                }
            }
            if j < n {
                punch(line, &mut recovery, j)?;
                words.push(start, j);
                i = j + 1;
            } else {
                // unterminated quote: the field runs to the end of the line
                words.push(start, n);
                i = n;
            }
        } else {
            let start = i;
            let mut j = i;
            while j < n && !is_space(line[j]) {
                if line[j] == b'\\' && j + 1 < n {
                    j += 2;
                } else {
                    j += 1;
                }
            }
            let end = j.min(n);
            words.push(start, end);
            if end < n {
                punch(line, &mut recovery, end)?;
            }
            i = end + 1;
        }
    }

    Ok(words)
}
