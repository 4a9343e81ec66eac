//! The wire protocol spoken by collector plugins: a newline-delimited,
//! keyword-oriented text format describing charts, dimensions, samples,
//! labels, hosts and remote function invocations.
//!
//! This crate covers the framing concerns only: acquiring bounded lines
//! from a byte stream, splitting them into keyword fields, and writing
//! function request/response frames. Dispatching keywords to actions is
//! the job of the consuming crate.

#![deny(missing_docs)]

use std::time::Duration;

pub mod keywords;
pub mod reader;
pub mod result_frame;
pub mod tokenize;

pub use reader::{BufLineSource, LineOutcome, LineSource, ReadError};
pub use tokenize::{Recovery, TokenizeError, Words, first_word, split_words};

/// Hard cap on the length of a single protocol line, in bytes. Longer
/// lines are truncated at this boundary; the remainder is delivered by
/// the next read.
pub const LINE_MAX: usize = 1024 * 1024;

/// Maximum number of fields a line is split into. Any trailing content is
/// concatenated into the last field.
pub const MAX_WORDS: usize = 20;

/// Maximum number of callbacks that may share one keyword.
pub const MAX_CALLBACKS: usize = 20;

/// Capacity of the recovery journal used by recoverable splitting.
pub const MAX_RECOVER_KEYWORDS: usize = 128;

/// Hard cap on the bytes a deferred capture may accumulate before the
/// plugin is considered abusive.
pub const DEFERRED_RESPONSE_MAX: usize = 10 * 1024 * 1024;

/// Timeout applied to a function call when the requester does not name one.
pub const FUNCTION_TIMEOUT_DEFAULT: Duration = Duration::from_secs(10);

/// Upper bound on the number of configured plugin directories.
pub const MAX_PLUGIN_DIRECTORIES: usize = 20;

/// Filename suffix that marks an executable as a collector plugin.
pub const PLUGIN_FILE_SUFFIX: &str = ".plugin";
