//! The keyword table: maps a keyword to its ordered callbacks and the
//! worker job id used for busy/idle telemetry.

use collector_protocol::MAX_CALLBACKS;
use indexmap::IndexMap;
use smallvec::SmallVec;
use snafu::Snafu;

use super::KeywordFn;

/// Worker job ids are handed out starting here; lower ids are reserved
/// for the process-wide jobs.
pub const WORKER_PARSER_FIRST_JOB: usize = 1;

/// An error raised while registering a callback.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum RegisterError {
    /// The keyword already carries [`MAX_CALLBACKS`] callbacks.
    #[snafu(display("keyword {keyword} already has {MAX_CALLBACKS} callbacks"))]
    CallbacksFull {
        /// The saturated keyword.
        keyword: String,
    },
    /// The name is reserved for a session hook with a different type.
    #[snafu(display("{keyword} is reserved; install the line source through the parser"))]
    ReservedKeyword {
        /// The reserved name.
        keyword: String,
    },
}

#[derive(Debug)]
pub(super) struct Registration {
    pub callbacks: usize,
    pub worker_job_id: usize,
    pub created: bool,
}

/// One keyword with its callbacks, in registration order.
pub struct KeywordEntry<U> {
    name: String,
    worker_job_id: usize,
    callbacks: SmallVec<[KeywordFn<U>; 2]>,
}

impl<U> KeywordEntry<U> {
    /// The keyword string.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Telemetry job id assigned on first registration.
    pub fn worker_job_id(&self) -> usize {
        self.worker_job_id
    }

    /// Callbacks in the order they were registered.
    pub fn callbacks(&self) -> &[KeywordFn<U>] {
        &self.callbacks
    }
}

/// Keyword-to-entry mapping. Constructed during session init; extending
/// it while the read loop runs is not supported.
pub struct KeywordTable<U> {
    entries: IndexMap<String, KeywordEntry<U>>,
    next_worker_job_id: usize,
}

impl<U> Default for KeywordTable<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> KeywordTable<U> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            next_worker_job_id: WORKER_PARSER_FIRST_JOB,
        }
    }

    pub(super) fn register(
        &mut self,
        keyword: &str,
        callback: KeywordFn<U>,
    ) -> Result<Registration, RegisterError> {
        if let Some(entry) = self.entries.get_mut(keyword) {
            if entry.callbacks.len() == MAX_CALLBACKS {
                return CallbacksFullSnafu { keyword }.fail();
            }
            entry.callbacks.push(callback);
            return Ok(Registration {
                callbacks: entry.callbacks.len(),
                worker_job_id: entry.worker_job_id,
                created: false,
            });
        }

        let worker_job_id = self.next_worker_job_id;
        self.next_worker_job_id += 1;
        let mut callbacks = SmallVec::new();
        callbacks.push(callback);
        self.entries.insert(
            keyword.to_owned(),
            KeywordEntry {
                name: keyword.to_owned(),
                worker_job_id,
                callbacks,
            },
        );
        Ok(Registration {
            callbacks: 1,
            worker_job_id,
            created: true,
        })
    }

    /// Entry for `keyword`, if registered.
    pub fn lookup(&self, keyword: &str) -> Option<&KeywordEntry<U>> {
        self.entries.get(keyword)
    }

    /// Number of distinct keywords.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
