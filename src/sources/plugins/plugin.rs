//! Plugin records and the per-plugin run loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use collector_protocol::reader::ReadError;
use tracing::{debug, warn};

use super::handlers::CollectorSession;
use crate::parser::{NextLine, Parser, ProcessOutcome, SessionError};

/// Health and identity of one plugin. The record is shared between the
/// supervisor and the session thread; `obsolete` is the one-way
/// cross-thread terminator. Once `obsolete` is observed set, the record
/// is not mutated further and the owner reclaims it.
pub struct PluginRecord {
    id: String,
    filename: String,
    full_path: PathBuf,
    command_line: String,
    update_every: u32,
    started_at: SystemTime,
    pid: AtomicU32,
    capabilities: AtomicU32,
    successful_collections: AtomicU64,
    serial_failures: AtomicU32,
    enabled: AtomicBool,
    obsolete: AtomicBool,
}

impl PluginRecord {
    /// Create an enabled, non-obsolete record.
    pub fn new(
        id: &str,
        filename: &str,
        full_path: PathBuf,
        command_line: String,
        update_every: u32,
    ) -> Self {
        Self {
            id: id.to_owned(),
            filename: filename.to_owned(),
            full_path,
            command_line,
            update_every,
            started_at: SystemTime::now(),
            pid: AtomicU32::new(0),
            capabilities: AtomicU32::new(0),
            successful_collections: AtomicU64::new(0),
            serial_failures: AtomicU32::new(0),
            enabled: AtomicBool::new(true),
            obsolete: AtomicBool::new(false),
        }
    }

    /// Config node id of the plugin.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Just the filename.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the executable.
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    /// Command line the plugin was started with.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Collection cadence handed to the plugin, in seconds.
    pub fn update_every(&self) -> u32 {
        self.update_every
    }

    /// When the record was created.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Child pid, zero when no child is attached.
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    /// Attach the child pid.
    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::Release);
    }

    /// Capability bits announced by the plugin.
    pub fn capabilities(&self) -> u32 {
        self.capabilities.load(Ordering::Acquire)
    }

    /// Merge capability bits into the record.
    pub fn add_capabilities(&self, bits: u32) {
        self.capabilities.fetch_or(bits, Ordering::AcqRel);
    }

    /// Times the plugin produced collections across runs.
    pub fn successful_collections(&self) -> u64 {
        self.successful_collections.load(Ordering::Acquire)
    }

    /// Consecutive runs that produced nothing.
    pub fn serial_failures(&self) -> u32 {
        self.serial_failures.load(Ordering::Acquire)
    }

    /// Whether the plugin is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the enabled flag off.
    pub fn set_disabled(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether the record has been retired.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    /// Retire the record: disabled and obsolete, ready for reclamation.
    pub fn retire(&self) {
        self.enabled.store(false, Ordering::Release);
        self.obsolete.store(true, Ordering::Release);
    }

    /// Disabled and obsolete means the owner may drop the record.
    pub fn is_reclaimable(&self) -> bool {
        !self.is_enabled() && self.is_obsolete()
    }

    /// Fold the result of one run into the health counters and return
    /// the serial-failure count after the update.
    pub fn finish_run(&self, collections: u64) -> u32 {
        if collections > 0 {
            self.successful_collections
                .fetch_add(collections, Ordering::AcqRel);
            self.serial_failures.store(0, Ordering::Release);
            0
        } else {
            self.serial_failures.fetch_add(1, Ordering::AcqRel) + 1
        }
    }
}

/// Why a session loop returned.
#[derive(Debug)]
pub enum SessionEnd {
    /// The plugin closed its stream.
    Eof,
    /// A callback asked the loop to stop (`DISABLE`).
    Stop,
    /// The record was retired from outside; the loop observed it
    /// between lines.
    Obsolete,
    /// Reading from the plugin failed.
    Transport(ReadError),
    /// A resource error tore the session down.
    Resource(SessionError),
}

/// Run one parse session to completion and fold the outcome into the
/// plugin's health counters.
///
/// In-flight function calls are swept between lines and cancelled when
/// the loop ends. A run without any committed batch counts as a serial
/// failure; crossing `serial_failure_threshold` retires the plugin so
/// the supervisor will not restart it.
pub fn run_plugin(
    record: &PluginRecord,
    parser: &mut Parser<CollectorSession>,
    serial_failure_threshold: u32,
) -> SessionEnd {
    let registry = parser.inflight();

    let end = loop {
        if record.is_obsolete() {
            break SessionEnd::Obsolete;
        }
        registry.sweep(Instant::now());
        match parser.next_line() {
            Ok(NextLine::Line) => {}
            Ok(NextLine::Eof) => break SessionEnd::Eof,
            Err(error) => break SessionEnd::Transport(error),
        }
        match parser.process_one(None) {
            Ok(ProcessOutcome::Stop) => break SessionEnd::Stop,
            Ok(_) => {}
            Err(error) => break SessionEnd::Resource(error),
        }
    };

    registry.cancel_all();

    if !record.is_obsolete() {
        let collected = parser.user().batches_committed();
        let serial_failures = record.finish_run(collected);
        if parser.user().disable_requested() {
            record.set_disabled();
        }
        if matches!(end, SessionEnd::Resource(_)) {
            warn!(
                plugin = record.id(),
                "Session ended on a resource error; retiring plugin."
            );
            record.retire();
        } else if serial_failures > serial_failure_threshold {
            warn!(
                plugin = record.id(),
                serial_failures, "Too many runs without collections; retiring plugin."
            );
            record.retire();
        }
    }

    debug!(plugin = record.id(), end = ?end, "Plugin session ended.");
    end
}
