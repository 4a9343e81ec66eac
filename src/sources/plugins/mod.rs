//! The plugins source: discovers collector plugins on disk and runs one
//! parse session per plugin, each on its own thread.

pub mod handlers;
pub mod plugin;

use std::fs;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use collector_protocol::{BufLineSource, MAX_PLUGIN_DIRECTORIES, PLUGIN_FILE_SUFFIX};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

pub use self::handlers::{CollectorSession, build_parser, register_builtins};
pub use self::plugin::{PluginRecord, SessionEnd, run_plugin};
use crate::internal_events::EventsHandle;
use crate::sink::IngestSink;

/// Options of the plugins source.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PluginsOptions {
    /// Directories scanned for `.plugin` executables. Configuration
    /// order is search order; earlier entries win name collisions. At
    /// most [`MAX_PLUGIN_DIRECTORIES`] are honored.
    pub plugin_dirs: Vec<PathBuf>,

    /// Default collection cadence handed to plugins, in seconds.
    pub update_every: u32,

    /// Consecutive runs without collections before a plugin is retired.
    pub serial_failure_threshold: u32,

    /// Honor the batch gaps plugins measure themselves.
    pub trust_durations: bool,
}

impl Default for PluginsOptions {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            update_every: 1,
            serial_failure_threshold: 10,
            trust_durations: false,
        }
    }
}

/// A plugin executable found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    /// Filename without the suffix; used as the plugin id.
    pub id: String,
    /// Filename as found.
    pub filename: String,
    /// Full path of the executable.
    pub path: PathBuf,
}

/// Scan the configured directories for `.plugin` files. Unreadable
/// directories are skipped with a warning.
pub fn discover_plugins(options: &PluginsOptions) -> Vec<DiscoveredPlugin> {
    if options.plugin_dirs.len() > MAX_PLUGIN_DIRECTORIES {
        warn!(
            configured = options.plugin_dirs.len(),
            honored = MAX_PLUGIN_DIRECTORIES,
            "Too many plugin directories; ignoring the extras."
        );
    }

    let mut found: IndexMap<String, DiscoveredPlugin> = IndexMap::new();
    for dir in options.plugin_dirs.iter().take(MAX_PLUGIN_DIRECTORIES) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    directory = %dir.display(),
                    %error,
                    "Unable to scan plugin directory."
                );
                continue;
            }
        };
        let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = filename.strip_suffix(PLUGIN_FILE_SUFFIX) else {
                continue;
            };
            if id.is_empty() || found.contains_key(id) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() || file_type.is_symlink() => {}
                _ => continue,
            }
            found.insert(
                id.to_owned(),
                DiscoveredPlugin {
                    id: id.to_owned(),
                    filename,
                    path: entry.path(),
                },
            );
        }
    }
    found.into_values().collect()
}

/// One supervised plugin: its record plus the session thread.
pub struct PluginHandle {
    record: Arc<PluginRecord>,
    thread: Option<JoinHandle<SessionEnd>>,
}

impl PluginHandle {
    /// The plugin's shared record.
    pub fn record(&self) -> &Arc<PluginRecord> {
        &self.record
    }
}

/// Owns the active plugin set and runs one session thread per plugin.
pub struct PluginSupervisor {
    options: PluginsOptions,
    events: EventsHandle,
    active: Vec<PluginHandle>,
}

impl PluginSupervisor {
    /// Create a supervisor with no active plugins.
    pub fn new(options: PluginsOptions, events: EventsHandle) -> Self {
        Self {
            options,
            events,
            active: Vec::new(),
        }
    }

    /// Discover plugins and start a session for each, drawing a sink per
    /// plugin from `make_sink`. Returns how many sessions started.
    pub fn spawn_discovered<F>(&mut self, mut make_sink: F) -> usize
    where
        F: FnMut() -> Box<dyn IngestSink>,
    {
        let mut started = 0;
        for plugin in discover_plugins(&self.options) {
            match self.spawn_plugin(&plugin, make_sink()) {
                Ok(()) => started += 1,
                Err(error) => {
                    warn!(plugin = plugin.id, %error, "Unable to start plugin.");
                }
            }
        }
        started
    }

    /// Start `plugin` as a child process and run its parse session on a
    /// dedicated thread.
    pub fn spawn_plugin(
        &mut self,
        plugin: &DiscoveredPlugin,
        sink: Box<dyn IngestSink>,
    ) -> io::Result<()> {
        let update_every = self.options.update_every;
        let mut child = Command::new(&plugin.path)
            .arg(update_every.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let command_line = format!("{} {update_every}", plugin.path.display());
        let record = Arc::new(PluginRecord::new(
            &plugin.id,
            &plugin.filename,
            plugin.path.clone(),
            command_line,
            update_every,
        ));
        record.set_pid(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("plugin stdout not captured"))?;
        let stdin = child.stdin.take();

        let session = CollectorSession::new(sink).trust_durations(self.options.trust_durations);
        let source = BufLineSource::new(BufReader::new(stdout));
        let mut parser = build_parser(session, Box::new(source), self.events.clone())
            .map_err(io::Error::other)?;
        if let Some(stdin) = stdin {
            parser.set_output(Box::new(stdin));
        }

        let threshold = self.options.serial_failure_threshold;
        let thread_record = Arc::clone(&record);
        let thread = thread::Builder::new()
            .name(format!("plugin-{}", plugin.id))
            .spawn(move || {
                let end = run_plugin(&thread_record, &mut parser, threshold);
                reap_child(child);
                end
            })?;

        info!(plugin = plugin.id, pid = record.pid(), "Started plugin session.");
        self.active.push(PluginHandle {
            record,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Retire every active plugin and nudge the children so blocked
    /// readers observe EOF.
    pub fn request_shutdown(&self) {
        for handle in &self.active {
            handle.record.retire();
            let pid = handle.record.pid();
            if pid != 0 {
                terminate(pid);
            }
        }
    }

    /// Join finished sessions and drop their records. Returns how many
    /// were reclaimed.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        self.active.retain_mut(|handle| {
            let finished = handle
                .thread
                .as_ref()
                .is_none_or(|thread| thread.is_finished());
            if finished {
                if let Some(thread) = handle.thread.take() {
                    let _ = thread.join();
                }
                reaped += 1;
                return false;
            }
            true
        });
        reaped
    }

    /// Block until every session thread has finished.
    pub fn join_all(mut self) {
        for handle in &mut self.active {
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
    }

    /// Number of plugins currently supervised.
    pub fn active_plugins(&self) -> usize {
        self.active.len()
    }

    /// The active plugin handles.
    pub fn handles(&self) -> &[PluginHandle] {
        &self.active
    }
}

fn reap_child(mut child: Child) {
    // the session is over either way; make sure the child is gone
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn touch(dir: &std::path::Path, name: &str) {
        File::create(dir.join(name)).expect("create file");
    }

    #[test]
    fn discovery_matches_the_suffix_and_earlier_directories_win() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        touch(first.path(), "apps.plugin");
        touch(first.path(), "notes.txt");
        touch(second.path(), "apps.plugin");
        touch(second.path(), "disk.plugin");

        let options = PluginsOptions {
            plugin_dirs: vec![first.path().to_owned(), second.path().to_owned()],
            ..Default::default()
        };
        let found = discover_plugins(&options);
        let ids: Vec<&str> = found.iter().map(|plugin| plugin.id.as_str()).collect();
        assert_eq!(ids, ["apps", "disk"]);
        let apps = found.iter().find(|plugin| plugin.id == "apps").expect("apps");
        assert!(apps.path.starts_with(first.path()));
    }

    #[test]
    fn discovery_skips_missing_directories() {
        let options = PluginsOptions {
            plugin_dirs: vec![PathBuf::from("/does/not/exist")],
            ..Default::default()
        };
        assert!(discover_plugins(&options).is_empty());
    }
}
