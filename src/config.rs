//! Agent configuration, loadable from a TOML file.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::sources::plugins::PluginsOptions;

/// Top-level agent configuration. Every section has defaults, so an
/// empty file (or none at all) is valid.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Options of the plugins source.
    pub plugins: PluginsOptions,
}

/// An error raised while loading the configuration.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// Reading the file failed.
    #[snafu(display("unable to read {}: {source}", path.display()))]
    Read {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[snafu(display("unable to parse {}: {source}", path.display()))]
    Parse {
        /// The offending path.
        path: PathBuf,
        /// The TOML error.
        source: toml::de::Error,
    },
}

impl AgentConfig {
    /// Load the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        toml::from_str(&raw).context(ParseSnafu { path })
    }
}
