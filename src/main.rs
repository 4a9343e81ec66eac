use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser as _, Subcommand};
use collector_protocol::{BufLineSource, LineSource};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plugind::config::AgentConfig;
use plugind::internal_events::EmitMetrics;
use plugind::parser::{NextLine, ProcessOutcome};
use plugind::sink::LoggingSink;
use plugind::sources::plugins::{CollectorSession, PluginSupervisor, build_parser};

#[derive(clap::Parser, Debug)]
#[command(
    name = "plugind",
    about = "Collector-protocol ingestion core for a time-series monitoring agent",
    version
)]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover plugins in the configured directories and supervise
    /// one parse session per plugin.
    Run,
    /// Parse a protocol capture and narrate the resulting actions.
    Parse {
        /// Capture file; stdin when omitted.
        file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => match AgentConfig::load(path) {
            Ok(config) => config,
            Err(error) => {
                error!(%error, "Unable to load configuration.");
                return ExitCode::FAILURE;
            }
        },
        None => AgentConfig::default(),
    };

    match cli.command {
        Command::Run => run(config),
        Command::Parse { file } => parse_capture(file),
    }
}

fn run(config: AgentConfig) -> ExitCode {
    let mut supervisor = PluginSupervisor::new(config.plugins, Arc::new(EmitMetrics));
    let started = supervisor.spawn_discovered(|| Box::new(LoggingSink::default()));
    if started == 0 {
        error!("No plugins started; nothing to supervise.");
        return ExitCode::FAILURE;
    }
    info!(plugins = started, "Supervising plugin sessions.");
    supervisor.join_all();
    ExitCode::SUCCESS
}

fn parse_capture(file: Option<PathBuf>) -> ExitCode {
    let source: Box<dyn LineSource> = match &file {
        Some(path) => match std::fs::File::open(path) {
            Ok(file) => Box::new(BufLineSource::new(BufReader::new(file))),
            Err(error) => {
                error!(file = %path.display(), %error, "Unable to open capture.");
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(BufLineSource::new(BufReader::new(io::stdin()))),
    };

    let session = CollectorSession::new(Box::new(LoggingSink::default()));
    let mut parser = match build_parser(session, source, Arc::new(EmitMetrics)) {
        Ok(parser) => parser,
        Err(error) => {
            error!(%error, "Unable to build the parser.");
            return ExitCode::FAILURE;
        }
    };

    loop {
        match parser.next_line() {
            Ok(NextLine::Line) => match parser.process_one(None) {
                Ok(ProcessOutcome::Stop) => break,
                Ok(_) => {}
                Err(error) => {
                    error!(%error, "Session aborted.");
                    return ExitCode::FAILURE;
                }
            },
            Ok(NextLine::Eof) => break,
            Err(error) => {
                error!(%error, "Read failed.");
                return ExitCode::FAILURE;
            }
        }
    }

    info!(
        lines = parser.line_number(),
        batches = parser.user().batches_committed(),
        "Capture parsed."
    );
    ExitCode::SUCCESS
}
