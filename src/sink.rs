//! The seam between the parser and the time-series database.
//!
//! The database itself is an external collaborator; the parser drives it
//! through [`IngestSink`], an object-safe rendition of the action table
//! the protocol defines. Implementations must provide their own
//! synchronisation when shared across sessions.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snafu::Snafu;
use tracing::{debug, info};
use uuid::Uuid;

use crate::parser::inflight::FunctionCall;

/// A well-formed line the sink refuses to apply (for example `SET`
/// against a chart it does not know). Treated like a framing error: the
/// line is discarded and parsing continues.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct SinkRejection {
    message: String,
}

impl SinkRejection {
    /// Build a rejection carrying a human-readable reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Rendering style of a declared chart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChartType {
    /// Dimensions drawn as lines.
    #[default]
    Line,
    /// Dimensions drawn as filled areas.
    Area,
    /// Dimensions stacked on top of each other.
    Stacked,
}

impl ChartType {
    /// Parse the protocol spelling; anything unrecognized falls back to
    /// [`ChartType::Line`].
    pub fn parse(text: &str) -> Self {
        match text {
            "area" => Self::Area,
            "stacked" => Self::Stacked,
            _ => Self::Line,
        }
    }
}

/// How collected values of a dimension are turned into presented values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    /// Values are stored as collected.
    #[default]
    Absolute,
    /// Values are the difference of consecutive collections.
    Incremental,
    /// Values are a percentage of the absolute row total.
    PercentOfAbsoluteRow,
    /// Values are a percentage of the incremental row total.
    PercentOfIncrementalRow,
}

impl Algorithm {
    /// Parse the protocol spelling; anything unrecognized falls back to
    /// [`Algorithm::Absolute`].
    pub fn parse(text: &str) -> Self {
        match text {
            "incremental" => Self::Incremental,
            "percentage-of-absolute-row" => Self::PercentOfAbsoluteRow,
            "percentage-of-incremental-row" => Self::PercentOfIncrementalRow,
            _ => Self::Absolute,
        }
    }
}

/// A `CHART` declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChartSpec {
    /// Combined `type.id` naming the chart.
    pub type_id: String,
    /// Optional display name.
    pub name: String,
    /// Chart title.
    pub title: String,
    /// Unit label.
    pub units: String,
    /// Family the chart is grouped under.
    pub family: String,
    /// Context shared by charts of the same shape.
    pub context: String,
    /// Rendering style.
    pub chart_type: ChartType,
    /// Dashboard ordering priority.
    pub priority: i32,
    /// Collection cadence in seconds, when the plugin names one.
    pub update_every: Option<u32>,
    /// Raw options field.
    pub options: String,
    /// Name of the producing plugin.
    pub plugin: String,
    /// Name of the producing module inside the plugin.
    pub module: String,
}

/// A `DIMENSION` declaration on the current chart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionSpec {
    /// Dimension id, unique within its chart.
    pub id: String,
    /// Optional display name.
    pub name: String,
    /// Value transformation.
    pub algorithm: Algorithm,
    /// Multiplier applied to collected values.
    pub multiplier: i64,
    /// Divisor applied to collected values.
    pub divisor: i64,
    /// Raw options field.
    pub options: String,
}

impl Default for DimensionSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            algorithm: Algorithm::default(),
            multiplier: 1,
            divisor: 1,
            options: String::new(),
        }
    }
}

/// Scope of a `VARIABLE` assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableScope {
    /// Applies to the active host.
    Host,
    /// Applies to the current chart.
    Chart,
}

/// A staged label (host- or chart-scoped).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    /// Label key.
    pub key: String,
    /// Label value.
    pub value: String,
    /// Numeric source tag as sent on the wire.
    pub source: u32,
}

/// A `HOST` switch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// Stable machine GUID.
    pub machine_guid: String,
    /// Hostname as reported by the sender.
    pub hostname: String,
    /// Hostname registered upstream, when different.
    pub registry_hostname: String,
    /// Default collection cadence of the host.
    pub update_every: u32,
    /// Operating system tag.
    pub os: String,
    /// Timezone tag.
    pub timezone: String,
    /// Free-form tags.
    pub tags: String,
}

/// An inbound `FUNCTION` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionRequest {
    /// Transaction id correlating the eventual result.
    pub transaction: String,
    /// Deadline the caller granted.
    pub timeout: Duration,
    /// Function name.
    pub name: String,
    /// Remaining arguments.
    pub args: Vec<String>,
}

/// The operations the parsed stream drives on the time-series database.
///
/// Within one session the methods are called in exact line order; across
/// sessions calls interleave arbitrarily.
pub trait IngestSink: Send {
    /// Declare a chart.
    fn chart(&mut self, chart: ChartSpec) -> Result<(), SinkRejection>;

    /// Declare a dimension on `chart_id`.
    fn dimension(&mut self, chart_id: &str, dimension: DimensionSpec) -> Result<(), SinkRejection>;

    /// Open a sample batch on `chart_id`. `microseconds` is the gap the
    /// plugin measured since its previous batch; `trusted` says whether
    /// the session was configured to honor it.
    fn begin_batch(
        &mut self,
        chart_id: &str,
        microseconds: Option<u64>,
        trusted: bool,
    ) -> Result<(), SinkRejection>;

    /// Set one dimension value inside the open batch.
    fn set_value(&mut self, dimension_id: &str, value: i64) -> Result<(), SinkRejection>;

    /// Commit the open batch atomically.
    fn end_batch(&mut self) -> Result<(), SinkRejection>;

    /// Discard the open batch.
    fn flush_batch(&mut self) -> Result<(), SinkRejection>;

    /// The plugin asked to be disabled.
    fn disable(&mut self);

    /// Assign a variable in `scope`.
    fn variable(&mut self, scope: VariableScope, name: &str, value: f64)
    -> Result<(), SinkRejection>;

    /// Replace the host labels with `labels`.
    fn replace_host_labels(&mut self, labels: Vec<Label>) -> Result<(), SinkRejection>;

    /// Commit `labels` onto `chart_id`.
    fn commit_chart_labels(
        &mut self,
        chart_id: &str,
        labels: Vec<Label>,
    ) -> Result<(), SinkRejection>;

    /// Switch the active host for the rest of the session.
    fn switch_host(&mut self, host: HostSpec) -> Result<(), SinkRejection>;

    /// Record the sender's GUID.
    fn guid(&mut self, id: Uuid) -> Result<(), SinkRejection>;

    /// Record a context UUID.
    fn context(&mut self, id: Uuid) -> Result<(), SinkRejection>;

    /// Record a tombstoned UUID.
    fn tombstone(&mut self, id: Uuid) -> Result<(), SinkRejection>;

    /// A `FUNCTION` line opened `call`; the consumer owns the waiter and
    /// is expected to answer (or let it time out).
    fn function_invoked(&mut self, request: FunctionRequest, call: FunctionCall);
}

/// A sink that narrates every operation through `tracing`. Used by the
/// CLI to inspect captures without a database behind the parser.
#[derive(Debug, Default)]
pub struct LoggingSink {
    charts: u64,
    batches: u64,
}

impl IngestSink for LoggingSink {
    fn chart(&mut self, chart: ChartSpec) -> Result<(), SinkRejection> {
        self.charts += 1;
        info!(chart = chart.type_id, title = chart.title, "Declared chart.");
        Ok(())
    }

    fn dimension(&mut self, chart_id: &str, dimension: DimensionSpec) -> Result<(), SinkRejection> {
        info!(chart = chart_id, dimension = dimension.id, "Declared dimension.");
        Ok(())
    }

    fn begin_batch(
        &mut self,
        chart_id: &str,
        microseconds: Option<u64>,
        _trusted: bool,
    ) -> Result<(), SinkRejection> {
        debug!(chart = chart_id, microseconds, "Opened sample batch.");
        Ok(())
    }

    fn set_value(&mut self, dimension_id: &str, value: i64) -> Result<(), SinkRejection> {
        debug!(dimension = dimension_id, value, "Collected value.");
        Ok(())
    }

    fn end_batch(&mut self) -> Result<(), SinkRejection> {
        self.batches += 1;
        debug!(batches = self.batches, "Committed sample batch.");
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), SinkRejection> {
        debug!("Discarded sample batch.");
        Ok(())
    }

    fn disable(&mut self) {
        info!("Plugin requested disablement.");
    }

    fn variable(
        &mut self,
        scope: VariableScope,
        name: &str,
        value: f64,
    ) -> Result<(), SinkRejection> {
        info!(?scope, name, value, "Assigned variable.");
        Ok(())
    }

    fn replace_host_labels(&mut self, labels: Vec<Label>) -> Result<(), SinkRejection> {
        info!(count = labels.len(), "Replaced host labels.");
        Ok(())
    }

    fn commit_chart_labels(
        &mut self,
        chart_id: &str,
        labels: Vec<Label>,
    ) -> Result<(), SinkRejection> {
        info!(chart = chart_id, count = labels.len(), "Committed chart labels.");
        Ok(())
    }

    fn switch_host(&mut self, host: HostSpec) -> Result<(), SinkRejection> {
        info!(
            machine_guid = host.machine_guid,
            hostname = host.hostname,
            "Switched active host."
        );
        Ok(())
    }

    fn guid(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        info!(%id, "Recorded sender GUID.");
        Ok(())
    }

    fn context(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        info!(%id, "Recorded context UUID.");
        Ok(())
    }

    fn tombstone(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        info!(%id, "Recorded tombstoned UUID.");
        Ok(())
    }

    fn function_invoked(&mut self, request: FunctionRequest, _call: FunctionCall) {
        info!(
            transaction = request.transaction,
            function = request.name,
            "Function invoked; no executor attached."
        );
    }
}

/// Everything a [`RecordingSink`] observed, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    /// `chart` was called.
    Chart(ChartSpec),
    /// `dimension` was called.
    Dimension {
        /// Chart the dimension was declared on.
        chart: String,
        /// The declaration.
        spec: DimensionSpec,
    },
    /// `begin_batch` was called.
    BeginBatch {
        /// Chart the batch belongs to.
        chart: String,
        /// Measured gap since the previous batch.
        microseconds: Option<u64>,
        /// Whether the gap is honored.
        trusted: bool,
    },
    /// `set_value` was called.
    SetValue {
        /// Target dimension.
        dimension: String,
        /// Collected value.
        value: i64,
    },
    /// `end_batch` was called.
    EndBatch,
    /// `flush_batch` was called.
    FlushBatch,
    /// `disable` was called.
    Disable,
    /// `variable` was called.
    Variable {
        /// Assignment scope.
        scope: VariableScope,
        /// Variable name.
        name: String,
        /// Assigned value.
        value: f64,
    },
    /// `replace_host_labels` was called.
    HostLabels(Vec<Label>),
    /// `commit_chart_labels` was called.
    ChartLabels {
        /// Target chart.
        chart: String,
        /// Committed labels.
        labels: Vec<Label>,
    },
    /// `switch_host` was called.
    SwitchHost(HostSpec),
    /// `guid` was called.
    Guid(Uuid),
    /// `context` was called.
    Context(Uuid),
    /// `tombstone` was called.
    Tombstone(Uuid),
    /// `function_invoked` was called.
    FunctionInvoked(FunctionRequest),
}

/// A sink that records every operation for inspection. Clones share the
/// same log, so a copy can be kept outside the session that consumes the
/// sink.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    calls: Arc<Mutex<Vec<FunctionCall>>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the observed operations.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock_events().clone()
    }

    /// Take ownership of the function-call waiters opened so far.
    pub fn take_calls(&self) -> Vec<FunctionCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Vec<SinkEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: SinkEvent) {
        self.lock_events().push(event);
    }
}

impl fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSink")
            .field("events", &self.lock_events().len())
            .finish()
    }
}

impl IngestSink for RecordingSink {
    fn chart(&mut self, chart: ChartSpec) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Chart(chart));
        Ok(())
    }

    fn dimension(&mut self, chart_id: &str, dimension: DimensionSpec) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Dimension {
            chart: chart_id.to_owned(),
            spec: dimension,
        });
        Ok(())
    }

    fn begin_batch(
        &mut self,
        chart_id: &str,
        microseconds: Option<u64>,
        trusted: bool,
    ) -> Result<(), SinkRejection> {
        self.record(SinkEvent::BeginBatch {
            chart: chart_id.to_owned(),
            microseconds,
            trusted,
        });
        Ok(())
    }

    fn set_value(&mut self, dimension_id: &str, value: i64) -> Result<(), SinkRejection> {
        self.record(SinkEvent::SetValue {
            dimension: dimension_id.to_owned(),
            value,
        });
        Ok(())
    }

    fn end_batch(&mut self) -> Result<(), SinkRejection> {
        self.record(SinkEvent::EndBatch);
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), SinkRejection> {
        self.record(SinkEvent::FlushBatch);
        Ok(())
    }

    fn disable(&mut self) {
        self.record(SinkEvent::Disable);
    }

    fn variable(
        &mut self,
        scope: VariableScope,
        name: &str,
        value: f64,
    ) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Variable {
            scope,
            name: name.to_owned(),
            value,
        });
        Ok(())
    }

    fn replace_host_labels(&mut self, labels: Vec<Label>) -> Result<(), SinkRejection> {
        self.record(SinkEvent::HostLabels(labels));
        Ok(())
    }

    fn commit_chart_labels(
        &mut self,
        chart_id: &str,
        labels: Vec<Label>,
    ) -> Result<(), SinkRejection> {
        self.record(SinkEvent::ChartLabels {
            chart: chart_id.to_owned(),
            labels,
        });
        Ok(())
    }

    fn switch_host(&mut self, host: HostSpec) -> Result<(), SinkRejection> {
        self.record(SinkEvent::SwitchHost(host));
        Ok(())
    }

    fn guid(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Guid(id));
        Ok(())
    }

    fn context(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Context(id));
        Ok(())
    }

    fn tombstone(&mut self, id: Uuid) -> Result<(), SinkRejection> {
        self.record(SinkEvent::Tombstone(id));
        Ok(())
    }

    fn function_invoked(&mut self, request: FunctionRequest, call: FunctionCall) {
        self.record(SinkEvent::FunctionInvoked(request));
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}
