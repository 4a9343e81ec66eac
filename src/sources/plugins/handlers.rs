//! The builtin keyword handlers: they bind protocol lines to the ingest
//! sink and keep the per-session collector state (current chart, open
//! batch, staged labels).

use std::time::Duration;

use collector_protocol::{FUNCTION_TIMEOUT_DEFAULT, keywords};
use tracing::{debug, warn};

use crate::internal_events::EventsHandle;
use crate::parser::inflight::FunctionResult;
use crate::parser::{
    CallbackOutcome, DeferOutcome, LineFields, Parser, RegisterError, SessionControls,
};
use crate::sink::{
    Algorithm, ChartSpec, ChartType, DimensionSpec, FunctionRequest, HostSpec, IngestSink, Label,
    SinkRejection, VariableScope,
};

/// Per-session collector state, carried as the parser's user handle.
pub struct CollectorSession {
    sink: Box<dyn IngestSink>,
    current_chart: Option<String>,
    batch_chart: Option<String>,
    staged_host_labels: Vec<Label>,
    staged_chart_labels: Vec<Label>,
    trust_durations: bool,
    charts_declared: u64,
    batches_committed: u64,
    disable_requested: bool,
}

impl CollectorSession {
    /// Wrap `sink` in a fresh session.
    pub fn new(sink: Box<dyn IngestSink>) -> Self {
        Self {
            sink,
            current_chart: None,
            batch_chart: None,
            staged_host_labels: Vec::new(),
            staged_chart_labels: Vec::new(),
            trust_durations: false,
            charts_declared: 0,
            batches_committed: 0,
            disable_requested: false,
        }
    }

    /// Honor the plugin's measured batch gaps.
    pub fn trust_durations(mut self, trust: bool) -> Self {
        self.trust_durations = trust;
        self
    }

    /// Sample batches committed this session.
    pub fn batches_committed(&self) -> u64 {
        self.batches_committed
    }

    /// Charts declared this session.
    pub fn charts_declared(&self) -> u64 {
        self.charts_declared
    }

    /// Whether the plugin asked to be disabled.
    pub fn disable_requested(&self) -> bool {
        self.disable_requested
    }
}

/// Build a parser over `source` with every builtin keyword registered.
pub fn build_parser(
    session: CollectorSession,
    source: Box<dyn collector_protocol::LineSource>,
    events: EventsHandle,
) -> Result<Parser<CollectorSession>, RegisterError> {
    let mut parser = Parser::new(session, source, events);
    register_builtins(&mut parser)?;
    Ok(parser)
}

/// Register the protocol keywords on `parser`, in the canonical order.
pub fn register_builtins(parser: &mut Parser<CollectorSession>) -> Result<(), RegisterError> {
    parser.register(keywords::FLUSH, flush)?;
    parser.register(keywords::CHART, chart)?;
    parser.register(keywords::DIMENSION, dimension)?;
    parser.register(keywords::DISABLE, disable)?;
    parser.register(keywords::VARIABLE, variable)?;
    parser.register(keywords::LABEL, label)?;
    parser.register(keywords::OVERWRITE, overwrite)?;
    parser.register(keywords::END, end)?;
    parser.register(keywords::CLABEL_COMMIT, clabel_commit)?;
    parser.register(keywords::CLABEL, clabel)?;
    parser.register(keywords::BEGIN, begin)?;
    parser.register(keywords::SET, set)?;
    parser.register(keywords::HOST, host)?;
    parser.register(keywords::GUID, guid)?;
    parser.register(keywords::CONTEXT, context)?;
    parser.register(keywords::TOMBSTONE, tombstone)?;
    parser.register(keywords::FUNCTION, function)?;
    parser.register(keywords::FUNCTION_RESULT_BEGIN, function_result_begin)?;
    Ok(())
}

type Controls = SessionControls<CollectorSession>;

fn reject(keyword: &str, reason: &str) -> CallbackOutcome {
    warn!(
        message = "Rejected line.",
        keyword,
        reason,
        internal_log_rate_limit = true
    );
    CallbackOutcome::Error
}

fn apply(keyword: &str, result: Result<(), SinkRejection>) -> CallbackOutcome {
    match result {
        Ok(()) => CallbackOutcome::Ok,
        Err(error) => {
            warn!(
                message = "Sink rejected line.",
                keyword,
                %error,
                internal_log_rate_limit = true
            );
            CallbackOutcome::Error
        }
    }
}

fn nonempty<'a>(fields: &LineFields<'a>, index: usize) -> Option<&'a str> {
    fields.get(index).filter(|field| !field.is_empty())
}

fn text(fields: &LineFields<'_>, index: usize) -> String {
    fields.get(index).unwrap_or_default().to_owned()
}

/// A numeric field: `Ok(None)` when absent or empty, `Err` when present
/// but malformed.
fn number<T: std::str::FromStr>(fields: &LineFields<'_>, index: usize) -> Result<Option<T>, ()> {
    match nonempty(fields, index) {
        None => Ok(None),
        Some(field) => field.parse().map(Some).map_err(|_| ()),
    }
}

fn chart(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(type_id) = nonempty(fields, 1) else {
        return reject(keywords::CHART, "missing chart id");
    };
    let Ok(priority) = number::<i32>(fields, 8) else {
        return reject(keywords::CHART, "malformed priority");
    };
    let Ok(update_every) = number::<u32>(fields, 9) else {
        return reject(keywords::CHART, "malformed update_every");
    };
    let spec = ChartSpec {
        type_id: type_id.to_owned(),
        name: text(fields, 2),
        title: text(fields, 3),
        units: text(fields, 4),
        family: text(fields, 5),
        context: text(fields, 6),
        chart_type: ChartType::parse(fields.get(7).unwrap_or_default()),
        priority: priority.unwrap_or(1000),
        update_every,
        options: text(fields, 10),
        plugin: text(fields, 11),
        module: text(fields, 12),
    };
    session.current_chart = Some(type_id.to_owned());
    session.charts_declared += 1;
    apply(keywords::CHART, session.sink.chart(spec))
}

fn dimension(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(chart) = session.current_chart.clone() else {
        return reject(keywords::DIMENSION, "no chart declared");
    };
    let Some(id) = nonempty(fields, 1) else {
        return reject(keywords::DIMENSION, "missing dimension id");
    };
    let Ok(multiplier) = number::<i64>(fields, 4) else {
        return reject(keywords::DIMENSION, "malformed multiplier");
    };
    let Ok(divisor) = number::<i64>(fields, 5) else {
        return reject(keywords::DIMENSION, "malformed divisor");
    };
    let spec = DimensionSpec {
        id: id.to_owned(),
        name: text(fields, 2),
        algorithm: Algorithm::parse(fields.get(3).unwrap_or_default()),
        multiplier: multiplier.filter(|&m| m != 0).unwrap_or(1),
        divisor: divisor.filter(|&d| d != 0).unwrap_or(1),
        options: text(fields, 6),
    };
    apply(keywords::DIMENSION, session.sink.dimension(&chart, spec))
}

fn begin(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(chart) = nonempty(fields, 1) else {
        return reject(keywords::BEGIN, "missing chart id");
    };
    if session.batch_chart.is_some() {
        return reject(keywords::BEGIN, "a batch is already open");
    }
    let Ok(microseconds) = number::<u64>(fields, 2) else {
        return reject(keywords::BEGIN, "malformed microseconds");
    };
    let microseconds = microseconds.filter(|&gap| gap > 0);
    match session
        .sink
        .begin_batch(chart, microseconds, session.trust_durations)
    {
        Ok(()) => {
            session.batch_chart = Some(chart.to_owned());
            CallbackOutcome::Ok
        }
        Err(error) => apply(keywords::BEGIN, Err(error)),
    }
}

fn set(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    if session.batch_chart.is_none() {
        return reject(keywords::SET, "SET before BEGIN");
    }
    let Some(dimension) = nonempty(fields, 1) else {
        return reject(keywords::SET, "missing dimension id");
    };
    let value_index = if fields.get(2) == Some("=") { 3 } else { 2 };
    let Some(value) = nonempty(fields, value_index) else {
        return reject(keywords::SET, "missing value");
    };
    let Ok(value) = value.parse::<i64>() else {
        return reject(keywords::SET, "malformed value");
    };
    apply(keywords::SET, session.sink.set_value(dimension, value))
}

fn end(
    _fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    if session.batch_chart.take().is_none() {
        return reject(keywords::END, "END without BEGIN");
    }
    match session.sink.end_batch() {
        Ok(()) => {
            session.batches_committed += 1;
            CallbackOutcome::Ok
        }
        Err(error) => apply(keywords::END, Err(error)),
    }
}

fn flush(
    _fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    if session.batch_chart.take().is_some() {
        apply(keywords::FLUSH, session.sink.flush_batch())
    } else {
        CallbackOutcome::Ok
    }
}

fn disable(
    _fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    debug!("Plugin requested disablement.");
    session.disable_requested = true;
    session.sink.disable();
    CallbackOutcome::Stop
}

fn variable(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let (scope, mut index) = match fields.get(1) {
        Some("HOST") | Some("GLOBAL") => (VariableScope::Host, 2),
        Some("CHART") | Some("LOCAL") => (VariableScope::Chart, 2),
        _ => (VariableScope::Chart, 1),
    };
    let Some(name) = nonempty(fields, index) else {
        return reject(keywords::VARIABLE, "missing variable name");
    };
    index += 1;
    if fields.get(index) == Some("=") {
        index += 1;
    }
    let Some(value) = nonempty(fields, index) else {
        return reject(keywords::VARIABLE, "missing value");
    };
    let Ok(value) = value.parse::<f64>() else {
        return reject(keywords::VARIABLE, "malformed value");
    };
    if scope == VariableScope::Chart && session.current_chart.is_none() {
        return reject(keywords::VARIABLE, "chart-scoped variable before CHART");
    }
    apply(keywords::VARIABLE, session.sink.variable(scope, name, value))
}

fn staged_label(fields: &LineFields<'_>, keyword: &str) -> Result<Label, CallbackOutcome> {
    let Some(key) = nonempty(fields, 1) else {
        return Err(reject(keyword, "missing label key"));
    };
    let Ok(source) = number::<u32>(fields, 3) else {
        return Err(reject(keyword, "malformed label source"));
    };
    Ok(Label {
        key: key.to_owned(),
        value: text(fields, 2),
        source: source.unwrap_or(0),
    })
}

fn label(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    match staged_label(fields, keywords::LABEL) {
        Ok(label) => {
            session.staged_host_labels.push(label);
            CallbackOutcome::Ok
        }
        Err(outcome) => outcome,
    }
}

fn overwrite(
    _fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let labels = std::mem::take(&mut session.staged_host_labels);
    apply(keywords::OVERWRITE, session.sink.replace_host_labels(labels))
}

fn clabel(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    match staged_label(fields, keywords::CLABEL) {
        Ok(label) => {
            session.staged_chart_labels.push(label);
            CallbackOutcome::Ok
        }
        Err(outcome) => outcome,
    }
}

fn clabel_commit(
    _fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(chart) = session.current_chart.clone() else {
        return reject(keywords::CLABEL_COMMIT, "no chart declared");
    };
    let labels = std::mem::take(&mut session.staged_chart_labels);
    apply(
        keywords::CLABEL_COMMIT,
        session.sink.commit_chart_labels(&chart, labels),
    )
}

fn host(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(machine_guid) = nonempty(fields, 1) else {
        return reject(keywords::HOST, "missing machine guid");
    };
    let Some(hostname) = nonempty(fields, 2) else {
        return reject(keywords::HOST, "missing hostname");
    };
    let Ok(update_every) = number::<u32>(fields, 4) else {
        return reject(keywords::HOST, "malformed update_every");
    };
    let spec = HostSpec {
        machine_guid: machine_guid.to_owned(),
        hostname: hostname.to_owned(),
        registry_hostname: text(fields, 3),
        update_every: update_every.unwrap_or(1),
        os: text(fields, 5),
        timezone: text(fields, 6),
        tags: text(fields, 7),
    };
    apply(keywords::HOST, session.sink.switch_host(spec))
}

fn parse_uuid(fields: &LineFields<'_>) -> Option<uuid::Uuid> {
    nonempty(fields, 1)?.parse().ok()
}

fn guid(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(id) = parse_uuid(fields) else {
        return reject(keywords::GUID, "malformed uuid");
    };
    apply(keywords::GUID, session.sink.guid(id))
}

fn context(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(id) = parse_uuid(fields) else {
        return reject(keywords::CONTEXT, "malformed uuid");
    };
    apply(keywords::CONTEXT, session.sink.context(id))
}

fn tombstone(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    _controls: &mut Controls,
) -> CallbackOutcome {
    let Some(id) = parse_uuid(fields) else {
        return reject(keywords::TOMBSTONE, "malformed uuid");
    };
    apply(keywords::TOMBSTONE, session.sink.tombstone(id))
}

fn function(
    fields: &LineFields<'_>,
    session: &mut CollectorSession,
    controls: &mut Controls,
) -> CallbackOutcome {
    let Some(transaction) = nonempty(fields, 1) else {
        return reject(keywords::FUNCTION, "missing transaction id");
    };
    let Ok(timeout) = number::<u64>(fields, 2) else {
        return reject(keywords::FUNCTION, "malformed timeout");
    };
    let timeout = timeout.filter(|&secs| secs > 0).map(Duration::from_secs);
    let Some(name) = nonempty(fields, 3) else {
        return reject(keywords::FUNCTION, "missing function name");
    };
    let args: Vec<String> = (4..fields.len())
        .filter_map(|index| fields.get(index))
        .map(ToOwned::to_owned)
        .collect();

    let call = match controls.inflight().open(transaction, timeout) {
        Ok(call) => call,
        Err(error) => {
            warn!(
                message = "Unable to open function call.",
                keyword = keywords::FUNCTION,
                %error,
                internal_log_rate_limit = true
            );
            return CallbackOutcome::Error;
        }
    };
    let request = FunctionRequest {
        transaction: transaction.to_owned(),
        timeout: timeout.unwrap_or(FUNCTION_TIMEOUT_DEFAULT),
        name: name.to_owned(),
        args,
    };
    session.sink.function_invoked(request, call);
    CallbackOutcome::Ok
}

fn function_result_begin(
    fields: &LineFields<'_>,
    _session: &mut CollectorSession,
    controls: &mut Controls,
) -> CallbackOutcome {
    let Some(transaction) = nonempty(fields, 1) else {
        return reject(keywords::FUNCTION_RESULT_BEGIN, "missing transaction id");
    };
    let Ok(status_code) = number::<u16>(fields, 2) else {
        return reject(keywords::FUNCTION_RESULT_BEGIN, "malformed status code");
    };
    let Ok(expires_unix) = number::<i64>(fields, 4) else {
        return reject(keywords::FUNCTION_RESULT_BEGIN, "malformed expiry");
    };
    let content_type = text(fields, 3);
    let transaction = transaction.to_owned();
    let registry = controls.inflight().clone();

    controls.defer_until_keyword(
        keywords::FUNCTION_RESULT_END,
        Box::new(move |_session, _controls, outcome| match outcome {
            DeferOutcome::Completed(payload) => registry.deliver(
                &transaction,
                FunctionResult {
                    status_code: status_code.unwrap_or(200),
                    content_type,
                    expires_unix: expires_unix.unwrap_or(0),
                    payload,
                },
            ),
            DeferOutcome::Overflow { .. } => {
                // release the waiter right away instead of letting the
                // entry ride out its deadline
                registry.cancel(&transaction);
            }
        }),
    );
    CallbackOutcome::Ok
}
