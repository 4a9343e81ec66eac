//! End-to-end scenarios over the collector wire protocol.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use collector_protocol::{BufLineSource, result_frame};
use indoc::indoc;
use similar_asserts::assert_eq;

use plugind::internal_events::{EmitMetrics, EventsHandle, ParserInternalEvents};
use plugind::parser::{FunctionOutcome, NextLine, Parser, ProcessOutcome, SessionError};
use plugind::sink::{
    Algorithm, ChartSpec, ChartType, DimensionSpec, HostSpec, Label, RecordingSink, SinkEvent,
    VariableScope,
};
use plugind::sources::plugins::{CollectorSession, build_parser};

fn session_over(input: &str) -> (RecordingSink, Parser<CollectorSession>) {
    session_with_events(input, Arc::new(EmitMetrics))
}

fn session_with_events(
    input: &str,
    events: EventsHandle,
) -> (RecordingSink, Parser<CollectorSession>) {
    let sink = RecordingSink::new();
    let session = CollectorSession::new(Box::new(sink.clone()));
    let source = BufLineSource::new(Cursor::new(input.as_bytes().to_vec()));
    let parser = build_parser(session, Box::new(source), events).expect("register builtins");
    (sink, parser)
}

enum RunEnd {
    Eof,
    Stop,
    Resource(SessionError),
}

fn drive(parser: &mut Parser<CollectorSession>) -> RunEnd {
    loop {
        match parser.next_line().expect("read") {
            NextLine::Eof => return RunEnd::Eof,
            NextLine::Line => match parser.process_one(None) {
                Ok(ProcessOutcome::Stop) => return RunEnd::Stop,
                Ok(_) => {}
                Err(error) => return RunEnd::Resource(error),
            },
        }
    }
}

#[test]
fn s1_basic_sample() {
    let input = indoc! {"
        CHART system.cpu '' 'Total CPU' '%' system system.cpu line 100 1 '' plugin module
        DIMENSION user '' incremental 1 1 ''
        BEGIN system.cpu 0
        SET user = 42
        END
    "};
    let (sink, mut parser) = session_over(input);
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Chart(ChartSpec {
                type_id: "system.cpu".to_owned(),
                name: String::new(),
                title: "Total CPU".to_owned(),
                units: "%".to_owned(),
                family: "system".to_owned(),
                context: "system.cpu".to_owned(),
                chart_type: ChartType::Line,
                priority: 100,
                update_every: Some(1),
                options: String::new(),
                plugin: "plugin".to_owned(),
                module: "module".to_owned(),
            }),
            SinkEvent::Dimension {
                chart: "system.cpu".to_owned(),
                spec: DimensionSpec {
                    id: "user".to_owned(),
                    name: String::new(),
                    algorithm: Algorithm::Incremental,
                    multiplier: 1,
                    divisor: 1,
                    options: String::new(),
                },
            },
            SinkEvent::BeginBatch {
                chart: "system.cpu".to_owned(),
                microseconds: None,
                trusted: false,
            },
            SinkEvent::SetValue {
                dimension: "user".to_owned(),
                value: 42,
            },
            SinkEvent::EndBatch,
        ]
    );
    assert_eq!(parser.user().batches_committed(), 1);
}

#[derive(Default)]
struct CountingEvents {
    unknown: Mutex<Vec<String>>,
}

impl ParserInternalEvents for CountingEvents {
    fn emit_worker_job_registered(&self, _: usize, _: &str) {}
    fn emit_worker_busy(&self, _: usize) {}
    fn emit_worker_idle(&self) {}
    fn emit_unknown_keyword(&self, keyword: &str) {
        self.unknown.lock().expect("lock").push(keyword.to_owned());
    }
    fn emit_line_truncated(&self, _: usize) {}
    fn emit_callback_failed(&self, _: &str) {}
    fn emit_deferred_overflow(&self, _: usize) {}
    fn emit_late_function_result(&self, _: &str) {}
    fn emit_function_timeout(&self, _: &str) {}
}

#[test]
fn s2_unknown_keyword_recovery() {
    let events = Arc::new(CountingEvents::default());
    let (sink, mut parser) =
        session_with_events("WOBBLE foo bar\nCHART a.b '' t u f c line 1 1 '' p m\n", events.clone());
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    assert_eq!(*events.unknown.lock().expect("lock"), ["WOBBLE"]);
    let charts: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SinkEvent::Chart(chart) => Some(chart.type_id),
            _ => None,
        })
        .collect();
    assert_eq!(charts, ["a.b"]);
}

#[test]
fn s3_function_round_trip() {
    let input = indoc! {r#"
        FUNCTION txn-1 5 get_version
        FUNCTION_RESULT_BEGIN "txn-1" 200 "text/plain" 1700000000
        v1.2.3
        FUNCTION_RESULT_END
    "#};
    let (sink, mut parser) = session_over(input);
    let registry = parser.inflight();
    assert!(matches!(drive(&mut parser), RunEnd::Eof));

    let requests: Vec<SinkEvent> = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, SinkEvent::FunctionInvoked(_)))
        .collect();
    let [SinkEvent::FunctionInvoked(request)] = &requests[..] else {
        panic!("expected exactly one invocation, got {requests:?}");
    };
    assert_eq!(request.transaction, "txn-1");
    assert_eq!(request.timeout, Duration::from_secs(5));
    assert_eq!(request.name, "get_version");

    let calls = sink.take_calls();
    assert_eq!(calls.len(), 1);
    match calls[0].try_outcome().expect("resolved") {
        FunctionOutcome::Completed(result) => {
            assert_eq!(result.status_code, 200);
            assert_eq!(result.content_type, "text/plain");
            assert_eq!(result.expires_unix, 1_700_000_000);
            assert_eq!(&result.payload[..], b"v1.2.3\n");
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(registry.is_empty());
}

#[test]
fn s4_deferred_overflow_tears_the_session_down() {
    let mut input = String::from(
        "FUNCTION txn-9 5 dump\nFUNCTION_RESULT_BEGIN \"txn-9\" 200 \"text/plain\" 0\n",
    );
    let chunk = "x".repeat(1_000_000);
    for _ in 0..12 {
        input.push_str(&chunk);
        input.push('\n');
    }
    let (sink, mut parser) = session_over(&input);
    let registry = parser.inflight();
    let end = drive(&mut parser);
    assert!(matches!(
        end,
        RunEnd::Resource(SessionError::DeferredOverflow)
    ));
    // the capture was feeding txn-9; its waiter is released right away
    let calls = sink.take_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].try_outcome(), Some(FunctionOutcome::Cancelled));
    assert!(registry.is_empty());
}

#[test]
fn label_staging_and_commits() {
    let input = indoc! {"
        LABEL rack r17 1
        LABEL region eu-west 1
        OVERWRITE
        CHART a.b '' t u f c line 1 1 '' p m
        CLABEL mount /var 2
        CLABEL_COMMIT
    "};
    let (sink, mut parser) = session_over(input);
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    let staged: Vec<SinkEvent> = sink
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                SinkEvent::HostLabels(_) | SinkEvent::ChartLabels { .. }
            )
        })
        .collect();
    assert_eq!(
        staged,
        vec![
            SinkEvent::HostLabels(vec![
                Label {
                    key: "rack".to_owned(),
                    value: "r17".to_owned(),
                    source: 1,
                },
                Label {
                    key: "region".to_owned(),
                    value: "eu-west".to_owned(),
                    source: 1,
                },
            ]),
            SinkEvent::ChartLabels {
                chart: "a.b".to_owned(),
                labels: vec![Label {
                    key: "mount".to_owned(),
                    value: "/var".to_owned(),
                    source: 2,
                }],
            },
        ]
    );
}

#[test]
fn host_switch_and_host_variables() {
    let input = indoc! {"
        HOST 9f5a1c2e web01 web01.example 1 linux UTC tag=a
        VARIABLE HOST answer = 42
    "};
    let (sink, mut parser) = session_over(input);
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::SwitchHost(HostSpec {
                machine_guid: "9f5a1c2e".to_owned(),
                hostname: "web01".to_owned(),
                registry_hostname: "web01.example".to_owned(),
                update_every: 1,
                os: "linux".to_owned(),
                timezone: "UTC".to_owned(),
                tags: "tag=a".to_owned(),
            }),
            SinkEvent::Variable {
                scope: VariableScope::Host,
                name: "answer".to_owned(),
                value: 42.0,
            },
        ]
    );
}

#[test]
fn uuid_keywords_reach_the_sink() {
    let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
    let input = format!("GUID {id}\nCONTEXT {id}\nTOMBSTONE {id}\nGUID not-a-uuid\n");
    let (sink, mut parser) = session_over(&input);
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    let parsed: uuid::Uuid = id.parse().expect("uuid");
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Guid(parsed),
            SinkEvent::Context(parsed),
            SinkEvent::Tombstone(parsed),
        ]
    );
}

#[test]
fn agent_written_result_frames_parse_back() {
    let mut frame = Vec::new();
    result_frame::write_result(
        &mut frame,
        "txn-7",
        200,
        "application/json",
        1_700_000_000,
        br#"{"ok":true}"#,
    )
    .expect("write");
    let input = format!(
        "FUNCTION txn-7 5 info\n{}",
        String::from_utf8(frame).expect("ascii")
    );
    let (sink, mut parser) = session_over(&input);
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    let calls = sink.take_calls();
    match calls[0].try_outcome().expect("resolved") {
        FunctionOutcome::Completed(result) => {
            assert_eq!(result.content_type, "application/json");
            assert_eq!(&result.payload[..], b"{\"ok\":true}\n");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[test]
fn unanswered_functions_time_out_on_sweep() {
    let (sink, mut parser) = session_over("FUNCTION slow 1 hang\n");
    let registry = parser.inflight();
    assert!(matches!(drive(&mut parser), RunEnd::Eof));
    assert_eq!(registry.len(), 1);

    let deadline = registry.smallest_deadline().expect("deadline");
    assert_eq!(registry.sweep(deadline - Duration::from_millis(500)), 0);
    assert_eq!(registry.sweep(deadline), 1);
    assert!(registry.is_empty());

    let calls = sink.take_calls();
    assert_eq!(calls[0].try_outcome(), Some(FunctionOutcome::TimedOut));
}

#[test]
fn carriage_returns_are_tolerated() {
    let input = "CHART a.b '' t u f c line 1 1 '' p m\r\nDISABLE\r\n";
    let (sink, mut parser) = session_over(input);
    assert!(matches!(drive(&mut parser), RunEnd::Stop));
    assert_eq!(sink.events().len(), 2);
    assert!(parser.user().disable_requested());
}
