//! Internal observability events emitted by the parser machinery.

use std::sync::Arc;

use metrics::{counter, gauge};
use tracing::{debug, warn};

/// Every internal event the parser can raise has a corresponding method
/// in this trait which should emit the event. The production
/// implementation is [`EmitMetrics`]; tests install recording
/// implementations instead.
pub trait ParserInternalEvents: Send + Sync {
    /// A keyword was registered and assigned a worker job id.
    fn emit_worker_job_registered(&self, worker_job_id: usize, keyword: &str);

    /// Callbacks for a keyword are about to run.
    fn emit_worker_busy(&self, worker_job_id: usize);

    /// Callbacks for the current line finished.
    fn emit_worker_idle(&self);

    /// A line carried a keyword no callback is registered for.
    fn emit_unknown_keyword(&self, keyword: &str);

    /// A line hit the length cap and was truncated.
    fn emit_line_truncated(&self, length: usize);

    /// A callback rejected the current line.
    fn emit_callback_failed(&self, keyword: &str);

    /// A deferred capture outgrew its cap and was aborted.
    fn emit_deferred_overflow(&self, buffered: usize);

    /// A function result arrived for a transaction that is no longer
    /// (or never was) in flight; the payload was dropped.
    fn emit_late_function_result(&self, transaction: &str);

    /// An in-flight function call passed its deadline.
    fn emit_function_timeout(&self, transaction: &str);
}

/// Shared handle to the installed event implementation.
pub type EventsHandle = Arc<dyn ParserInternalEvents>;

/// Production events: counters and gauges through `metrics`, plus
/// rate-limited log lines for the conditions an operator can act on.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmitMetrics;

impl ParserInternalEvents for EmitMetrics {
    fn emit_worker_job_registered(&self, worker_job_id: usize, keyword: &str) {
        debug!(worker_job_id, keyword, "Registered parser worker job.");
    }

    fn emit_worker_busy(&self, worker_job_id: usize) {
        counter!("parser_dispatches_total", "worker_job_id" => worker_job_id.to_string())
            .increment(1);
        gauge!("parser_workers_busy").increment(1.0);
    }

    fn emit_worker_idle(&self) {
        gauge!("parser_workers_busy").decrement(1.0);
    }

    fn emit_unknown_keyword(&self, keyword: &str) {
        counter!("parser_unknown_keywords_total").increment(1);
        warn!(
            message = "Unknown keyword; discarding line.",
            keyword,
            internal_log_rate_limit = true
        );
    }

    fn emit_line_truncated(&self, length: usize) {
        counter!("parser_truncated_lines_total").increment(1);
        debug!(length, "Truncated an oversized line.");
    }

    fn emit_callback_failed(&self, keyword: &str) {
        counter!("parser_callback_failures_total", "keyword" => keyword.to_string()).increment(1);
    }

    fn emit_deferred_overflow(&self, buffered: usize) {
        counter!("parser_deferred_overflows_total").increment(1);
        warn!(
            message = "Deferred response exceeded its cap; aborting capture.",
            buffered
        );
    }

    fn emit_late_function_result(&self, transaction: &str) {
        counter!("parser_late_function_results_total").increment(1);
        debug!(transaction, "Dropped function result without a waiter.");
    }

    fn emit_function_timeout(&self, transaction: &str) {
        counter!("parser_function_timeouts_total").increment(1);
        debug!(transaction, "In-flight function call timed out.");
    }
}
