//! The in-flight function registry.
//!
//! Outstanding `FUNCTION` calls are correlated with their
//! `FUNCTION_RESULT_BEGIN … FUNCTION_RESULT_END` frames through this
//! table. Entries carry an absolute deadline; the registry keeps the
//! smallest deadline across pending entries so a sweeper can wake up
//! exactly when the next call can expire.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use collector_protocol::FUNCTION_TIMEOUT_DEFAULT;
use indexmap::IndexMap;
use snafu::Snafu;

use crate::internal_events::EventsHandle;

/// A decoded function result frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionResult {
    /// HTTP-style status code carried by the frame header.
    pub status_code: u16,
    /// Content type of the payload.
    pub content_type: String,
    /// Unix timestamp after which the payload is stale.
    pub expires_unix: i64,
    /// The raw payload captured between the frame markers.
    pub payload: Bytes,
}

/// Terminal state of an in-flight call, delivered to its waiter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FunctionOutcome {
    /// The plugin answered within the deadline.
    Completed(FunctionResult),
    /// The deadline passed before an answer arrived.
    TimedOut,
    /// The session went away (or the capture aborted) before an answer.
    Cancelled,
}

/// Waiter side of an in-flight call. Dropping the handle is harmless;
/// a late result is then dropped and counted by the registry.
#[derive(Debug)]
pub struct FunctionCall {
    transaction: String,
    receiver: Receiver<FunctionOutcome>,
}

impl FunctionCall {
    /// The transaction id this call is registered under.
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Block until the outcome arrives, up to `timeout`. `None` means
    /// the registry has not resolved the call yet.
    pub fn wait(&self, timeout: Duration) -> Option<FunctionOutcome> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Non-blocking probe for the outcome.
    pub fn try_outcome(&self) -> Option<FunctionOutcome> {
        self.receiver.try_recv().ok()
    }
}

/// Error returned when opening an entry fails.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum OpenError {
    /// The transaction id is already in flight.
    #[snafu(display("transaction {transaction} is already in flight"))]
    AlreadyExists {
        /// The offending transaction id.
        transaction: String,
    },
}

struct Entry {
    deadline: Instant,
    sender: Sender<FunctionOutcome>,
}

#[derive(Default)]
struct Registry {
    entries: IndexMap<String, Entry>,
    smallest_deadline: Option<Instant>,
    dropped_results: u64,
}

impl Registry {
    fn recompute_smallest_deadline(&mut self) {
        self.smallest_deadline = self.entries.values().map(|entry| entry.deadline).min();
    }
}

/// Handle to a session's in-flight function table. Clones share state;
/// the handle may be used from other threads (a timer thread driving
/// [`FunctionRegistry::sweep`], waiters collecting results).
#[derive(Clone)]
pub struct FunctionRegistry {
    inner: Arc<Mutex<Registry>>,
    events: EventsHandle,
}

impl FunctionRegistry {
    /// Create an empty registry reporting through `events`.
    pub fn new(events: EventsHandle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a pending entry for `transaction`. The default timeout
    /// applies when the caller does not name one.
    pub fn open(
        &self,
        transaction: &str,
        timeout: Option<Duration>,
    ) -> Result<FunctionCall, OpenError> {
        let timeout = timeout.unwrap_or(FUNCTION_TIMEOUT_DEFAULT);
        let deadline = Instant::now() + timeout;
        let mut registry = self.lock();
        if registry.entries.contains_key(transaction) {
            return AlreadyExistsSnafu { transaction }.fail();
        }
        let (sender, receiver) = channel();
        registry
            .entries
            .insert(transaction.to_owned(), Entry { deadline, sender });
        registry.smallest_deadline = Some(
            registry
                .smallest_deadline
                .map_or(deadline, |current| current.min(deadline)),
        );
        Ok(FunctionCall {
            transaction: transaction.to_owned(),
            receiver,
        })
    }

    /// Resolve `transaction` with a completed result. An absent entry
    /// (late or unknown result) drops the payload and counts the event.
    pub fn deliver(&self, transaction: &str, result: FunctionResult) {
        let mut registry = self.lock();
        match registry.entries.swap_remove(transaction) {
            Some(entry) => {
                let _ = entry.sender.send(FunctionOutcome::Completed(result));
                registry.recompute_smallest_deadline();
            }
            None => {
                registry.dropped_results += 1;
                self.events.emit_late_function_result(transaction);
            }
        }
    }

    /// Cancel a single entry. Returns whether one existed.
    pub fn cancel(&self, transaction: &str) -> bool {
        let mut registry = self.lock();
        match registry.entries.swap_remove(transaction) {
            Some(entry) => {
                let _ = entry.sender.send(FunctionOutcome::Cancelled);
                registry.recompute_smallest_deadline();
                true
            }
            None => false,
        }
    }

    /// Cancel every entry; used when the owning session ends.
    pub fn cancel_all(&self) {
        let mut registry = self.lock();
        for (_, entry) in registry.entries.drain(..) {
            let _ = entry.sender.send(FunctionOutcome::Cancelled);
        }
        registry.smallest_deadline = None;
    }

    /// Time out every entry whose deadline is at or before `now`.
    /// Returns how many entries expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut registry = self.lock();
        match registry.smallest_deadline {
            Some(deadline) if deadline <= now => {}
            _ => return 0,
        }
        let expired: Vec<String> = registry
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(transaction, _)| transaction.clone())
            .collect();
        for transaction in &expired {
            if let Some(entry) = registry.entries.swap_remove(transaction) {
                let _ = entry.sender.send(FunctionOutcome::TimedOut);
                self.events.emit_function_timeout(transaction);
            }
        }
        registry.recompute_smallest_deadline();
        expired.len()
    }

    /// The earliest deadline across pending entries, if any. Sweepers
    /// use it to avoid waking spuriously.
    pub fn smallest_deadline(&self) -> Option<Instant> {
        self.lock().smallest_deadline
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no call is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many results arrived without a waiter.
    pub fn dropped_results(&self) -> u64 {
        self.lock().dropped_results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::internal_events::EmitMetrics;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new(Arc::new(EmitMetrics))
    }

    fn result(payload: &str) -> FunctionResult {
        FunctionResult {
            status_code: 200,
            content_type: "text/plain".to_owned(),
            expires_unix: 0,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn duplicate_transactions_are_rejected() {
        let registry = registry();
        let _call = registry.open("tx", None).expect("first open");
        assert_eq!(
            registry.open("tx", None).expect_err("duplicate"),
            OpenError::AlreadyExists {
                transaction: "tx".to_owned()
            }
        );
        registry.cancel("tx");
        // removed entries free the id again
        registry.open("tx", None).expect("reopen after removal");
    }

    #[test]
    fn deliver_resolves_the_waiter_and_empties_the_registry() {
        let registry = registry();
        let call = registry.open("tx", None).expect("open");
        registry.deliver("tx", result("v1.2.3\n"));
        assert_eq!(
            call.try_outcome(),
            Some(FunctionOutcome::Completed(result("v1.2.3\n")))
        );
        assert!(registry.is_empty());
        assert_eq!(registry.smallest_deadline(), None);
    }

    #[test]
    fn late_results_are_dropped_and_counted() {
        let registry = registry();
        registry.deliver("ghost", result("ignored"));
        assert_eq!(registry.dropped_results(), 1);
    }

    #[test]
    fn sweep_times_out_due_entries_before_returning() {
        let registry = registry();
        let due = registry
            .open("due", Some(Duration::from_millis(1)))
            .expect("open");
        let pending = registry
            .open("pending", Some(Duration::from_secs(3600)))
            .expect("open");
        let now = Instant::now() + Duration::from_secs(1);
        assert_eq!(registry.sweep(now), 1);
        assert_eq!(due.try_outcome(), Some(FunctionOutcome::TimedOut));
        assert_eq!(pending.try_outcome(), None);
        assert_eq!(registry.len(), 1);
        // the surviving entry drives the wake-up deadline
        assert!(registry.smallest_deadline().expect("deadline") > now);
    }

    #[test]
    fn smallest_deadline_tracks_the_minimum() {
        let registry = registry();
        let _far = registry
            .open("far", Some(Duration::from_secs(3600)))
            .expect("open");
        let far_deadline = registry.smallest_deadline().expect("deadline");
        let _near = registry
            .open("near", Some(Duration::from_secs(1)))
            .expect("open");
        let near_deadline = registry.smallest_deadline().expect("deadline");
        assert!(near_deadline < far_deadline);
        registry.cancel("near");
        assert_eq!(registry.smallest_deadline(), Some(far_deadline));
    }

    #[test]
    fn cancel_all_notifies_every_waiter() {
        let registry = registry();
        let a = registry.open("a", None).expect("open");
        let b = registry.open("b", None).expect("open");
        registry.cancel_all();
        assert_eq!(a.try_outcome(), Some(FunctionOutcome::Cancelled));
        assert_eq!(b.try_outcome(), Some(FunctionOutcome::Cancelled));
        assert!(registry.is_empty());
    }
}
