//! Deferred multi-line capture.
//!
//! An action callback may declare "collect subsequent raw lines until
//! end-keyword K". While a capture is active the dispatcher routes whole
//! lines into the response buffer instead of tokenizing them; the
//! completion action fires when K is seen, or with an overflow status
//! when the buffer outgrows its cap.

use bytes::{Bytes, BytesMut};

use super::SessionControls;

/// How a deferred capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferOutcome {
    /// The end keyword arrived; the accumulated payload is attached.
    /// Every captured line appears newline-terminated, in arrival order.
    Completed(Bytes),
    /// The buffer passed the cap before the end keyword showed up.
    Overflow {
        /// Bytes accumulated when the capture was aborted.
        buffered: usize,
    },
}

/// Completion action of a deferred capture.
pub type DeferAction<U> = Box<dyn FnOnce(&mut U, &mut SessionControls<U>, DeferOutcome) + Send>;

pub(super) struct DeferredCapture<U> {
    pub end_keyword: String,
    pub response: BytesMut,
    pub action: DeferAction<U>,
}

impl<U> DeferredCapture<U> {
    pub fn new(end_keyword: String, action: DeferAction<U>) -> Self {
        Self {
            end_keyword,
            response: BytesMut::new(),
            action,
        }
    }
}
