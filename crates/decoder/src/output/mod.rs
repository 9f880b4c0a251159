//! Output element staging.
//!
//! Resolution produces bursts of output elements that must survive
//! downstream backpressure. This module provides the staging stage between
//! the engine and the sink:
//! 1. **Slots:** A growable array of reusable element slots.
//! 2. **Cursors:** `cur` (next slot to write) and `send` (next to flush).
//! 3. **Persistence:** The PE context is copied forward on growth and
//!    reset, since context does not reset between elements.
//! 4. **Resumable flush:** A non-`Continue` sink response stops the send
//!    loop without touching cursors, so the same flush resumes later.

pub mod sink;

pub use sink::ElementSink;

use tracing::trace;

use crate::common::error::Response;
use crate::element::{ElementPayload, TraceElement};

/// Number of slots added on each growth step.
const GROW_SLOTS: usize = 4;

/// One staged element with the stream index it was generated at.
#[derive(Clone, Copy, Debug, Default)]
struct Staged {
    index: u64,
    elem: TraceElement,
}

/// Staging buffer between resolution and the downstream sink.
#[derive(Debug)]
pub struct OutputStaging {
    slots: Vec<Staged>,
    /// Next slot to write.
    cur: usize,
    /// Next slot to flush.
    send: usize,
    /// Live, unsent elements.
    pending: usize,
}

impl OutputStaging {
    /// Create a staging buffer with `initial_slots` pre-allocated slots.
    pub fn new(initial_slots: usize) -> Self {
        Self {
            slots: vec![Staged::default(); initial_slots.max(1)],
            cur: 0,
            send: 0,
            pending: 0,
        }
    }

    /// Number of live, unsent elements.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Reset the cursors, carrying persistent state into slot 0.
    ///
    /// The carry happens before the cursors move so the persistent source
    /// is the last slot actually written.
    pub fn reset(&mut self) {
        if self.cur > 0 {
            let prev = self.slots[self.cur - 1].elem;
            self.slots[0].elem.carry_persistent(&prev);
        }
        self.cur = 0;
        self.send = 0;
        self.pending = 0;
    }

    /// Stage a new element, growing the slot array if needed.
    ///
    /// The new slot inherits the persistent fields of its predecessor
    /// before the payload is set; the returned reference lets the caller
    /// override them (e.g. after a context update).
    pub fn append(&mut self, index: u64, payload: ElementPayload) -> &mut TraceElement {
        if self.cur == self.slots.len() {
            let grown = self.slots.len() + GROW_SLOTS;
            self.slots.resize(grown, Staged::default());
        }
        if self.cur > 0 {
            let prev = self.slots[self.cur - 1].elem;
            self.slots[self.cur].elem.carry_persistent(&prev);
        }
        let slot = &mut self.slots[self.cur];
        slot.index = index;
        slot.elem.payload = payload;
        self.cur += 1;
        self.pending += 1;
        &mut self.slots[self.cur - 1].elem
    }

    /// Send pending elements downstream until done or told to stop.
    ///
    /// Stops early on any non-`Continue` response without resetting the
    /// cursors, so a later call resumes with the next unsent element.
    /// Resets the cursors once everything pending has been delivered.
    /// Calling with nothing pending is a no-op returning `Continue`.
    pub fn flush<S: ElementSink>(&mut self, sink: &mut S, trace_id: u8) -> Response {
        let mut resp = Response::Continue;
        while self.pending > 0 {
            let staged = &self.slots[self.send];
            let r = sink.accept(staged.index, trace_id, &staged.elem);
            trace!(index = staged.index, elem = %staged.elem, ?r, "sent element");
            match r {
                Response::Continue | Response::WarnContinue => {
                    resp = resp.worst(r);
                    self.send += 1;
                    self.pending -= 1;
                }
                Response::Wait | Response::Fatal(_) => return r,
            }
        }
        self.reset();
        resp
    }
}
