//! Speculative decode stack elements.
//!
//! Each element records one decoded packet whose effect on the output
//! stream is not yet known: it may still be committed, cancelled,
//! mispredicted or discarded. Elements are a closed sum over the payload
//! kinds, dispatched by pattern match.

use crate::common::types::{CoreProfile, ExceptionLevel};
use crate::packet::{AddressInfo, AtomRun, ContextInfo, MarkerKind, PacketType};

/// Payload of one speculative stack element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ElemPayload {
    /// Trace turned on; always pushed at the resolve end of the stack.
    TraceOn,
    /// A run of E/N predicates. Committable, one unit per predicate.
    Atom(AtomRun),
    /// An address element.
    Address(AddressInfo),
    /// A PE context element.
    Context(ContextInfo),
    /// Exception entry. Committable.
    Exception {
        /// Architectural exception number.
        number: u16,
        /// True if the previously-output address was a branch target.
        prev_addr_target: bool,
    },
    /// Exception return marker. Committable on the M profile only.
    ExceptionReturn,
    /// Function return marker. Committable on the M profile only.
    FunctionReturn,
    /// Q element. Committable.
    Q {
        /// Number of instructions executed, if known.
        count: Option<u32>,
        /// Resume address, if the packet carried one.
        addr: Option<AddressInfo>,
    },
    /// Numbered event.
    Event {
        /// Event number (0-3).
        number: u8,
    },
    /// Timestamp, optionally with a cycle count.
    Timestamp {
        /// Timestamp value.
        value: u64,
        /// Associated cycle count.
        cycle_count: Option<u32>,
    },
    /// Cycle count.
    CycleCount {
        /// Cycles since the previous counted element.
        count: u32,
    },
    /// Marker element.
    Marker {
        /// Marker type.
        kind: MarkerKind,
        /// Raw marker value.
        value: u32,
    },
    /// Instrumentation payload.
    Instrumentation {
        /// Exception level the instrumentation executed at.
        el: ExceptionLevel,
        /// Raw payload value.
        value: u64,
    },
}

/// One speculative stack element with its origin diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct StackElem {
    /// Packet kind that created the element.
    pub origin: PacketType,
    /// Stream index of that packet.
    pub index: u64,
    /// The element payload.
    pub payload: ElemPayload,
}

impl StackElem {
    /// True if this element counts against commit/cancel budgets.
    pub fn is_p0(&self, profile: CoreProfile) -> bool {
        self.p0_units(profile) > 0
    }

    /// Number of committable units this element currently holds.
    ///
    /// Atoms hold one unit per remaining predicate; exceptions and Q
    /// elements hold one; exception/function returns hold one on the
    /// Microcontroller profile; everything else holds none.
    pub fn p0_units(&self, profile: CoreProfile) -> u32 {
        match &self.payload {
            ElemPayload::Atom(run) => u32::from(run.count()),
            ElemPayload::Exception { .. } | ElemPayload::Q { .. } => 1,
            ElemPayload::ExceptionReturn | ElemPayload::FunctionReturn => {
                u32::from(profile == CoreProfile::Microcontroller)
            }
            _ => 0,
        }
    }

    /// True for commit-and-forget elements that survive a cancel.
    ///
    /// Events, timestamps and cycle counts describe points in time, not
    /// points on the speculative path, so cancelling the path keeps them.
    pub fn survives_cancel(&self) -> bool {
        matches!(
            self.payload,
            ElemPayload::Event { .. }
                | ElemPayload::Timestamp { .. }
                | ElemPayload::CycleCount { .. }
        )
    }
}
