//! Generic output trace elements.
//!
//! This module defines what the decoder produces: architecture-neutral
//! trace elements a downstream consumer (printer, profiler, correlator)
//! understands without knowing the ETMv4 packet protocol:
//! 1. **`TraceElement`:** One output element plus the persistent PE context.
//! 2. **`ElementPayload`:** The closed set of element payloads.
//! 3. **`PeContext`:** The cross-element state carried forward between
//!    elements, staging slots and staging resets.

use std::fmt;

use crate::common::types::{ExceptionLevel, Isa, SecurityLevel};
use crate::instruction::{InstrSubType, InstrType};
use crate::packet::MarkerKind;

/// Why the decoder lost (or never had) synchronization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UnsyncReason {
    /// Not known.
    #[default]
    Unknown,
    /// Decoder freshly created; nothing decoded yet.
    InitDecoder,
    /// Decoder was explicitly reset.
    ResetDecoder,
    /// Trace buffer overflow reported by the stream.
    Overflow,
    /// Explicit discard packet.
    Discard,
    /// A bad packet forced a resync (lenient mode).
    BadPacket,
    /// End of trace data.
    EndOfTrace,
}

/// Why a trace-on element was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TraceOnReason {
    /// Normal trace start or restart.
    #[default]
    Normal,
    /// Restart after a trace buffer overflow.
    Overflow,
}

/// Persistent PE state carried across output elements.
///
/// Context does not reset between elements: every element reports the
/// context in effect when it was generated, so staging must copy this
/// record forward whenever it grows or resets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PeContext {
    /// Security state.
    pub security: SecurityLevel,
    /// Exception level.
    pub el: ExceptionLevel,
    /// True if executing with 64-bit addressing.
    pub bits64: bool,
    /// Context ID, if known.
    pub context_id: Option<u32>,
    /// Virtual machine ID, if known.
    pub vmid: Option<u32>,
    /// Instruction set in effect.
    pub isa: Isa,
}

/// An executed instruction range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct InstrRange {
    /// First executed address (inclusive).
    pub start: u64,
    /// End of the range (exclusive: address after the last instruction).
    pub end: u64,
    /// Instruction set of the range.
    pub isa: Isa,
    /// Number of instructions executed in the range.
    pub num_instr: u32,
    /// Classification of the final instruction.
    pub last_type: InstrType,
    /// Sub-classification of the final instruction.
    pub last_sub_type: InstrSubType,
    /// Size in bytes of the final instruction.
    pub last_size: u8,
    /// True if the final instruction was conditional.
    pub last_conditional: bool,
    /// True if the final instruction's control flow was taken.
    pub last_executed: bool,
}

/// Payload of one output element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ElementPayload {
    /// Freshly initialized slot; never delivered.
    #[default]
    Unknown,
    /// Synchronization lost, with the reason.
    NoSync(UnsyncReason),
    /// Trace turned on (or back on).
    TraceOn(TraceOnReason),
    /// End of the trace stream.
    EndOfTrace(UnsyncReason),
    /// PE context changed; the new context is in [`TraceElement::context`].
    PeContext,
    /// A range of executed instructions.
    InstrRange(InstrRange),
    /// Instructions executed along an unreported path.
    InstrRangeNoPath {
        /// Address the unreported path started at.
        start: u64,
        /// Number of instructions executed.
        count: u32,
    },
    /// Needed memory was not accessible to the decoder.
    AddrNacc {
        /// First inaccessible address.
        addr: u64,
    },
    /// Exception entry.
    Exception {
        /// Architectural exception number.
        number: u16,
        /// Preferred return address.
        ret_addr: u64,
        /// True if the last pre-exception address was a branch target.
        at_branch_target: bool,
    },
    /// Exception return marker.
    ExceptionReturn,
    /// Function return marker.
    FunctionReturn,
    /// Timestamp, optionally with an associated cycle count.
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
    /// Numbered event.
    Event {
        /// Event number (0-3).
        number: u8,
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

/// Fieldless mirror of [`ElementPayload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ElementKind {
    Unknown,
    NoSync,
    TraceOn,
    EndOfTrace,
    PeContext,
    InstrRange,
    InstrRangeNoPath,
    AddrNacc,
    Exception,
    ExceptionReturn,
    FunctionReturn,
    Timestamp,
    CycleCount,
    Event,
    Marker,
    Instrumentation,
}

/// One generic output element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TraceElement {
    /// The element payload.
    pub payload: ElementPayload,
    /// PE context in effect when the element was generated.
    pub context: PeContext,
}

impl TraceElement {
    /// Fieldless kind of this element.
    pub fn kind(&self) -> ElementKind {
        match self.payload {
            ElementPayload::Unknown => ElementKind::Unknown,
            ElementPayload::NoSync(_) => ElementKind::NoSync,
            ElementPayload::TraceOn(_) => ElementKind::TraceOn,
            ElementPayload::EndOfTrace(_) => ElementKind::EndOfTrace,
            ElementPayload::PeContext => ElementKind::PeContext,
            ElementPayload::InstrRange(_) => ElementKind::InstrRange,
            ElementPayload::InstrRangeNoPath { .. } => ElementKind::InstrRangeNoPath,
            ElementPayload::AddrNacc { .. } => ElementKind::AddrNacc,
            ElementPayload::Exception { .. } => ElementKind::Exception,
            ElementPayload::ExceptionReturn => ElementKind::ExceptionReturn,
            ElementPayload::FunctionReturn => ElementKind::FunctionReturn,
            ElementPayload::Timestamp { .. } => ElementKind::Timestamp,
            ElementPayload::CycleCount { .. } => ElementKind::CycleCount,
            ElementPayload::Event { .. } => ElementKind::Event,
            ElementPayload::Marker { .. } => ElementKind::Marker,
            ElementPayload::Instrumentation { .. } => ElementKind::Instrumentation,
        }
    }

    /// Copy the persistent fields from a predecessor element.
    ///
    /// Invoked by staging on slot growth and on reset; the timing relative
    /// to cursor movement is load-bearing, so this stays an explicit
    /// operation rather than part of construction.
    pub fn carry_persistent(&mut self, prev: &TraceElement) {
        self.context = prev.context;
    }
}

impl fmt::Display for TraceElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            ElementPayload::InstrRange(r) => write!(
                f,
                "InstrRange({:#x}..{:#x}, {} instr)",
                r.start, r.end, r.num_instr
            ),
            ElementPayload::NoSync(reason) => write!(f, "NoSync({reason:?})"),
            ElementPayload::Exception { number, ret_addr, .. } => {
                write!(f, "Exception(#{number}, ret {ret_addr:#x})")
            }
            other => write!(f, "{other:?}"),
        }
    }
}
