//! Typed input packets.
//!
//! This module defines the decoder's input: typed records produced by the
//! raw packet lexer, one per architecturally-defined ETMv4 packet:
//! 1. **`TracePacket`:** A packet kind plus its monotonic stream index.
//! 2. **`AtomRun`:** The run-length-encoded E/N predicate container.
//! 3. **Payload records:** Address, context and trace-info field groups.
//!
//! The lexer itself is out of scope; it consolidates the wire-format
//! variants (short/long/exact-match addresses, atom formats 1-6, commit and
//! cancel formats) into the kinds below before the decode engine sees them.

use std::fmt;

use crate::common::types::{ExceptionLevel, Isa, SecurityLevel};

/// A single execution predicate from an atom packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Atom {
    /// The conditional execution point executed (E).
    Executed,
    /// The conditional execution point did not execute (N).
    NotExecuted,
}

/// Maximum number of predicates a single atom run can carry.
pub const ATOM_RUN_MAX: u8 = 32;

/// A run-length-encoded sequence of E/N execution predicates.
///
/// Bit 0 is the **oldest** predicate; a set bit means executed. Runs are
/// consumed from the oldest end by commit and trimmed from the newest end
/// by cancel, so both directions of speculation resolution operate on the
/// same container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AtomRun {
    bits: u32,
    count: u8,
}

impl AtomRun {
    /// Create a run from raw predicate bits (bit 0 = oldest).
    ///
    /// `count` is clamped to [`ATOM_RUN_MAX`]; bits above `count` are
    /// masked off.
    pub fn new(bits: u32, count: u8) -> Self {
        let count = count.min(ATOM_RUN_MAX);
        let bits = if count >= 32 {
            bits
        } else {
            bits & ((1u32 << count) - 1)
        };
        Self { bits, count }
    }

    /// Number of predicates remaining in the run.
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    /// True if no predicates remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Remove and return the oldest predicate.
    ///
    /// Returns `None` when the run is empty; the caller bounds the walk via
    /// [`count`][Self::count].
    pub fn commit_oldest(&mut self) -> Option<Atom> {
        if self.count == 0 {
            return None;
        }
        let atom = if self.bits & 1 != 0 {
            Atom::Executed
        } else {
            Atom::NotExecuted
        };
        self.bits >>= 1;
        self.count -= 1;
        Some(atom)
    }

    /// Remove up to `n` of the newest predicates without producing output.
    ///
    /// Returns the number actually removed (`min(n, count)`).
    pub fn cancel_newest(&mut self, n: u32) -> u32 {
        let removed = n.min(u32::from(self.count));
        self.count -= removed as u8;
        self.bits &= if self.count >= 32 {
            u32::MAX
        } else {
            (1u32 << self.count) - 1
        };
        removed
    }

    /// Flip the newest predicate in place.
    ///
    /// No-op on an empty run; the caller checks emptiness to distinguish a
    /// mispredict that found its atom from one that ran off the stack.
    pub fn mispredict_newest(&mut self) {
        if self.count > 0 {
            self.bits ^= 1 << (self.count - 1);
        }
    }
}

/// An address value established by an address or Q packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressInfo {
    /// Virtual address.
    pub addr: u64,
    /// Instruction set in effect at the address.
    pub isa: Isa,
    /// True if this is a branch source address rather than a target.
    pub is_source: bool,
}

impl AddressInfo {
    /// A target address in the given instruction set.
    pub fn target(addr: u64, isa: Isa) -> Self {
        Self {
            addr,
            isa,
            is_source: false,
        }
    }
}

/// PE context fields carried by a context packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ContextInfo {
    /// Context ID, if traced.
    pub context_id: Option<u32>,
    /// Virtual machine ID, if traced.
    pub vmid: Option<u32>,
    /// Security state.
    pub security: SecurityLevel,
    /// Exception level.
    pub el: ExceptionLevel,
    /// Instruction set in effect.
    pub isa: Isa,
    /// True if the PE is executing with 64-bit addressing.
    pub bits64: bool,
    /// True if the packet declares the context changed since last seen.
    pub updated: bool,
}

/// Static stream parameters delivered by a Trace-Info packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TraceInfo {
    /// Speculation depth at the sync point: the number of P0 elements the
    /// encoder had in flight that this decoder will never see.
    pub spec_depth: u32,
    /// True if cycle counting is enabled in this stream.
    pub cc_enabled: bool,
    /// Cycle-count threshold in use at the encoder.
    pub cc_threshold: u16,
}

/// Marker element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerKind {
    /// Timestamp marker.
    Timestamp,
}

/// One typed input packet.
#[derive(Clone, Debug, PartialEq)]
pub enum PacketKind {
    /// Alignment synchronization packet.
    Async,
    /// Trace-Info: establishes per-stream dynamic parameters.
    TraceInfo(TraceInfo),
    /// Trace enabled (or re-enabled after an overflow).
    TraceOn,
    /// Padding; carries nothing.
    Ignore,
    /// A run of E/N execution predicates.
    Atoms(AtomRun),
    /// An address element.
    Address(AddressInfo),
    /// A PE context element.
    Context(ContextInfo),
    /// Combined address + context element.
    AddressContext {
        /// The address part.
        addr: AddressInfo,
        /// The context part.
        ctxt: ContextInfo,
    },
    /// Exception entry.
    Exception {
        /// Architectural exception number.
        number: u16,
        /// True if the previously-output address was a branch target.
        previous_address_target: bool,
    },
    /// Exception return. A P0 element on the Microcontroller profile.
    ExceptionReturn,
    /// Function return. A P0 element on the Microcontroller profile.
    FunctionReturn,
    /// Q element: `count` instructions executed along an unreported path.
    Q {
        /// Number of instructions executed, if known.
        count: Option<u32>,
        /// Resume address, if the packet carried one.
        address: Option<AddressInfo>,
    },
    /// Event element (numbered trigger).
    Event {
        /// Event number (0-3).
        number: u8,
    },
    /// Timestamp, optionally paired with a cycle count.
    Timestamp {
        /// Timestamp value.
        value: u64,
        /// Associated cycle count, if the packet carried one.
        cycle_count: Option<u32>,
    },
    /// Cycle count.
    CycleCount {
        /// Cycles since the previous counted element.
        count: u32,
    },
    /// Commit the `count` oldest uncommitted P0 elements.
    Commit {
        /// Number of P0 elements to commit.
        count: u32,
    },
    /// Cancel the `count` newest uncommitted P0 elements.
    Cancel {
        /// Number of P0 elements to cancel.
        count: u32,
        /// True if the newest remaining atom was also mispredicted.
        mispredict: bool,
        /// Atoms implied by the packet, pushed after the cancel resolves.
        atoms: Option<AtomRun>,
    },
    /// The newest atom predicate was wrong; flip it.
    Mispredict {
        /// Atoms implied by the packet, pushed after the flip resolves.
        atoms: Option<AtomRun>,
    },
    /// Drop all speculative state and lose sync.
    Discard,
    /// Trace buffer overflow; drop all speculative state and lose sync.
    Overflow,
    /// Marker element.
    Marker {
        /// Marker type.
        kind: MarkerKind,
        /// Raw marker value.
        value: u32,
    },
    /// Instrumentation (ITE) payload.
    Instrumentation {
        /// Exception level the instrumentation executed at.
        el: ExceptionLevel,
        /// Raw payload value.
        value: u64,
    },
    /// Conditional instruction trace (recognized, not implemented).
    CondInstr,
    /// Conditional flush (recognized, not implemented).
    CondFlush,
    /// Conditional result (recognized, not implemented).
    CondResult,
    /// The lexer flagged an invalid packet sequence.
    BadSequence,
    /// The lexer saw a reserved encoding.
    Reserved,
}

impl PacketKind {
    /// Fieldless discriminant for diagnostics and stack-element tagging.
    pub fn ty(&self) -> PacketType {
        match self {
            Self::Async => PacketType::Async,
            Self::TraceInfo(_) => PacketType::TraceInfo,
            Self::TraceOn => PacketType::TraceOn,
            Self::Ignore => PacketType::Ignore,
            Self::Atoms(_) => PacketType::Atoms,
            Self::Address(_) => PacketType::Address,
            Self::Context(_) => PacketType::Context,
            Self::AddressContext { .. } => PacketType::AddressContext,
            Self::Exception { .. } => PacketType::Exception,
            Self::ExceptionReturn => PacketType::ExceptionReturn,
            Self::FunctionReturn => PacketType::FunctionReturn,
            Self::Q { .. } => PacketType::Q,
            Self::Event { .. } => PacketType::Event,
            Self::Timestamp { .. } => PacketType::Timestamp,
            Self::CycleCount { .. } => PacketType::CycleCount,
            Self::Commit { .. } => PacketType::Commit,
            Self::Cancel { .. } => PacketType::Cancel,
            Self::Mispredict { .. } => PacketType::Mispredict,
            Self::Discard => PacketType::Discard,
            Self::Overflow => PacketType::Overflow,
            Self::Marker { .. } => PacketType::Marker,
            Self::Instrumentation { .. } => PacketType::Instrumentation,
            Self::CondInstr => PacketType::CondInstr,
            Self::CondFlush => PacketType::CondFlush,
            Self::CondResult => PacketType::CondResult,
            Self::BadSequence => PacketType::BadSequence,
            Self::Reserved => PacketType::Reserved,
        }
    }
}

/// Fieldless mirror of [`PacketKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PacketType {
    Async,
    TraceInfo,
    TraceOn,
    Ignore,
    Atoms,
    Address,
    Context,
    AddressContext,
    Exception,
    ExceptionReturn,
    FunctionReturn,
    Q,
    Event,
    Timestamp,
    CycleCount,
    Commit,
    Cancel,
    Mispredict,
    Discard,
    Overflow,
    Marker,
    Instrumentation,
    CondInstr,
    CondFlush,
    CondResult,
    BadSequence,
    Reserved,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A typed packet with its position in the raw trace stream.
#[derive(Clone, Debug, PartialEq)]
pub struct TracePacket {
    /// Monotonic byte index of the packet in the raw stream.
    pub index: u64,
    /// The typed packet payload.
    pub kind: PacketKind,
}

impl TracePacket {
    /// Construct a packet at a stream index.
    pub fn new(index: u64, kind: PacketKind) -> Self {
        Self { index, kind }
    }
}
