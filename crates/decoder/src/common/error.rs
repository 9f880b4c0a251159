//! Error taxonomy and in-band response codes.
//!
//! This module defines the error handling surface of the decoder:
//! 1. **`Error`:** Every condition that stops or degrades a decode.
//! 2. **`Response`:** The backpressure code threaded through element delivery.
//! 3. **`FatalKind`:** The closed set of fatal sink responses.
//!
//! Recoverable conditions (`UnsupportedIsa`, lenient bad packets) are
//! absorbed inside the engine and surface only as warnings; everything else
//! propagates as `Err` from the public entry points and requires a reset
//! before the decoder may be used again.

use thiserror::Error;

/// Decode errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Unknown, reserved or sequence-invalid packet.
    ///
    /// Fatal by default; with a lenient bad-packet policy the decoder resets
    /// to the unsynchronized state and reports a warning instead.
    #[error("bad packet at trace index {index}: {reason}")]
    BadPacket {
        /// Stream index of the offending packet.
        index: u64,
        /// What made the packet unacceptable.
        reason: &'static str,
    },

    /// Recognized but unimplemented packet (e.g. conditional/data trace).
    ///
    /// Warn-and-continue or fatal, per configuration.
    #[error("unsupported packet at trace index {index}: {reason}")]
    UnsupportedPacket {
        /// Stream index of the offending packet.
        index: u64,
        /// The unsupported feature.
        reason: &'static str,
    },

    /// Speculation stack underrun during commit, cancel or mispredict.
    ///
    /// Always fatal: the resolution request asked for more committable
    /// units than the stream ever produced, so either the encoder or the
    /// decoder has lost protocol state.
    #[error("speculation stack underrun at trace index {index} during {op}")]
    CommitOverrun {
        /// Stream index of the packet whose resolution failed.
        index: u64,
        /// The resolution operation that ran dry.
        op: &'static str,
    },

    /// An exception or Q element is missing its mandatory trailing address.
    #[error("bad packet sequence at trace index {index}: {reason}")]
    BadPacketSequence {
        /// Stream index of the packet whose resolution failed.
        index: u64,
        /// The element the sequence was missing.
        reason: &'static str,
    },

    /// The instruction decoder cannot classify the opcode at this address.
    ///
    /// Recoverable: the engine re-arms its need-address/need-context state
    /// and continues without emitting a range.
    #[error("instruction set not supported by the opcode decoder at {addr:#x}")]
    UnsupportedIsa {
        /// Address of the undecodable instruction.
        addr: u64,
    },

    /// A return address was required but the return stack had none.
    #[error("return address stack overflow")]
    ReturnStackOverflow,

    /// The memory-access collaborator failed outright.
    ///
    /// Distinct from a short read, which signals inaccessible memory and is
    /// handled by emitting an address-not-accessible element.
    #[error("memory access failed at {addr:#x}")]
    Memory {
        /// Faulting address.
        addr: u64,
    },

    /// The downstream sink returned a fatal response.
    #[error("sink returned fatal response {0:?}")]
    SinkFatal(FatalKind),
}

/// Fatal response sub-codes a sink may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalKind {
    /// Component not initialized.
    NotInit,
    /// Operation invalid in the current state.
    InvalidOp,
    /// Invalid parameter.
    InvalidParam,
    /// Data inconsistent with the protocol.
    InvalidData,
    /// Underlying system error.
    SysErr,
}

/// In-band flow-control response.
///
/// Returned by the sink for every delivered element and propagated upward
/// by the staging flush loop. Any non-`Continue` value unwinds the current
/// operation without touching cursors or pending-resolution counters, so
/// re-invoking the same top-level operation resumes exactly where delivery
/// stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Response {
    /// Element consumed; keep sending.
    Continue,
    /// Element consumed, with a warning; keep sending.
    WarnContinue,
    /// Sink is not ready; stop and retry the same operation later.
    Wait,
    /// Terminal failure; the decoder must be reset before reuse.
    Fatal(FatalKind),
}

impl Response {
    /// True for `Continue` and `WarnContinue`.
    #[inline]
    pub fn is_cont(self) -> bool {
        matches!(self, Self::Continue | Self::WarnContinue)
    }

    /// True for `Wait`.
    #[inline]
    pub fn is_wait(self) -> bool {
        matches!(self, Self::Wait)
    }

    /// True for any `Fatal` sub-code.
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Keep the more severe of two responses (fatal > wait > warn > cont).
    pub fn worst(self, other: Self) -> Self {
        let rank = |r: Self| match r {
            Self::Continue => 0,
            Self::WarnContinue => 1,
            Self::Wait => 2,
            Self::Fatal(_) => 3,
        };
        if rank(other) > rank(self) { other } else { self }
    }
}
