//! Decode engine.
//!
//! The engine drives the whole decode: it consumes one typed packet at a
//! time, stacks speculative elements, and resolves them into output
//! elements when control packets arrive:
//! 1. **FSM:** `NoSync → WaitSync → WaitTraceInfo → DecodePackets ⇄
//!    ResolveElements`; every unsync condition returns to `NoSync`.
//! 2. **Decode:** A total mapping from packet kind to a stack push or a
//!    pending-resolution request.
//! 3. **Resolution:** Commit, cancel, mispredict and discard, serviced in
//!    that fixed priority.
//! 4. **Backpressure:** Any non-`Continue` sink response unwinds the
//!    current call with all state intact; re-invoking the same operation
//!    resumes it.

pub mod ret_stack;

mod resolve;
mod walk;

pub use ret_stack::ReturnStack;

use tracing::{debug, trace, warn};

use crate::access::MemoryAccess;
use crate::common::error::{Error, Response};
use crate::common::types::{CoreProfile, Isa};
use crate::config::{BadPacketPolicy, DecoderConfig, UnsupportedPolicy};
use crate::element::{ElementPayload, PeContext, UnsyncReason};
use crate::instruction::InstructionDecoder;
use crate::output::{ElementSink, OutputStaging};
use crate::packet::{AtomRun, PacketKind, PacketType, TraceInfo, TracePacket};
use crate::stack::SpeculationStack;

/// Decode FSM state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DecodeState {
    /// Initial state and the state after any unsync condition.
    #[default]
    NoSync,
    /// Waiting for an alignment (A-Sync) packet.
    WaitSync,
    /// Waiting for a Trace-Info packet.
    WaitTraceInfo,
    /// Decoding packets onto the speculation stack.
    DecodePackets,
    /// Draining output and servicing pending resolution requests.
    ResolveElements,
}

/// Pending resolution requests set by control packets.
#[derive(Clone, Copy, Debug, Default)]
struct Pending {
    /// Commit this many of the oldest P0 units.
    commit: u32,
    /// Cancel this many of the newest P0 units.
    cancel: u32,
    /// Flip the newest atom predicate.
    mispredict: bool,
    /// Drop all speculative state and lose sync.
    discard: bool,
    /// Why the discard happened (overflow vs explicit).
    discard_reason: UnsyncReason,
    /// Atoms carried by a cancel/mispredict packet, pushed only after the
    /// cancel/flip resolves so the operation targets the pre-packet stack.
    post_atoms: Option<(AtomRun, PacketType)>,
}

impl Pending {
    fn any(&self) -> bool {
        self.commit > 0
            || self.cancel > 0
            || self.mispredict
            || self.discard
            || self.post_atoms.is_some()
    }
}

/// ETMv4 instruction-trace decode engine for a single trace-ID stream.
///
/// Generic over its three collaborators: the program memory reader `M`,
/// the opcode classifier `D`, and the output element sink `S`. One engine
/// instance owns all of its state; nothing is shared between instances.
#[derive(Debug)]
pub struct DecodeEngine<M, D, S> {
    cfg: DecoderConfig,
    mem: M,
    idec: D,
    sink: S,

    state: DecodeState,
    unsync_reason: UnsyncReason,
    stack: SpeculationStack,
    staging: OutputStaging,
    ret_stack: ReturnStack,
    pending: Pending,

    // Instruction-follow state.
    ctx: PeContext,
    need_addr: bool,
    need_ctxt: bool,
    instr_addr: u64,
    isa: Isa,

    // Speculation accounting.
    curr_spec_depth: u32,
    unseen_spec: u32,
    cc_threshold: u16,
    prev_overflow: bool,
    excep_pend_addr: bool,
    eot_staged: bool,

    /// Stream index of the packet currently being processed.
    index: u64,
}

impl<M, D, S> DecodeEngine<M, D, S>
where
    M: MemoryAccess,
    D: InstructionDecoder,
    S: ElementSink,
{
    /// Create an engine bound to one trace-ID stream.
    pub fn new(cfg: DecoderConfig, mem: M, idec: D, sink: S) -> Self {
        let staging = OutputStaging::new(cfg.staging_slots);
        let ret_stack = ReturnStack::new(cfg.return_stack);
        let cc_threshold = cfg.cc_threshold;
        Self {
            cfg,
            mem,
            idec,
            sink,
            state: DecodeState::NoSync,
            unsync_reason: UnsyncReason::InitDecoder,
            stack: SpeculationStack::new(),
            staging,
            ret_stack,
            pending: Pending::default(),
            ctx: PeContext::default(),
            need_addr: true,
            need_ctxt: true,
            instr_addr: 0,
            isa: Isa::Unknown,
            curr_spec_depth: 0,
            unseen_spec: 0,
            cc_threshold,
            prev_overflow: false,
            excep_pend_addr: false,
            eot_staged: false,
            index: 0,
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Current speculative depth (uncommitted P0 units, seen or unseen).
    pub fn spec_depth(&self) -> u32 {
        self.curr_spec_depth
    }

    /// Cycle-count threshold in effect (config or Trace-Info override).
    pub fn cc_threshold(&self) -> u16 {
        self.cc_threshold
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &DecoderConfig {
        &self.cfg
    }

    /// The downstream sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The downstream sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The memory-access collaborator, mutably (e.g. to add image regions
    /// as the traced program maps them).
    pub fn mem_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Process one typed packet.
    ///
    /// Returns `Wait` if the sink applied backpressure; the caller must
    /// re-invoke with the **same** packet once ready, and delivery resumes
    /// exactly where it stopped. Fatal errors leave the engine unusable
    /// until [`reset`][Self::reset].
    pub fn process_packet(&mut self, pkt: &TracePacket) -> Result<Response, Error> {
        self.index = pkt.index;

        // Resume any suspended delivery before touching the packet.
        if self.staging.pending() > 0 {
            let r = self.flush_staging()?;
            if r.is_wait() {
                return Ok(r);
            }
        }

        let mut worst = Response::Continue;
        let mut done = false;
        while !done {
            match self.state {
                DecodeState::NoSync => {
                    debug!(reason = ?self.unsync_reason, "unsynchronized");
                    let reason = self.unsync_reason;
                    let _ = self
                        .staging
                        .append(pkt.index, ElementPayload::NoSync(reason));
                    self.state = DecodeState::WaitSync;
                    let r = self.flush_staging()?;
                    if r.is_wait() {
                        return Ok(r);
                    }
                    worst = worst.worst(r);
                    // Loop: re-check the current packet in WaitSync.
                }
                DecodeState::WaitSync => {
                    if matches!(pkt.kind, PacketKind::Async) {
                        debug!("alignment sync found");
                        self.state = DecodeState::WaitTraceInfo;
                    } else {
                        trace!(kind = %pkt.kind.ty(), "discarded while waiting for sync");
                    }
                    done = true;
                }
                DecodeState::WaitTraceInfo => {
                    if let PacketKind::TraceInfo(info) = &pkt.kind {
                        self.apply_trace_info(info);
                        self.state = DecodeState::DecodePackets;
                    } else {
                        trace!(kind = %pkt.kind.ty(), "discarded while waiting for trace info");
                    }
                    done = true;
                }
                DecodeState::DecodePackets => match self.decode_packet(pkt) {
                    Ok(()) => {
                        if self.state != DecodeState::ResolveElements {
                            done = true;
                        }
                    }
                    Err(e) => {
                        worst = worst.worst(self.absorb_decode_error(e)?);
                        done = true;
                    }
                },
                DecodeState::ResolveElements => {
                    let r = self.resolve_elements()?;
                    if r.is_wait() {
                        return Ok(r);
                    }
                    worst = worst.worst(r);
                    done = true;
                }
            }
        }
        Ok(worst)
    }

    /// Flush at end of trace data.
    ///
    /// Emits any trailing event/timestamp/cycle-count elements still on the
    /// stack, then an end-of-trace element, and drops everything else. As
    /// with packets, `Wait` means re-invoke later to finish delivery.
    pub fn end_of_trace(&mut self, index: u64) -> Result<Response, Error> {
        self.index = index;
        if self.staging.pending() > 0 {
            let r = self.flush_staging()?;
            if r.is_wait() {
                return Ok(r);
            }
        }
        if !self.eot_staged {
            self.flush_eot(index);
            self.eot_staged = true;
        }
        let r = self.flush_staging()?;
        if r.is_wait() {
            return Ok(r);
        }
        self.eot_staged = false;
        Ok(r)
    }

    /// Resume element delivery after a `Wait`, without a new packet.
    pub fn flush(&mut self) -> Result<Response, Error> {
        if self.state == DecodeState::ResolveElements {
            return self.resolve_elements();
        }
        self.flush_staging()
    }

    /// Reset to the initial state (required after any fatal error).
    pub fn reset(&mut self) {
        self.stack.clear();
        self.staging = OutputStaging::new(self.cfg.staging_slots);
        self.ret_stack.flush();
        self.pending = Pending::default();
        self.ctx = PeContext::default();
        self.need_addr = true;
        self.need_ctxt = true;
        self.instr_addr = 0;
        self.isa = Isa::Unknown;
        self.curr_spec_depth = 0;
        self.unseen_spec = 0;
        self.cc_threshold = self.cfg.cc_threshold;
        self.prev_overflow = false;
        self.excep_pend_addr = false;
        self.eot_staged = false;
        self.state = DecodeState::NoSync;
        self.unsync_reason = UnsyncReason::ResetDecoder;
    }

    /// Decode one packet in `DecodePackets`: push stack elements or set
    /// pending-resolution requests. Total over every packet kind.
    fn decode_packet(&mut self, pkt: &TracePacket) -> Result<(), Error> {
        let index = pkt.index;
        let ty = pkt.kind.ty();
        trace!(kind = %ty, index, "decode packet");
        match &pkt.kind {
            // Mid-stream re-sync information; nothing to do.
            PacketKind::Async | PacketKind::TraceInfo(_) | PacketKind::Ignore => {}

            PacketKind::TraceOn => self.stack.push_trace_on(ty, index),

            PacketKind::Atoms(run) => {
                self.stack.push_atoms(*run, ty, index);
                self.bump_spec_depth(u32::from(run.count()));
            }

            PacketKind::Address(addr) => {
                self.stack.push_address(*addr, ty, index);
                self.count_exception_address();
            }

            PacketKind::Context(ctxt) => self.stack.push_context(*ctxt, ty, index),

            PacketKind::AddressContext { addr, ctxt } => {
                // Context first: the commit walk applies it before the
                // address, same as separate packets.
                self.stack.push_context(*ctxt, ty, index);
                self.stack.push_address(*addr, ty, index);
                self.count_exception_address();
            }

            PacketKind::Exception {
                number,
                previous_address_target,
            } => {
                self.stack
                    .push_exception(*number, *previous_address_target, ty, index);
                // Counted only once its mandatory address element arrives.
                self.excep_pend_addr = true;
            }

            PacketKind::ExceptionReturn => {
                self.stack.push_exception_return(ty, index);
                if self.cfg.profile == CoreProfile::Microcontroller {
                    self.bump_spec_depth(1);
                }
            }

            PacketKind::FunctionReturn => {
                self.stack.push_function_return(ty, index);
                if self.cfg.profile == CoreProfile::Microcontroller {
                    self.bump_spec_depth(1);
                }
            }

            PacketKind::Q { count, address } => {
                self.stack.push_q(*count, *address, ty, index);
                self.bump_spec_depth(1);
            }

            PacketKind::Event { number } => self.stack.push_event(*number, ty, index),

            PacketKind::Timestamp { value, cycle_count } => {
                self.stack.push_timestamp(*value, *cycle_count, ty, index);
            }

            PacketKind::CycleCount { count } => self.stack.push_cycle_count(*count, ty, index),

            PacketKind::Marker { kind, value } => self.stack.push_marker(*kind, *value, ty, index),

            PacketKind::Instrumentation { el, value } => {
                self.stack.push_instrumentation(*el, *value, ty, index);
            }

            PacketKind::Commit { count } => self.pending.commit += *count,

            PacketKind::Cancel {
                count,
                mispredict,
                atoms,
            } => {
                self.pending.cancel += *count;
                self.pending.mispredict |= *mispredict;
                if let Some(run) = atoms {
                    self.pending.post_atoms = Some((*run, ty));
                }
            }

            PacketKind::Mispredict { atoms } => {
                self.pending.mispredict = true;
                if let Some(run) = atoms {
                    self.pending.post_atoms = Some((*run, ty));
                }
            }

            PacketKind::Discard => {
                self.pending.discard = true;
                self.pending.discard_reason = UnsyncReason::Discard;
                self.curr_spec_depth = 0;
            }

            PacketKind::Overflow => {
                self.pending.discard = true;
                self.pending.discard_reason = UnsyncReason::Overflow;
                self.prev_overflow = true;
                self.curr_spec_depth = 0;
            }

            PacketKind::CondInstr | PacketKind::CondFlush | PacketKind::CondResult => {
                return Err(Error::UnsupportedPacket {
                    index,
                    reason: "conditional instruction tracing",
                });
            }

            PacketKind::BadSequence => {
                return Err(Error::BadPacket {
                    index,
                    reason: "invalid packet sequence",
                });
            }

            PacketKind::Reserved => {
                return Err(Error::BadPacket {
                    index,
                    reason: "reserved encoding",
                });
            }
        }

        if self.pending.any() {
            self.state = DecodeState::ResolveElements;
        }
        Ok(())
    }

    /// Count a deferred exception toward speculative depth once its
    /// mandatory address element arrives.
    fn count_exception_address(&mut self) {
        if self.excep_pend_addr {
            self.excep_pend_addr = false;
            self.bump_spec_depth(1);
        }
    }

    /// Add committable units and force a synthetic commit for any excess
    /// over the configured maximum. This is the only path that forces
    /// resolution without an explicit control packet, and it bounds the
    /// stack even under unbounded speculation windows.
    fn bump_spec_depth(&mut self, units: u32) {
        self.curr_spec_depth += units;
        if self.curr_spec_depth > self.cfg.max_spec_depth {
            let excess = self.curr_spec_depth - self.cfg.max_spec_depth;
            trace!(excess, "speculation limit exceeded; forcing commit");
            self.pending.commit += excess;
        }
    }

    /// Apply the per-stream parameters from a Trace-Info packet.
    fn apply_trace_info(&mut self, info: &TraceInfo) {
        debug!(
            spec_depth = info.spec_depth,
            cc_enabled = info.cc_enabled,
            "trace info"
        );
        self.curr_spec_depth = info.spec_depth;
        self.unseen_spec = info.spec_depth;
        self.cc_threshold = if info.cc_enabled {
            info.cc_threshold
        } else {
            self.cfg.cc_threshold
        };
        self.ret_stack.flush();
        self.need_addr = true;
        self.need_ctxt = true;
        self.staging.reset();
    }

    /// Apply the configured policy to a decode error.
    fn absorb_decode_error(&mut self, err: Error) -> Result<Response, Error> {
        match &err {
            Error::BadPacket { .. } if self.cfg.bad_packet_policy == BadPacketPolicy::Resync => {
                warn!(%err, "bad packet; resynchronizing");
                self.unsync_to(UnsyncReason::BadPacket);
                Ok(Response::WarnContinue)
            }
            Error::UnsupportedPacket { .. }
                if self.cfg.unsupported_policy == UnsupportedPolicy::Warn =>
            {
                warn!(%err, "unsupported packet skipped");
                Ok(Response::WarnContinue)
            }
            _ => Err(err),
        }
    }

    /// Drop all stream state and fall back to `NoSync` with a reason.
    fn unsync_to(&mut self, reason: UnsyncReason) {
        self.stack.clear();
        self.staging.reset();
        self.ret_stack.flush();
        self.pending = Pending::default();
        self.curr_spec_depth = 0;
        self.unseen_spec = 0;
        self.need_addr = true;
        self.need_ctxt = true;
        self.excep_pend_addr = false;
        self.state = DecodeState::NoSync;
        self.unsync_reason = reason;
    }

    /// Flush staged output, converting a fatal sink response to an error.
    fn flush_staging(&mut self) -> Result<Response, Error> {
        let r = self.staging.flush(&mut self.sink, self.cfg.trace_id);
        match r {
            Response::Fatal(kind) => Err(Error::SinkFatal(kind)),
            other => Ok(other),
        }
    }
}
