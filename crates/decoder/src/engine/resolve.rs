//! Speculation resolution.
//!
//! Control packets do not produce output directly; they request that the
//! stacked speculative elements be resolved. This module implements the
//! four resolution operations and the end-of-trace flush:
//! 1. **Commit:** Walk oldest → newest, turning elements into output.
//! 2. **Cancel:** Walk newest → oldest, dropping elements silently.
//! 3. **Mispredict:** Flip the newest atom predicate in place.
//! 4. **Discard:** Drop everything, keeping only timing output.
//!
//! The resolve loop flushes staged output first and services at most one
//! pending request kind per iteration, in the fixed priority above.

use tracing::{debug, trace, warn};

use crate::access::MemoryAccess;
use crate::common::error::{Error, Response};
use crate::common::types::CoreProfile;
use crate::element::{ElementPayload, InstrRange, TraceOnReason, UnsyncReason};
use crate::instruction::{InstrInfo, InstrSubType, InstrType, InstructionDecoder};
use crate::output::ElementSink;
use crate::packet::{AddressInfo, Atom, ContextInfo};
use crate::stack::{ElemPayload, StackElem};

use super::walk::{WalkOutcome, WalkStop};
use super::{DecodeEngine, DecodeState, Pending};

impl<M, D, S> DecodeEngine<M, D, S>
where
    M: MemoryAccess,
    D: InstructionDecoder,
    S: ElementSink,
{
    /// Stage one output element at the given stream index.
    fn emit(&mut self, index: u64, payload: ElementPayload) {
        let _ = self.staging.append(index, payload);
    }

    /// Drive the `ResolveElements` state.
    ///
    /// Loops until no output is queued and no resolution request is
    /// pending, then hands control back to `DecodePackets`. A `Wait` from
    /// the sink unwinds immediately with all counters and cursors intact.
    pub(super) fn resolve_elements(&mut self) -> Result<Response, Error> {
        let mut worst = Response::Continue;
        loop {
            if self.staging.pending() > 0 {
                let r = self.flush_staging()?;
                if r.is_wait() {
                    return Ok(r);
                }
                worst = worst.worst(r);
            }

            if self.pending.commit > 0 {
                self.commit_elements()?;
            } else if self.pending.cancel > 0 {
                self.cancel_elements()?;
            } else if self.pending.mispredict {
                self.mispredict_atom()?;
                self.pending.mispredict = false;
            } else if self.pending.discard {
                self.discard_elements();
            } else if let Some((run, origin)) = self.pending.post_atoms.take() {
                // Atoms carried by the cancel/mispredict packet enter the
                // stack only now, after the operation they rode in on.
                self.stack.push_atoms(run, origin, self.index);
                self.bump_spec_depth(u32::from(run.count()));
            } else if self.staging.pending() == 0 {
                break;
            }
        }
        if self.state == DecodeState::ResolveElements {
            self.state = DecodeState::DecodePackets;
        }
        Ok(worst)
    }

    /// Commit the `pending.commit` oldest P0 units, oldest → newest.
    fn commit_elements(&mut self) -> Result<(), Error> {
        debug!(count = self.pending.commit, "commit");
        while self.pending.commit > 0 {
            // Units speculated before this decoder synchronized resolve
            // without any element backing them.
            if self.unseen_spec > 0 {
                self.unseen_spec -= 1;
                self.pending.commit -= 1;
                self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                continue;
            }

            let Some(elem) = self.stack.pop_back() else {
                return Err(Error::CommitOverrun {
                    index: self.index,
                    op: "commit",
                });
            };

            match elem.payload {
                ElemPayload::TraceOn => {
                    let reason = if self.prev_overflow {
                        TraceOnReason::Overflow
                    } else {
                        TraceOnReason::Normal
                    };
                    self.prev_overflow = false;
                    self.ret_stack.flush();
                    self.emit(elem.index, ElementPayload::TraceOn(reason));
                }
                ElemPayload::Context(ctxt) => self.commit_context(&ctxt, elem.index),
                ElemPayload::Address(addr) => self.commit_address(&addr),
                ElemPayload::Event { number } => {
                    self.emit(elem.index, ElementPayload::Event { number });
                }
                ElemPayload::Timestamp { value, cycle_count } => {
                    self.emit(elem.index, ElementPayload::Timestamp { value, cycle_count });
                }
                ElemPayload::CycleCount { count } => {
                    self.emit(elem.index, ElementPayload::CycleCount { count });
                }
                ElemPayload::Marker { kind, value } => {
                    self.emit(elem.index, ElementPayload::Marker { kind, value });
                }
                ElemPayload::Instrumentation { el, value } => {
                    self.emit(elem.index, ElementPayload::Instrumentation { el, value });
                }
                ElemPayload::ExceptionReturn => {
                    self.emit(elem.index, ElementPayload::ExceptionReturn);
                    if self.cfg.profile == CoreProfile::Microcontroller {
                        self.pending.commit -= 1;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                    }
                }
                ElemPayload::FunctionReturn => {
                    self.emit(elem.index, ElementPayload::FunctionReturn);
                    if self.cfg.profile == CoreProfile::Microcontroller {
                        self.pending.commit -= 1;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                    }
                }
                ElemPayload::Atom(mut run) => {
                    while !run.is_empty() && self.pending.commit > 0 {
                        let Some(atom) = run.commit_oldest() else { break };
                        self.commit_atom(atom, elem.index)?;
                        self.pending.commit -= 1;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                    }
                    if !run.is_empty() {
                        // Budget exhausted mid-run; the remainder stays put.
                        self.stack.push_back(StackElem {
                            payload: ElemPayload::Atom(run),
                            ..elem
                        });
                    }
                }
                ElemPayload::Exception {
                    number,
                    prev_addr_target,
                } => {
                    self.commit_exception(number, prev_addr_target, elem.index)?;
                    self.pending.commit -= 1;
                    self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                }
                ElemPayload::Q { count, addr } => {
                    self.commit_q(count, addr, elem.index)?;
                    self.pending.commit -= 1;
                    self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    /// Apply a committed context element to the cached PE state.
    fn commit_context(&mut self, ctxt: &ContextInfo, index: u64) {
        self.ctx.security = ctxt.security;
        self.ctx.el = ctxt.el;
        self.ctx.bits64 = ctxt.bits64;
        if ctxt.context_id.is_some() {
            self.ctx.context_id = ctxt.context_id;
        }
        if ctxt.vmid.is_some() {
            self.ctx.vmid = ctxt.vmid;
        }
        self.ctx.isa = ctxt.isa;
        self.isa = ctxt.isa;
        self.need_ctxt = false;
        if ctxt.updated {
            let ctx = self.ctx;
            self.staging.append(index, ElementPayload::PeContext).context = ctx;
        }
    }

    /// Apply a committed address element to the follow state.
    fn commit_address(&mut self, addr: &AddressInfo) {
        self.instr_addr = addr.addr;
        self.isa = addr.isa;
        self.ctx.isa = addr.isa;
        self.need_addr = false;
        // An explicit address supersedes an implied return-stack pop.
        self.ret_stack.clear_pop_pending();
    }

    /// Commit a single atom predicate: resolve any deferred return-stack
    /// pop, then follow instructions to the next waypoint and emit a range.
    fn commit_atom(&mut self, atom: Atom, index: u64) -> Result<(), Error> {
        if self.ret_stack.pop_pending() {
            self.ret_stack.clear_pop_pending();
            let Some((addr, isa)) = self.ret_stack.pop() else {
                return Err(Error::ReturnStackOverflow);
            };
            self.instr_addr = addr;
            self.isa = isa;
            self.ctx.isa = isa;
            self.need_addr = false;
        }

        if self.need_addr || self.need_ctxt {
            // No known execution point yet; the predicate is consumed
            // without a range.
            trace!(?atom, "atom consumed without address/context");
            return Ok(());
        }

        let walk = self.walk_instructions(WalkStop::Waypoint)?;
        match walk.outcome {
            WalkOutcome::Nacc { addr } => {
                self.emit(index, ElementPayload::AddrNacc { addr });
                self.need_addr = true;
            }
            WalkOutcome::NoIsa => {
                warn!(addr = self.instr_addr, "undecodable instruction set; range dropped");
                self.need_addr = true;
                self.need_ctxt = true;
            }
            WalkOutcome::Waypoint => {
                let taken = atom == Atom::Executed;
                let last = walk.last;
                self.emit(
                    index,
                    ElementPayload::InstrRange(InstrRange {
                        start: walk.start,
                        end: walk.end,
                        isa: self.isa,
                        num_instr: walk.num,
                        last_type: last.instr_type,
                        last_sub_type: last.sub_type,
                        last_size: last.size,
                        last_conditional: last.is_conditional,
                        last_executed: taken,
                    }),
                );
                self.advance_from_waypoint(&last, taken);
            }
            WalkOutcome::AddressMatch | WalkOutcome::CountReached => {}
        }
        Ok(())
    }

    /// Update the follow state after a range ended at a waypoint.
    fn advance_from_waypoint(&mut self, last: &InstrInfo, taken: bool) {
        if !taken {
            self.instr_addr = last.next_addr();
            return;
        }
        if last.is_link {
            self.ret_stack.push(last.next_addr(), self.isa);
        }
        match last.instr_type {
            InstrType::Branch => {
                self.instr_addr = last.branch_addr;
                if last.next_isa != self.isa {
                    self.isa = last.next_isa;
                    self.ctx.isa = last.next_isa;
                }
            }
            InstrType::IndirectBranch => {
                if last.sub_type == InstrSubType::Return && self.ret_stack.is_enabled() {
                    // Resolved when the confirming atom or an explicit
                    // address arrives.
                    self.ret_stack.set_pop_pending();
                }
                self.need_addr = true;
            }
            InstrType::Other => {}
        }
    }

    /// Pop trailing (newer) context elements, applying each.
    fn take_trailing_contexts(&mut self) {
        while matches!(
            self.stack.back().map(|e| &e.payload),
            Some(ElemPayload::Context(_))
        ) {
            if let Some(el) = self.stack.pop_back() {
                if let ElemPayload::Context(ctxt) = el.payload {
                    self.commit_context(&ctxt, el.index);
                }
            }
        }
    }

    /// Pop the trailing (newer) address element, if present.
    fn take_trailing_address(&mut self) -> Option<(AddressInfo, u64)> {
        if matches!(
            self.stack.back().map(|e| &e.payload),
            Some(ElemPayload::Address(_))
        ) {
            if let Some(el) = self.stack.pop_back() {
                if let ElemPayload::Address(addr) = el.payload {
                    return Some((addr, el.index));
                }
            }
        }
        None
    }

    /// Commit an exception element: resolve the range up to the preferred
    /// return address and emit the exception.
    fn commit_exception(
        &mut self,
        number: u16,
        prev_addr_target: bool,
        index: u64,
    ) -> Result<(), Error> {
        self.take_trailing_contexts();
        let Some((ret, _)) = self.take_trailing_address() else {
            return Err(Error::BadPacketSequence {
                index: self.index,
                reason: "exception element without trailing address",
            });
        };

        if !self.need_addr && !self.need_ctxt {
            let walk = self.walk_instructions(WalkStop::ToAddress(ret.addr))?;
            match walk.outcome {
                WalkOutcome::Nacc { addr } => {
                    self.emit(index, ElementPayload::AddrNacc { addr });
                }
                WalkOutcome::NoIsa => {
                    warn!(addr = self.instr_addr, "undecodable instruction set; range dropped");
                }
                WalkOutcome::AddressMatch | WalkOutcome::Waypoint if walk.num > 0 => {
                    let last = walk.last;
                    self.emit(
                        index,
                        ElementPayload::InstrRange(InstrRange {
                            start: walk.start,
                            end: walk.end,
                            isa: self.isa,
                            num_instr: walk.num,
                            last_type: last.instr_type,
                            last_sub_type: last.sub_type,
                            last_size: last.size,
                            last_conditional: last.is_conditional,
                            last_executed: true,
                        }),
                    );
                }
                _ => {}
            }
        }

        self.emit(
            index,
            ElementPayload::Exception {
                number,
                ret_addr: ret.addr,
                at_branch_target: prev_addr_target,
            },
        );

        // Execution continues in the handler, whose address arrives by
        // packet; the preferred return address is only where it resumes
        // after the eventual exception return.
        self.instr_addr = ret.addr;
        self.isa = ret.isa;
        self.need_addr = true;
        Ok(())
    }

    /// Commit a Q element: step the counted instructions if the path is
    /// knowable, then resume decode at the Q-supplied address.
    fn commit_q(
        &mut self,
        count: Option<u32>,
        addr: Option<AddressInfo>,
        index: u64,
    ) -> Result<(), Error> {
        let resume = if let Some(a) = addr {
            a
        } else {
            // A Q packet without its own address relies on trailing
            // context/address elements, exactly like an exception.
            self.take_trailing_contexts();
            let Some((a, _)) = self.take_trailing_address() else {
                return Err(Error::BadPacketSequence {
                    index: self.index,
                    reason: "Q element without trailing address",
                });
            };
            a
        };

        if self.need_addr || self.need_ctxt || count.is_none() {
            self.emit(
                index,
                ElementPayload::InstrRangeNoPath {
                    start: self.instr_addr,
                    count: count.unwrap_or(0),
                },
            );
        } else if let Some(c) = count {
            let walk = self.walk_instructions(WalkStop::Count(c))?;
            match walk.outcome {
                WalkOutcome::CountReached => {
                    let last = walk.last;
                    self.emit(
                        index,
                        ElementPayload::InstrRange(InstrRange {
                            start: walk.start,
                            end: walk.end,
                            isa: self.isa,
                            num_instr: walk.num,
                            last_type: last.instr_type,
                            last_sub_type: last.sub_type,
                            last_size: last.size,
                            last_conditional: last.is_conditional,
                            last_executed: true,
                        }),
                    );
                }
                WalkOutcome::Nacc { addr } => {
                    self.emit(index, ElementPayload::AddrNacc { addr });
                }
                // A control-flow decision inside the Q window means the
                // real path is unknowable.
                WalkOutcome::Waypoint | WalkOutcome::NoIsa => {
                    self.emit(
                        index,
                        ElementPayload::InstrRangeNoPath {
                            start: walk.start,
                            count: c,
                        },
                    );
                }
                WalkOutcome::AddressMatch => {}
            }
        }

        self.instr_addr = resume.addr;
        self.isa = resume.isa;
        self.ctx.isa = resume.isa;
        self.need_addr = false;
        Ok(())
    }

    /// Cancel the `pending.cancel` newest P0 units, newest → oldest.
    ///
    /// Produces no output; commit-and-forget timing elements are kept
    /// aside and pushed back afterwards so they survive the cancel.
    fn cancel_elements(&mut self) -> Result<(), Error> {
        debug!(count = self.pending.cancel, "cancel");
        let mut keep: Vec<StackElem> = Vec::new();
        while self.pending.cancel > 0 {
            if let Some(mut elem) = self.stack.pop_front() {
                match elem.payload {
                    ElemPayload::Atom(mut run) => {
                        let removed = run.cancel_newest(self.pending.cancel);
                        self.pending.cancel -= removed;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(removed);
                        if !run.is_empty() {
                            // Partial cancel: the older predicates stand.
                            elem.payload = ElemPayload::Atom(run);
                            self.stack.push_front(elem);
                        }
                    }
                    ElemPayload::Exception { .. } | ElemPayload::Q { .. } => {
                        self.pending.cancel -= 1;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                    }
                    ElemPayload::ExceptionReturn | ElemPayload::FunctionReturn
                        if self.cfg.profile == CoreProfile::Microcontroller =>
                    {
                        self.pending.cancel -= 1;
                        self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
                    }
                    _ if elem.survives_cancel() => keep.push(elem),
                    // Addresses, contexts and markers attached to the
                    // cancelled path go with it.
                    _ => {}
                }
            } else if self.unseen_spec > 0 {
                self.unseen_spec -= 1;
                self.pending.cancel -= 1;
                self.curr_spec_depth = self.curr_spec_depth.saturating_sub(1);
            } else {
                return Err(Error::CommitOverrun {
                    index: self.index,
                    op: "cancel",
                });
            }
        }
        for elem in keep.into_iter().rev() {
            self.stack.push_front(elem);
        }
        Ok(())
    }

    /// Flip the newest atom predicate.
    ///
    /// Addresses between the stack front and that atom referred to the
    /// mispredicted path and are removed outright.
    fn mispredict_atom(&mut self) -> Result<(), Error> {
        let idx = 0;
        loop {
            let Some(elem) = self.stack.get(idx) else {
                break;
            };
            match elem.payload {
                ElemPayload::Atom(_) => {
                    if let Some(el) = self.stack.get_mut(idx) {
                        if let ElemPayload::Atom(run) = &mut el.payload {
                            run.mispredict_newest();
                            trace!("flipped newest atom predicate");
                        }
                    }
                    return Ok(());
                }
                ElemPayload::Address(_) => {
                    let _ = self.stack.remove(idx);
                }
                _ => break,
            }
        }
        if self.unseen_spec > 0 {
            // The flip applies to a unit speculated before sync; nothing
            // of it is visible here.
            Ok(())
        } else {
            Err(Error::CommitOverrun {
                index: self.index,
                op: "mispredict",
            })
        }
    }

    /// Drop every stacked element, newest → oldest, keeping only timing
    /// output, then fall back to `NoSync`.
    fn discard_elements(&mut self) {
        debug!(reason = ?self.pending.discard_reason, "discard");
        while let Some(elem) = self.stack.pop_front() {
            match elem.payload {
                ElemPayload::Event { number } => {
                    self.emit(elem.index, ElementPayload::Event { number });
                }
                ElemPayload::Timestamp { value, cycle_count } => {
                    self.emit(elem.index, ElementPayload::Timestamp { value, cycle_count });
                }
                ElemPayload::CycleCount { count } => {
                    self.emit(elem.index, ElementPayload::CycleCount { count });
                }
                _ => {}
            }
        }
        let reason = self.pending.discard_reason;
        self.pending = Pending::default();
        self.curr_spec_depth = 0;
        self.unseen_spec = 0;
        self.need_addr = true;
        self.need_ctxt = true;
        self.excep_pend_addr = false;
        self.ret_stack.flush();
        self.state = DecodeState::NoSync;
        self.unsync_reason = reason;
    }

    /// End-of-trace flush: emit trailing timing elements (anything else
    /// truncates the scan), then an end-of-trace element.
    pub(super) fn flush_eot(&mut self, index: u64) {
        debug!("end of trace");
        while let Some(elem) = self.stack.pop_back() {
            match elem.payload {
                ElemPayload::Event { number } => {
                    self.emit(elem.index, ElementPayload::Event { number });
                }
                ElemPayload::Timestamp { value, cycle_count } => {
                    self.emit(elem.index, ElementPayload::Timestamp { value, cycle_count });
                }
                ElemPayload::CycleCount { count } => {
                    self.emit(elem.index, ElementPayload::CycleCount { count });
                }
                _ => {
                    self.stack.clear();
                    break;
                }
            }
        }
        self.emit(index, ElementPayload::EndOfTrace(UnsyncReason::EndOfTrace));
        self.pending = Pending::default();
        self.curr_spec_depth = 0;
        self.unseen_spec = 0;
        self.need_addr = true;
        self.need_ctxt = true;
        self.excep_pend_addr = false;
        self.state = DecodeState::NoSync;
        self.unsync_reason = UnsyncReason::EndOfTrace;
    }
}
