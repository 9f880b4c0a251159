//! Instruction following.
//!
//! Turns a known (address, context) pair into executed instruction ranges
//! by reading opcodes through the memory collaborator and classifying them
//! through the instruction decoder. Three stop conditions cover the three
//! users:
//! 1. **Waypoint:** Atom commit — walk to the next control-flow decision.
//! 2. **Address:** Exception commit — walk up to the preferred return
//!    address.
//! 3. **Count:** Q commit — step a bounded number of instructions.

use crate::access::MemoryAccess;
use crate::common::error::Error;
use crate::common::types::mem_space_for;
use crate::instruction::{InstrInfo, InstrType, InstructionDecoder};
use crate::output::ElementSink;

use super::DecodeEngine;

/// Where a walk should stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum WalkStop {
    /// At the next control-flow waypoint.
    Waypoint,
    /// When the walk reaches this address (or a waypoint, if sooner).
    ToAddress(u64),
    /// After this many instructions (or a waypoint, if sooner).
    Count(u32),
}

/// Why a walk stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum WalkOutcome {
    /// Stopped at a control-flow waypoint.
    Waypoint,
    /// Reached the requested address.
    AddressMatch,
    /// Stepped the requested number of instructions.
    CountReached,
    /// Memory was inaccessible at `addr`.
    Nacc {
        /// First inaccessible address.
        addr: u64,
    },
    /// The instruction decoder cannot classify this instruction set.
    NoIsa,
}

/// Result of one instruction walk.
#[derive(Clone, Copy, Debug)]
pub(super) struct Walk {
    /// First address of the walked range.
    pub start: u64,
    /// Address after the last walked instruction (== `start` if none).
    pub end: u64,
    /// Number of instructions walked.
    pub num: u32,
    /// The last walked instruction.
    pub last: InstrInfo,
    /// Why the walk stopped.
    pub outcome: WalkOutcome,
}

impl<M, D, S> DecodeEngine<M, D, S>
where
    M: MemoryAccess,
    D: InstructionDecoder,
    S: ElementSink,
{
    /// Follow instructions from the current address until `stop` is met.
    ///
    /// Never mutates the follow state; callers decide the next address
    /// from the outcome.
    pub(super) fn walk_instructions(&mut self, stop: WalkStop) -> Result<Walk, Error> {
        let start = self.instr_addr;
        let space = mem_space_for(self.ctx.security, self.ctx.el);
        let mut last = InstrInfo::at(start, self.isa);
        let mut num: u32 = 0;
        let mut addr = start;

        let outcome = loop {
            if let WalkStop::ToAddress(target) = stop {
                if addr == target {
                    break WalkOutcome::AddressMatch;
                }
            }
            if let WalkStop::Count(count) = stop {
                if num == count {
                    break WalkOutcome::CountReached;
                }
            }

            let mut buf = [0u8; 4];
            let got = self.mem.read(addr, space, &mut buf)?;
            if got < self.isa.min_opcode_bytes() {
                break WalkOutcome::Nacc { addr };
            }

            let mut info = InstrInfo::at(addr, self.isa);
            info.opcode = u32::from_le_bytes(buf);
            match self.idec.decode(&mut info) {
                Ok(()) => {}
                Err(Error::UnsupportedIsa { .. }) => break WalkOutcome::NoIsa,
                Err(e) => return Err(e),
            }
            // A 32-bit encoding straddling the end of accessible memory.
            if usize::from(info.size) > got {
                break WalkOutcome::Nacc { addr };
            }

            num += 1;
            last = info;
            if info.instr_type == InstrType::Other {
                addr = info.next_addr();
            } else {
                break WalkOutcome::Waypoint;
            }
        };

        let end = if num > 0 { last.next_addr() } else { start };
        Ok(Walk {
            start,
            end,
            num,
            last,
            outcome,
        })
    }
}
