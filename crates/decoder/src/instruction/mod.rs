//! Instruction-decode collaborator surface.
//!
//! The engine never interprets opcodes itself; it hands each fetched opcode
//! to an external [`InstructionDecoder`] which classifies it and computes
//! the information the walk needs:
//! 1. **Type:** Plain instruction, direct branch, or indirect branch.
//! 2. **Sub-type:** Link (call), return, or exception return.
//! 3. **Targets:** The direct branch target and any instruction-set change.
//!
//! Implementations live outside this crate (an AArch64/AArch32 decoder for
//! real use, a synthetic one in the tests).

use crate::common::error::Error;
use crate::common::types::Isa;

/// Control-flow classification of one instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InstrType {
    /// Not a control-flow waypoint.
    #[default]
    Other,
    /// Direct branch with a decodable target.
    Branch,
    /// Indirect branch; the target is not in the opcode.
    IndirectBranch,
}

/// Sub-classification of branch instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InstrSubType {
    /// No sub-classification.
    #[default]
    None,
    /// Branch with link (function call).
    BranchLink,
    /// Function return.
    Return,
    /// Exception return.
    ExceptionReturn,
}

/// In/out record for one instruction decode.
///
/// The engine fills `isa`, `addr` and `opcode`; the decoder fills the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct InstrInfo {
    /// Instruction set to decode under.
    pub isa: Isa,
    /// Address of the instruction.
    pub addr: u64,
    /// Raw opcode (little-endian; low halfword for 16-bit T32 encodings).
    pub opcode: u32,
    /// Control-flow classification.
    pub instr_type: InstrType,
    /// Branch sub-classification.
    pub sub_type: InstrSubType,
    /// Target of a direct branch.
    pub branch_addr: u64,
    /// Instruction size in bytes (2 or 4).
    pub size: u8,
    /// True if execution is conditional.
    pub is_conditional: bool,
    /// True if the instruction sets the link register.
    pub is_link: bool,
    /// Instruction set after this instruction, if it can change it.
    pub next_isa: Isa,
}

impl InstrInfo {
    /// Prepare a record for decoding at an address.
    pub fn at(addr: u64, isa: Isa) -> Self {
        Self {
            isa,
            addr,
            next_isa: isa,
            ..Self::default()
        }
    }

    /// Address of the next sequential instruction.
    #[inline]
    pub fn next_addr(&self) -> u64 {
        self.addr.wrapping_add(u64::from(self.size))
    }
}

/// External opcode classifier.
pub trait InstructionDecoder {
    /// Classify the opcode in `info`, filling the output fields.
    ///
    /// Returns [`Error::UnsupportedIsa`] when the instruction set cannot be
    /// decoded; the engine recovers by re-arming its need-address and
    /// need-context state.
    fn decode(&self, info: &mut InstrInfo) -> Result<(), Error>;
}

impl<D: InstructionDecoder + ?Sized> InstructionDecoder for &D {
    fn decode(&self, info: &mut InstrInfo) -> Result<(), Error> {
        (**self).decode(info)
    }
}
