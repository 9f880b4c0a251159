//! Architectural enums and the memory-space lookup table.

use serde::Deserialize;

/// Instruction set the PE is executing in.
///
/// ETMv4 traces AArch64 (`A64`) and AArch32 (`A32` ARM, `T32` Thumb)
/// execution. Address packets and context packets carry the instruction set
/// alongside the address so the decoder knows how to walk the opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Isa {
    /// AArch64.
    A64,
    /// AArch32 ARM (fixed 4-byte encodings).
    A32,
    /// AArch32 Thumb (2- or 4-byte encodings).
    T32,
    /// Not yet established by the trace stream.
    #[default]
    Unknown,
}

impl Isa {
    /// Minimum opcode fetch size in bytes for this instruction set.
    #[inline]
    pub fn min_opcode_bytes(self) -> usize {
        match self {
            Self::T32 => 2,
            _ => 4,
        }
    }
}

/// Security state of the PE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    /// Secure state.
    Secure,
    /// Non-secure state.
    #[default]
    NonSecure,
}

/// Exception level of the PE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExceptionLevel {
    /// EL0 (application).
    #[default]
    El0,
    /// EL1 (OS kernel).
    El1,
    /// EL2 (hypervisor).
    El2,
    /// EL3 (secure monitor).
    El3,
}

impl ExceptionLevel {
    #[inline]
    fn index(self) -> usize {
        match self {
            Self::El0 => 0,
            Self::El1 => 1,
            Self::El2 => 2,
            Self::El3 => 3,
        }
    }
}

/// Core architecture profile.
///
/// The profile decides whether exception-return and function-return packets
/// count as committable P0 elements (M profile) or are plain markers (A/R).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CoreProfile {
    /// Application profile (Cortex-A).
    #[default]
    Application,
    /// Real-time profile (Cortex-R).
    RealTime,
    /// Microcontroller profile (Cortex-M).
    Microcontroller,
}

/// Memory space qualifier passed to the memory-access collaborator.
///
/// Program images may map differently per security state and translation
/// regime; the walker derives the space from the cached PE context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MemSpace {
    /// Secure EL1/EL0 translation regime.
    El1Secure,
    /// Non-secure EL1/EL0 translation regime.
    El1NonSecure,
    /// Non-secure EL2.
    El2,
    /// Secure EL2.
    El2Secure,
    /// EL3.
    El3,
    /// Any space (no context established).
    #[default]
    Any,
}

/// Security/exception-level to memory-space mapping.
///
/// Indexed `[security][exception level]`; EL0 accesses resolve through the
/// EL1 regime of the matching security state.
const MEM_SPACE_MAP: [[MemSpace; 4]; 2] = [
    // Secure
    [
        MemSpace::El1Secure,
        MemSpace::El1Secure,
        MemSpace::El2Secure,
        MemSpace::El3,
    ],
    // Non-secure (EL3 does not exist; fall back to Any)
    [
        MemSpace::El1NonSecure,
        MemSpace::El1NonSecure,
        MemSpace::El2,
        MemSpace::Any,
    ],
];

/// Resolve the memory space for a security state and exception level.
#[inline]
pub fn mem_space_for(security: SecurityLevel, el: ExceptionLevel) -> MemSpace {
    let sec_idx = match security {
        SecurityLevel::Secure => 0,
        SecurityLevel::NonSecure => 1,
    };
    MEM_SPACE_MAP[sec_idx][el.index()]
}
