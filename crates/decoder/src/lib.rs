//! ARM ETMv4 instruction-trace decode library.
//!
//! This crate turns a stream of typed ETMv4 trace packets into generic
//! trace elements (instruction ranges, exceptions, context changes,
//! timestamps), resolving speculative execution along the way:
//! 1. **Stack:** Speculative decode elements awaiting commit/cancel.
//! 2. **Engine:** The decode state machine and the commit, cancel,
//!    mispredict and discard resolution algorithms.
//! 3. **Output:** Element staging with resumable downstream backpressure.
//! 4. **Collaborators:** Memory access, opcode classification and the
//!    element sink, as traits implemented outside the engine.
//!
//! One engine instance decodes one trace-ID stream. The raw byte-to-packet
//! lexer is out of scope; inputs are already-typed [`packet::TracePacket`]
//! records.
//!
//! # Example
//!
//! ```
//! use cstrace_core::access::MemoryAccess;
//! use cstrace_core::common::{Error, MemSpace, Response};
//! use cstrace_core::config::DecoderConfig;
//! use cstrace_core::element::TraceElement;
//! use cstrace_core::engine::DecodeEngine;
//! use cstrace_core::instruction::{InstrInfo, InstructionDecoder};
//! use cstrace_core::output::ElementSink;
//! use cstrace_core::packet::{PacketKind, TraceInfo, TracePacket};
//!
//! struct NoMemory;
//! impl MemoryAccess for NoMemory {
//!     fn read(&mut self, _: u64, _: MemSpace, _: &mut [u8]) -> Result<usize, Error> {
//!         Ok(0) // nothing accessible
//!     }
//! }
//!
//! struct NoDecode;
//! impl InstructionDecoder for NoDecode {
//!     fn decode(&self, info: &mut InstrInfo) -> Result<(), Error> {
//!         Err(Error::UnsupportedIsa { addr: info.addr })
//!     }
//! }
//!
//! struct Print;
//! impl ElementSink for Print {
//!     fn accept(&mut self, index: u64, _id: u8, elem: &TraceElement) -> Response {
//!         println!("{index:#06x}: {elem}");
//!         Response::Continue
//!     }
//! }
//!
//! use cstrace_core::packet::AtomRun;
//!
//! let mut engine = DecodeEngine::new(DecoderConfig::default(), NoMemory, NoDecode, Print);
//! for pkt in [
//!     TracePacket::new(0x00, PacketKind::Async),
//!     TracePacket::new(0x0c, PacketKind::TraceInfo(TraceInfo::default())),
//!     TracePacket::new(0x10, PacketKind::TraceOn),
//!     TracePacket::new(0x11, PacketKind::Atoms(AtomRun::new(0b1, 1))),
//!     TracePacket::new(0x12, PacketKind::Commit { count: 1 }),
//! ] {
//!     let _ = engine.process_packet(&pkt).unwrap();
//! }
//! let _ = engine.end_of_trace(0x13).unwrap();
//! ```

/// Memory-access collaborator trait and the ELF-backed program image.
pub mod access;
/// Common types, errors and response codes.
pub mod common;
/// Decoder configuration (defaults, policies, JSON entry point).
pub mod config;
/// Generic output trace elements and the persistent PE context.
pub mod element;
/// Decode engine (state machine, packet decode, speculation resolution).
pub mod engine;
/// Instruction-decode collaborator surface.
pub mod instruction;
/// Output element staging and the downstream sink trait.
pub mod output;
/// Typed input packets.
pub mod packet;
/// Speculative decode stack and its elements.
pub mod stack;

/// Root configuration type; use `DecoderConfig::default()` or deserialize from JSON.
pub use crate::config::DecoderConfig;
/// Main decoder type; one instance per trace-ID stream.
pub use crate::engine::DecodeEngine;
/// The element every decode produces; delivered through [`output::ElementSink`].
pub use crate::element::TraceElement;
