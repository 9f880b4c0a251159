//! Decoder configuration.
//!
//! This module defines the per-stream configuration consumed at setup time:
//! 1. **Defaults:** Baseline protocol constants used when not overridden.
//! 2. **Structure:** `DecoderConfig` with the static per-stream parameters.
//! 3. **Policies:** What to do with bad or unsupported packets.
//!
//! Configuration is supplied via JSON (`DecoderConfig::from_json`) or built
//! with `DecoderConfig::default()` and adjusted field by field.

use serde::Deserialize;

use crate::common::types::CoreProfile;

/// Default configuration constants for the decoder.
mod defaults {
    /// Default CoreSight trace stream ID.
    ///
    /// Valid IDs are 0x01..=0x6F; 0x10 is a common single-core default.
    pub const TRACE_ID: u8 = 0x10;

    /// Default maximum speculation depth.
    ///
    /// Bounds the number of uncommitted P0 elements the decoder will buffer
    /// before forcing a synthetic commit of the excess.
    pub const MAX_SPEC_DEPTH: u32 = 32;

    /// Default cycle-count threshold (0 = cycle counting disabled).
    pub const CC_THRESHOLD: u16 = 0;

    /// Default number of pre-allocated output staging slots.
    pub const STAGING_SLOTS: usize = 4;
}

/// What to do when an unknown, reserved or sequence-invalid packet arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BadPacketPolicy {
    /// Stop decoding with an error.
    #[default]
    Fatal,
    /// Warn, reset the decoder to the unsynchronized state and carry on.
    Resync,
}

/// What to do when a recognized-but-unimplemented packet arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UnsupportedPolicy {
    /// Warn and skip the packet.
    #[default]
    Warn,
    /// Stop decoding with an error.
    Fatal,
}

/// Static per-stream decoder configuration.
///
/// One instance configures one decoder, which processes one trace-ID
/// stream. Dynamic per-stream parameters (current speculation depth at the
/// sync point, cycle-count threshold in use) arrive later in the Trace-Info
/// packet and override nothing here except the cycle-count threshold.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// CoreSight trace stream ID this decoder is bound to.
    pub trace_id: u8,
    /// Core architecture profile of the traced PE.
    pub profile: CoreProfile,
    /// Maximum speculation depth before a synthetic commit is forced.
    pub max_spec_depth: u32,
    /// Cycle-count threshold configured at the encoder.
    pub cc_threshold: u16,
    /// Whether the traced PE uses 64-bit virtual addresses.
    pub addr_64bit: bool,
    /// Whether the encoder has the return stack enabled.
    pub return_stack: bool,
    /// Policy for unknown/reserved/sequence-invalid packets.
    pub bad_packet_policy: BadPacketPolicy,
    /// Policy for recognized-but-unimplemented packets.
    pub unsupported_policy: UnsupportedPolicy,
    /// Initial number of output staging slots.
    pub staging_slots: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            trace_id: defaults::TRACE_ID,
            profile: CoreProfile::default(),
            max_spec_depth: defaults::MAX_SPEC_DEPTH,
            cc_threshold: defaults::CC_THRESHOLD,
            addr_64bit: true,
            return_stack: true,
            bad_packet_policy: BadPacketPolicy::default(),
            unsupported_policy: UnsupportedPolicy::default(),
            staging_slots: defaults::STAGING_SLOTS,
        }
    }
}

impl DecoderConfig {
    /// Parse a configuration from a JSON document.
    ///
    /// Missing fields take their defaults, so `{}` is a valid document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
