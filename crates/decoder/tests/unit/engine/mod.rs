//! # Decode Engine Tests
//!
//! One module per behavior group of the engine:
//! - **sync**: FSM transitions up to `DecodePackets`, unsync reasons.
//! - **commit / cancel / mispredict / discard**: the four resolution
//!   operations.
//! - **exception / qelem / retstack**: the committable elements with
//!   instruction-follow behavior.
//! - **backpressure**: resumable delivery under sink `Wait`/`Fatal`.
//! - **eot**: the end-of-trace flush path.
//! - **policies**: bad-packet and unsupported-packet handling.

pub mod backpressure;
pub mod eot;
pub mod exception;
pub mod qelem;
pub mod retstack;
