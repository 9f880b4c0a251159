//! Speculative decode stack.
//!
//! Packets are decoded into stack elements long before the CPU's real
//! execution path is known. This module provides the ordered, double-ended
//! store for those elements:
//! 1. **Push:** New elements enter at the front (newest), with trace-on
//!    entering at the back as the always-innermost case.
//! 2. **Resolve:** Commit drains from the back (oldest); cancel, mispredict
//!    and discard work from the front (newest).
//! 3. **Ownership:** Pops transfer ownership to the resolution step, which
//!    drops the element when it finishes with it.

pub mod elem;

pub use elem::{ElemPayload, StackElem};

use std::collections::VecDeque;

use crate::common::types::ExceptionLevel;
use crate::packet::{AddressInfo, AtomRun, ContextInfo, MarkerKind, PacketType};

/// Ordered double-ended collection of unresolved [`StackElem`]s.
///
/// Index 0 is the front (newest element).
#[derive(Debug, Default)]
pub struct SpeculationStack {
    elems: VecDeque<StackElem>,
}

impl SpeculationStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements on the stack.
    #[inline]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// True if the stack holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Push a new element at the front (newest end).
    pub fn push_front(&mut self, elem: StackElem) {
        self.elems.push_front(elem);
    }

    /// Push a new element at the back (oldest end).
    pub fn push_back(&mut self, elem: StackElem) {
        self.elems.push_back(elem);
    }

    /// Remove and return the newest element.
    pub fn pop_front(&mut self) -> Option<StackElem> {
        self.elems.pop_front()
    }

    /// Remove and return the oldest element.
    pub fn pop_back(&mut self) -> Option<StackElem> {
        self.elems.pop_back()
    }

    /// Peek the newest element.
    pub fn front(&self) -> Option<&StackElem> {
        self.elems.front()
    }

    /// Peek the oldest element.
    pub fn back(&self) -> Option<&StackElem> {
        self.elems.back()
    }

    /// Element at `idx` counted from the front (0 = newest).
    pub fn get(&self, idx: usize) -> Option<&StackElem> {
        self.elems.get(idx)
    }

    /// Mutable element at `idx` counted from the front.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut StackElem> {
        self.elems.get_mut(idx)
    }

    /// Remove the element at `idx`, preserving the order of the rest.
    pub fn remove(&mut self, idx: usize) -> Option<StackElem> {
        self.elems.remove(idx)
    }

    /// Drop every element.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Iterate front (newest) to back (oldest).
    pub fn iter(&self) -> impl Iterator<Item = &StackElem> {
        self.elems.iter()
    }
}

/// Typed push helpers, one per element variant.
///
/// Each constructs the element with its origin diagnostics and pushes it
/// immediately; all push at the front except trace-on.
impl SpeculationStack {
    fn make(origin: PacketType, index: u64, payload: ElemPayload) -> StackElem {
        StackElem {
            origin,
            index,
            payload,
        }
    }

    /// Push a trace-on element at the back (always-innermost).
    pub fn push_trace_on(&mut self, origin: PacketType, index: u64) {
        self.push_back(Self::make(origin, index, ElemPayload::TraceOn));
    }

    /// Push an atom run.
    pub fn push_atoms(&mut self, run: AtomRun, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::Atom(run)));
    }

    /// Push an address element.
    pub fn push_address(&mut self, addr: AddressInfo, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::Address(addr)));
    }

    /// Push a context element.
    pub fn push_context(&mut self, ctxt: ContextInfo, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::Context(ctxt)));
    }

    /// Push an exception element.
    pub fn push_exception(
        &mut self,
        number: u16,
        prev_addr_target: bool,
        origin: PacketType,
        index: u64,
    ) {
        self.push_front(Self::make(
            origin,
            index,
            ElemPayload::Exception {
                number,
                prev_addr_target,
            },
        ));
    }

    /// Push an exception-return marker.
    pub fn push_exception_return(&mut self, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::ExceptionReturn));
    }

    /// Push a function-return marker.
    pub fn push_function_return(&mut self, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::FunctionReturn));
    }

    /// Push a Q element.
    pub fn push_q(
        &mut self,
        count: Option<u32>,
        addr: Option<AddressInfo>,
        origin: PacketType,
        index: u64,
    ) {
        self.push_front(Self::make(origin, index, ElemPayload::Q { count, addr }));
    }

    /// Push an event element.
    pub fn push_event(&mut self, number: u8, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::Event { number }));
    }

    /// Push a timestamp element.
    pub fn push_timestamp(
        &mut self,
        value: u64,
        cycle_count: Option<u32>,
        origin: PacketType,
        index: u64,
    ) {
        self.push_front(Self::make(
            origin,
            index,
            ElemPayload::Timestamp { value, cycle_count },
        ));
    }

    /// Push a cycle-count element.
    pub fn push_cycle_count(&mut self, count: u32, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::CycleCount { count }));
    }

    /// Push a marker element.
    pub fn push_marker(&mut self, kind: MarkerKind, value: u32, origin: PacketType, index: u64) {
        self.push_front(Self::make(origin, index, ElemPayload::Marker { kind, value }));
    }

    /// Push an instrumentation element.
    pub fn push_instrumentation(
        &mut self,
        el: ExceptionLevel,
        value: u64,
        origin: PacketType,
        index: u64,
    ) {
        self.push_front(Self::make(
            origin,
            index,
            ElemPayload::Instrumentation { el, value },
        ));
    }
}
