//! End-of-trace flush.

use cstrace_core::common::Response;
use cstrace_core::element::{ElementKind, ElementPayload, UnsyncReason};
use cstrace_core::engine::DecodeState;
use cstrace_core::packet::{AtomRun, PacketKind};

use crate::common::harness::TestContext;

#[test]
fn eot_emits_trailing_timing_elements_then_end_of_trace() {
    let mut tc = TestContext::new();
    tc.sync();
    tc.feed_ok(PacketKind::Event { number: 1 });
    tc.feed_ok(PacketKind::Timestamp {
        value: 5,
        cycle_count: None,
    });
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::CycleCount { count: 3 });

    let resp = tc.engine.end_of_trace(0x40).unwrap();
    assert_eq!(resp, Response::Continue);
    // The scan stops at the atom: the cycle count behind it is dropped.
    assert_eq!(
        tc.kinds(),
        vec![
            ElementKind::NoSync,
            ElementKind::Event,
            ElementKind::Timestamp,
            ElementKind::EndOfTrace,
        ]
    );
    assert_eq!(
        tc.elements().last().unwrap().1.payload,
        ElementPayload::EndOfTrace(UnsyncReason::EndOfTrace)
    );
    assert_eq!(tc.engine.state(), DecodeState::NoSync);
    assert_eq!(tc.engine.spec_depth(), 0);
}

#[test]
fn eot_on_an_empty_stack_still_reports_end_of_trace() {
    let mut tc = TestContext::new();
    tc.sync();
    let _ = tc.engine.end_of_trace(0x10).unwrap();
    assert_eq!(
        tc.kinds(),
        vec![ElementKind::NoSync, ElementKind::EndOfTrace]
    );
}

#[test]
fn new_data_after_eot_reports_eot_unsync_reason() {
    let mut tc = TestContext::new();
    tc.sync();
    let _ = tc.engine.end_of_trace(0x10).unwrap();

    tc.feed_ok(PacketKind::Ignore);
    assert_eq!(
        tc.elements().last().unwrap().1.payload,
        ElementPayload::NoSync(UnsyncReason::EndOfTrace)
    );
}

#[test]
fn eot_delivery_resumes_after_wait_without_duplicates() {
    let mut tc = TestContext::new();
    tc.sync();
    tc.feed_ok(PacketKind::Event { number: 7 });

    // Refuse the event on the first try.
    tc.engine.sink_mut().push_script([Response::Wait]);
    assert_eq!(tc.engine.end_of_trace(0x40).unwrap(), Response::Wait);

    assert_eq!(tc.engine.end_of_trace(0x40).unwrap(), Response::Continue);
    assert_eq!(
        tc.kinds(),
        vec![
            ElementKind::NoSync,
            ElementKind::Event,
            ElementKind::EndOfTrace,
        ]
    );
}
