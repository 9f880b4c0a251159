//! Backpressure resumability.

use pretty_assertions::assert_eq;

use cstrace_core::common::{Error, FatalKind, Response};
use cstrace_core::element::{ElementKind, ElementPayload, UnsyncReason};
use cstrace_core::engine::DecodeState;
use cstrace_core::packet::{AtomRun, PacketKind, TracePacket};

use crate::common::builder::program::ProgramBuilder;
use crate::common::harness::TestContext;

const BASE: u64 = 0x1000;

/// Stage five elements through one commit: PeContext, Event, Timestamp,
/// CycleCount, InstrRange.
fn stage_burst(tc: &mut TestContext) -> PacketKind {
    tc.sync();
    tc.feed_ok(PacketKind::Context(TestContext::context()));
    tc.feed_ok(PacketKind::Address(cstrace_core::packet::AddressInfo::target(
        BASE,
        cstrace_core::common::Isa::A64,
    )));
    tc.feed_ok(PacketKind::Event { number: 0 });
    tc.feed_ok(PacketKind::Timestamp {
        value: 1,
        cycle_count: None,
    });
    tc.feed_ok(PacketKind::CycleCount { count: 2 });
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    PacketKind::Commit { count: 1 }
}

const BURST: [ElementKind; 6] = [
    ElementKind::NoSync,
    ElementKind::PeContext,
    ElementKind::Event,
    ElementKind::Timestamp,
    ElementKind::CycleCount,
    ElementKind::InstrRange,
];

#[test]
fn wait_mid_flush_resumes_via_flush_exactly_once() {
    let mut tc = TestContext::new().load_program(BASE, ProgramBuilder::new().b_cond(4).build());
    let commit = stage_burst(&mut tc);

    // Accept two elements of the burst, then refuse.
    tc.engine.sink_mut().push_script([
        Response::Continue,
        Response::Continue,
        Response::Wait,
    ]);
    let resp = tc.feed(commit).unwrap();
    assert_eq!(resp, Response::Wait);
    assert_eq!(tc.engine.state(), DecodeState::ResolveElements);

    // Delivery resumes with the refused element; nothing repeats.
    let resp = tc.engine.flush().unwrap();
    assert_eq!(resp, Response::Continue);
    assert_eq!(tc.engine.state(), DecodeState::DecodePackets);
    assert_eq!(tc.kinds(), BURST.to_vec());
}

#[test]
fn wait_mid_flush_resumes_by_resending_the_packet() {
    let mut tc = TestContext::new().load_program(BASE, ProgramBuilder::new().b_cond(4).build());
    let commit = stage_burst(&mut tc);

    tc.engine.sink_mut().push_script([
        Response::Continue,
        Response::Continue,
        Response::Wait,
    ]);
    let pkt = TracePacket::new(0x100, commit);
    assert_eq!(tc.engine.process_packet(&pkt).unwrap(), Response::Wait);

    // The caller re-invokes the same operation with the same packet.
    assert_eq!(tc.engine.process_packet(&pkt).unwrap(), Response::Continue);
    assert_eq!(tc.kinds(), BURST.to_vec());
}

#[test]
fn wait_during_no_sync_emission_does_not_duplicate_it() {
    let mut tc = TestContext::new();
    tc.engine.sink_mut().push_script([Response::Wait]);

    let pkt = TracePacket::new(0, PacketKind::TraceOn);
    assert_eq!(tc.engine.process_packet(&pkt).unwrap(), Response::Wait);
    assert!(tc.kinds().is_empty());

    assert_eq!(tc.engine.process_packet(&pkt).unwrap(), Response::Continue);
    assert_eq!(tc.kinds(), vec![ElementKind::NoSync]);
    assert_eq!(
        tc.elements()[0].1.payload,
        ElementPayload::NoSync(UnsyncReason::InitDecoder)
    );
}

#[test]
fn warn_continue_propagates_but_keeps_sending() {
    let mut tc = TestContext::new();
    tc.engine.sink_mut().push_script([Response::WarnContinue]);
    let resp = tc.feed(PacketKind::Ignore).unwrap();
    assert_eq!(resp, Response::WarnContinue);
    assert_eq!(tc.kinds(), vec![ElementKind::NoSync]);
}

#[test]
fn fatal_sink_response_terminates_until_reset() {
    let mut tc = TestContext::new();
    tc.engine.sink_mut().push_script([Response::Fatal(FatalKind::SysErr)]);
    let err = tc.feed(PacketKind::Ignore).unwrap_err();
    assert!(matches!(err, Error::SinkFatal(FatalKind::SysErr)));

    tc.engine.reset();
    tc.feed_ok(PacketKind::Ignore);
    assert_eq!(
        tc.elements().last().unwrap().1.payload,
        ElementPayload::NoSync(UnsyncReason::ResetDecoder)
    );
}
