//! Q element resolution.

use cstrace_core::common::{Error, Isa};
use cstrace_core::element::{ElementKind, ElementPayload};
use cstrace_core::packet::{AddressInfo, AtomRun, PacketKind};

use crate::common::builder::program::ProgramBuilder;
use crate::common::harness::TestContext;

const BASE: u64 = 0x1000;

#[test]
fn q_with_known_count_steps_a_known_range() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().nop().nop().build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: Some(4),
        address: Some(AddressInfo::target(0x2000, Isa::A64)),
    });
    assert_eq!(tc.engine.spec_depth(), 1);
    tc.feed_ok(PacketKind::Commit { count: 1 });

    let ranges = tc.ranges();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].start, 0x1000);
    assert_eq!(ranges[0].end, 0x1010);
    assert_eq!(ranges[0].num_instr, 4);
}

#[test]
fn q_resumes_decode_at_the_supplied_address() {
    let program = ProgramBuilder::new().nop().nop().build();
    let resume = ProgramBuilder::new().b_cond(8).build();
    let mut tc = TestContext::new()
        .load_program(BASE, program)
        .load_program(0x2000, resume);
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: Some(2),
        address: Some(AddressInfo::target(0x2000, Isa::A64)),
    });
    tc.feed_ok(PacketKind::Commit { count: 1 });

    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::Commit { count: 1 });

    let ranges = tc.ranges();
    assert_eq!(ranges.last().unwrap().start, 0x2000);
}

#[test]
fn q_with_a_branch_in_the_window_has_no_known_path() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().b(8).nop().build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: Some(4),
        address: Some(AddressInfo::target(0x2000, Isa::A64)),
    });
    tc.feed_ok(PacketKind::Commit { count: 1 });

    let last = tc.elements().last().unwrap().1;
    assert_eq!(
        last.payload,
        ElementPayload::InstrRangeNoPath {
            start: 0x1000,
            count: 4,
        }
    );
}

#[test]
fn q_with_unknown_count_reports_no_path() {
    let mut tc = TestContext::new();
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: None,
        address: Some(AddressInfo::target(0x2000, Isa::A64)),
    });
    tc.feed_ok(PacketKind::Commit { count: 1 });

    assert_eq!(
        tc.elements().last().unwrap().1.kind(),
        ElementKind::InstrRangeNoPath
    );
}

#[test]
fn q_pulls_a_trailing_address_when_it_has_none() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().b_cond(4).build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: Some(2),
        address: None,
    });
    tc.feed_ok(PacketKind::Address(AddressInfo::target(0x3000, Isa::A64)));
    tc.feed_ok(PacketKind::Commit { count: 1 });

    // The stepped range came from the established address...
    let ranges = tc.ranges();
    assert_eq!(ranges[0].start, 0x1000);
    assert_eq!(ranges[0].num_instr, 2);

    // ...and decode resumed at the trailing address.
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::Commit { count: 1 });
    // 0x3000 is unmapped: the walk reports it inaccessible.
    assert_eq!(
        tc.elements().last().unwrap().1.payload,
        ElementPayload::AddrNacc { addr: 0x3000 }
    );
}

#[test]
fn q_without_any_address_is_a_bad_sequence() {
    let mut tc = TestContext::new();
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Q {
        count: Some(3),
        address: None,
    });
    let err = tc.feed(PacketKind::Commit { count: 1 }).unwrap_err();
    assert!(matches!(err, Error::BadPacketSequence { .. }));
}
