//! Exception element resolution.

use pretty_assertions::assert_eq;

use cstrace_core::common::{Error, Isa};
use cstrace_core::element::{ElementKind, ElementPayload};
use cstrace_core::packet::{AddressInfo, AtomRun, ContextInfo, PacketKind};

use crate::common::builder::program::ProgramBuilder;
use crate::common::harness::TestContext;

const BASE: u64 = 0x1000;

#[test]
fn exception_emits_range_to_preferred_return_address() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().nop().nop().build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Exception {
        number: 5,
        previous_address_target: false,
    });
    tc.feed_ok(PacketKind::Address(AddressInfo::target(0x1010, Isa::A64)));
    assert_eq!(tc.engine.spec_depth(), 1);

    tc.feed_ok(PacketKind::Commit { count: 1 });
    assert_eq!(
        tc.kinds(),
        vec![
            ElementKind::NoSync,
            ElementKind::PeContext,
            ElementKind::InstrRange,
            ElementKind::Exception,
        ]
    );

    let ranges = tc.ranges();
    assert_eq!(ranges[0].start, 0x1000);
    assert_eq!(ranges[0].end, 0x1010);
    assert_eq!(ranges[0].num_instr, 4);

    let excep = tc.elements().last().unwrap().1;
    assert_eq!(
        excep.payload,
        ElementPayload::Exception {
            number: 5,
            ret_addr: 0x1010,
            at_branch_target: false,
        }
    );
}

#[test]
fn exception_without_trailing_address_is_a_bad_sequence() {
    // Address(0x1000) then Exception with no trailing address element:
    // commit(1) fails with a bad packet sequence.
    let mut tc = TestContext::new();
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Exception {
        number: 5,
        previous_address_target: false,
    });
    let err = tc.feed(PacketKind::Commit { count: 1 }).unwrap_err();
    assert!(matches!(err, Error::BadPacketSequence { .. }));
}

#[test]
fn exception_applies_trailing_context_before_the_address() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().nop().nop().build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Exception {
        number: 2,
        previous_address_target: true,
    });
    tc.feed_ok(PacketKind::Context(ContextInfo {
        context_id: Some(0xBEEF),
        ..TestContext::context()
    }));
    tc.feed_ok(PacketKind::Address(AddressInfo::target(0x1008, Isa::A64)));
    tc.feed_ok(PacketKind::Commit { count: 1 });

    assert_eq!(
        tc.kinds(),
        vec![
            ElementKind::NoSync,
            ElementKind::PeContext,
            ElementKind::PeContext,
            ElementKind::InstrRange,
            ElementKind::Exception,
        ]
    );
    // The trailing context landed before the exception element.
    let excep = tc.elements().last().unwrap().1;
    assert_eq!(excep.context.context_id, Some(0xBEEF));
    assert_eq!(
        excep.payload,
        ElementPayload::Exception {
            number: 2,
            ret_addr: 0x1008,
            at_branch_target: true,
        }
    );
}

#[test]
fn ranges_stay_silent_until_the_handler_address_arrives() {
    let mut tc = TestContext::new().load_program(
        BASE,
        ProgramBuilder::new().nop().nop().b_cond(4).build(),
    );
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Exception {
        number: 1,
        previous_address_target: false,
    });
    tc.feed_ok(PacketKind::Address(AddressInfo::target(0x1004, Isa::A64)));
    tc.feed_ok(PacketKind::Commit { count: 1 });
    let before = tc.ranges().len();

    // No handler address yet: atoms stay silent.
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::Commit { count: 1 });
    assert_eq!(tc.ranges().len(), before);

    // The handler address restores range output.
    tc.feed_ok(PacketKind::Address(AddressInfo::target(BASE, Isa::A64)));
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::Commit { count: 1 });
    assert_eq!(tc.ranges().len(), before + 1);
}
