//! Return-stack assisted decode.

use cstrace_core::common::Error;
use cstrace_core::config::DecoderConfig;
use cstrace_core::packet::{AtomRun, PacketKind};

use crate::common::builder::program::ProgramBuilder;
use crate::common::harness::TestContext;

const BASE: u64 = 0x1000;

/// bl +16 | nop | b.cond +4 | nop | ret @0x1010
fn call_return_program() -> Vec<u8> {
    ProgramBuilder::new()
        .bl(16) // 0x1000 -> 0x1010, link 0x1004
        .nop() // 0x1004
        .b_cond(4) // 0x1008
        .nop() // 0x100c
        .ret() // 0x1010
        .build()
}

#[test]
fn returns_resolve_through_the_return_stack() {
    let mut tc = TestContext::new().load_program(BASE, call_return_program());
    tc.sync();
    tc.establish(BASE);
    // E (call taken), E (return taken), E (branch after return).
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b111, 3)));
    tc.feed_ok(PacketKind::Commit { count: 3 });

    let starts: Vec<u64> = tc.ranges().iter().map(|r| r.start).collect();
    // Call at 0x1000, callee at 0x1010, then back at the link address.
    assert_eq!(starts, vec![0x1000, 0x1010, 0x1004]);
}

#[test]
fn return_with_empty_stack_is_fatal() {
    let mut tc = TestContext::new()
        .load_program(BASE, ProgramBuilder::new().ret().nop().build());
    tc.sync();
    tc.establish(BASE);
    // E (return taken), E (whatever follows): the second atom needs the
    // deferred pop, but nothing was ever pushed.
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b11, 2)));
    let err = tc.feed(PacketKind::Commit { count: 2 }).unwrap_err();
    assert!(matches!(err, Error::ReturnStackOverflow));
}

#[test]
fn explicit_address_supersedes_a_deferred_pop() {
    let mut tc = TestContext::new().load_program(BASE, call_return_program());
    tc.sync();
    tc.establish(BASE);
    // Call then return; but an explicit address overrides the pop.
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b11, 2)));
    tc.feed_ok(PacketKind::Commit { count: 2 });
    tc.establish(0x1008);
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b1, 1)));
    tc.feed_ok(PacketKind::Commit { count: 1 });

    let starts: Vec<u64> = tc.ranges().iter().map(|r| r.start).collect();
    assert_eq!(starts, vec![0x1000, 0x1010, 0x1008]);
}

#[test]
fn disabled_return_stack_waits_for_addresses() {
    let cfg = DecoderConfig {
        return_stack: false,
        ..DecoderConfig::default()
    };
    let mut tc = TestContext::with_config(cfg).load_program(BASE, call_return_program());
    tc.sync();
    tc.establish(BASE);
    tc.feed_ok(PacketKind::Atoms(AtomRun::new(0b11, 2)));
    tc.feed_ok(PacketKind::Commit { count: 2 });

    // The range after the return never materialized: no stack, no address.
    let starts: Vec<u64> = tc.ranges().iter().map(|r| r.start).collect();
    assert_eq!(starts, vec![0x1000, 0x1010]);
}
