//! Speculation-stack and atom-run properties.

use proptest::prelude::*;

use cstrace_core::packet::{Atom, AtomRun, PacketType};
use cstrace_core::stack::{ElemPayload, SpeculationStack};

// ══════════════════════════════════════════════════════════
// Atom-run properties
// ══════════════════════════════════════════════════════════

/// An arbitrary (bits, count) pair describing a non-empty run.
fn run_strategy() -> impl Strategy<Value = (u32, u8)> {
    (any::<u32>(), 1u8..=32)
}

proptest! {
    /// Draining a run oldest-first reproduces its bits in order.
    #[test]
    fn commit_drains_bits_in_push_order((bits, count) in run_strategy()) {
        let mut run = AtomRun::new(bits, count);
        for i in 0..count {
            let expect = if bits >> i & 1 != 0 { Atom::Executed } else { Atom::NotExecuted };
            prop_assert_eq!(run.commit_oldest(), Some(expect));
        }
        prop_assert_eq!(run.commit_oldest(), None);
        prop_assert!(run.is_empty());
    }

    /// Cancelling k then committing the rest removes exactly the newest k.
    #[test]
    fn cancel_then_commit_conserves_units((bits, count) in run_strategy(), k in 0u32..40) {
        let mut run = AtomRun::new(bits, count);
        let removed = run.cancel_newest(k);
        prop_assert_eq!(removed, k.min(u32::from(count)));
        prop_assert_eq!(u32::from(run.count()), u32::from(count) - removed);

        // The survivors are the oldest predicates, in order.
        let survivors = run.count();
        for i in 0..survivors {
            let expect = if bits >> i & 1 != 0 { Atom::Executed } else { Atom::NotExecuted };
            prop_assert_eq!(run.commit_oldest(), Some(expect));
        }
    }

    /// A double mispredict restores the original run.
    #[test]
    fn mispredict_twice_is_identity((bits, count) in run_strategy()) {
        let original = AtomRun::new(bits, count);
        let mut run = original;
        run.mispredict_newest();
        prop_assert_ne!(run, original);
        run.mispredict_newest();
        prop_assert_eq!(run, original);
    }
}

// ══════════════════════════════════════════════════════════
// Stack ordering
// ══════════════════════════════════════════════════════════

#[test]
fn mixed_pushes_resolve_oldest_first() {
    let mut stack = SpeculationStack::new();
    stack.push_event(0, PacketType::Event, 0);
    stack.push_atoms(AtomRun::new(0b1, 1), PacketType::Atoms, 4);
    stack.push_cycle_count(9, PacketType::CycleCount, 8);

    assert_eq!(stack.len(), 3);
    assert!(matches!(
        stack.pop_back().unwrap().payload,
        ElemPayload::Event { number: 0 }
    ));
    assert!(matches!(
        stack.pop_back().unwrap().payload,
        ElemPayload::Atom(_)
    ));
    assert!(matches!(
        stack.pop_back().unwrap().payload,
        ElemPayload::CycleCount { count: 9 }
    ));
}

#[test]
fn front_and_back_peeks_agree_with_pops() {
    let mut stack = SpeculationStack::new();
    stack.push_event(1, PacketType::Event, 0);
    stack.push_event(2, PacketType::Event, 4);

    assert!(matches!(
        stack.front().unwrap().payload,
        ElemPayload::Event { number: 2 }
    ));
    assert!(matches!(
        stack.back().unwrap().payload,
        ElemPayload::Event { number: 1 }
    ));

    let popped = stack.pop_front().unwrap();
    assert!(matches!(popped.payload, ElemPayload::Event { number: 2 }));
}
