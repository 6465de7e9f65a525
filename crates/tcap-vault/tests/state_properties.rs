//! Property tests for the capsule state machine.
//!
//! Invariants checked:
//!   1. Monotonicity: no sequence of operations lowers the status rank
//!   2. One audit entry per effective transition, none for no-ops or errors
//!   3. Failed transitions leave the capsule unchanged
//!   4. Every key holder decrypts exactly what the creator sealed

use proptest::prelude::*;
use tcap_core::{
    CapsuleStatus, DeliveryCondition, Recipient, SelfDestructPolicy, TimeCapsule, Visibility,
};
use tcap_crypto::{ContentItem, IdentityKeyPair};
use tcap_vault::lifecycle;
use tcap_vault::{
    is_eligible, CapsuleService, CreateCapsuleParams, EvaluationContext, ManualClock,
    MemoryRepository,
};

#[derive(Debug, Clone, Copy)]
enum Op {
    Schedule,
    Deliver,
    Open,
    Erase,
    Purge,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Schedule),
        Just(Op::Deliver),
        Just(Op::Open),
        Just(Op::Erase),
        Just(Op::Purge),
    ]
}

fn capsule(delay: u64) -> TimeCapsule {
    let mut c = TimeCapsule::new_draft("c", "alice", "age1alice", "t", 0);
    c.recipients.push(Recipient::new("bob", "Bob", "age1bob"));
    c.visibility = Visibility::Recipients;
    c.self_destruct = Some(SelfDestructPolicy {
        enabled: true,
        delay_seconds: delay,
    });
    c
}

fn apply(c: &mut TimeCapsule, op: Op, now: u64) -> Result<bool, tcap_core::CapsuleError> {
    match op {
        Op::Schedule => lifecycle::schedule(c, now),
        Op::Deliver => lifecycle::deliver(c, now),
        Op::Open => lifecycle::open(c, "bob", now),
        Op::Erase => lifecycle::erase(c, now, Some("alice")),
        Op::Purge => lifecycle::purge_if_expired(c, now),
    }
}

proptest! {
    #[test]
    fn status_never_moves_backward(
        ops in proptest::collection::vec((op(), 0u64..50), 1..40),
        delay in 0u64..20,
    ) {
        let mut c = capsule(delay);
        let mut now = 0;

        for (op, step) in ops {
            now += step;
            let before = c.clone();
            let result = apply(&mut c, op, now);

            prop_assert!(c.status.rank() >= before.status.rank());
            match result {
                Ok(true) => {
                    prop_assert!(c.status.rank() > before.status.rank());
                    prop_assert_eq!(c.audit_trail().len(), before.audit_trail().len() + 1);
                }
                Ok(false) | Err(_) => prop_assert_eq!(&c, &before),
            }
        }
    }

    #[test]
    fn eligibility_is_any_non_password_condition(
        targets in proptest::collection::vec(0u64..1000, 0..6),
        now in 0u64..1000,
    ) {
        let conditions: Vec<_> = targets
            .iter()
            .map(|&target_timestamp| DeliveryCondition::Date { target_timestamp })
            .collect();
        let expected = targets.iter().any(|&t| now >= t);
        prop_assert_eq!(is_eligible(&conditions, &EvaluationContext::at(now)), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn every_key_holder_reads_the_sealed_items(
        texts in proptest::collection::vec("[ -~]{0,40}", 1..4),
        recipient_count in 0usize..3,
    ) {
        let creator = IdentityKeyPair::generate().unwrap();
        let recipients: Vec<(String, IdentityKeyPair)> = (0..recipient_count)
            .map(|i| (format!("r{i}"), IdentityKeyPair::generate().unwrap()))
            .collect();

        let items: Vec<ContentItem> = texts.iter().cloned().map(ContentItem::text).collect();
        let params = CreateCapsuleParams {
            title: "p".into(),
            contents: items.clone(),
            recipients: recipients
                .iter()
                .map(|(id, kp)| Recipient::new(id.as_str(), id.as_str(), kp.public_key()))
                .collect(),
            visibility: Visibility::Recipients,
            ..Default::default()
        };

        let mut svc = CapsuleService::new(MemoryRepository::new(), ManualClock::new(10));
        let capsule = tokio_test::block_on(svc.create_capsule("creator", creator.public_key(), params))
            .unwrap();
        svc.schedule(&capsule.id).unwrap();
        let capsule = svc.mark_delivered(&capsule.id).unwrap();

        let mut holders = vec![("creator".to_string(), creator)];
        holders.extend(recipients);
        for (id, identity) in &holders {
            let opened = tokio_test::block_on(svc.open_capsule(&capsule.id, id, identity));
            let (_, decrypted) = opened.unwrap();
            prop_assert!(decrypted == items, "holder {} read different items", id);
        }
    }
}

#[test]
fn deleted_is_terminal() {
    let mut c = capsule(0);
    lifecycle::erase(&mut c, 1, None).unwrap();
    for op in [Op::Schedule, Op::Deliver, Op::Open] {
        assert!(apply(&mut c, op, 2).is_err());
    }
    assert_eq!(c.status, CapsuleStatus::Deleted);
}
