//! Capsule state machine.
//!
//! ```text
//!   Draft ──► Scheduled ──► Delivered ──► Opened
//!     │           │             │            │
//!     └───────────┴─────────────┴────────────┴──► Deleted (terminal)
//! ```
//!
//! Every function here works on a capsule value the caller owns; nothing is
//! persisted. Each transition raises the status rank and appends exactly one
//! audit entry. Repeating a transition that already happened is a no-op and
//! returns `Ok(false)`.

use tcap_core::{AuditEvent, CapsuleError, CapsuleResult, CapsuleStatus, TimeCapsule, Visibility};
use tracing::info;

fn audit_event(to: CapsuleStatus) -> AuditEvent {
    match to {
        CapsuleStatus::Draft => AuditEvent::Created,
        CapsuleStatus::Scheduled => AuditEvent::Scheduled,
        CapsuleStatus::Delivered => AuditEvent::Delivered,
        CapsuleStatus::Opened => AuditEvent::Opened,
        CapsuleStatus::Deleted => AuditEvent::Deleted,
    }
}

/// Move forward to `to`. Rejects anything that does not raise the rank.
fn transition(
    capsule: &mut TimeCapsule,
    to: CapsuleStatus,
    now: u64,
    user_id: Option<&str>,
) -> CapsuleResult<()> {
    let from = capsule.status;
    if to.rank() <= from.rank() {
        return Err(CapsuleError::InvalidTransition { from, to });
    }
    capsule.status = to;
    capsule.record(audit_event(to), now, user_id.map(str::to_owned));
    info!(capsule_id = %capsule.id, %from, %to, "capsule transition");
    Ok(())
}

/// `Draft → Scheduled`. `scheduled_for` mirrors the earliest date condition.
pub fn schedule(capsule: &mut TimeCapsule, now: u64) -> CapsuleResult<bool> {
    match capsule.status {
        CapsuleStatus::Draft => {
            capsule.scheduled_for = capsule.earliest_date();
            transition(capsule, CapsuleStatus::Scheduled, now, None)?;
            Ok(true)
        }
        CapsuleStatus::Scheduled => Ok(false),
        from => Err(CapsuleError::InvalidTransition {
            from,
            to: CapsuleStatus::Scheduled,
        }),
    }
}

/// `Scheduled → Delivered`. Already delivered or opened is a no-op.
pub fn deliver(capsule: &mut TimeCapsule, now: u64) -> CapsuleResult<bool> {
    match capsule.status {
        CapsuleStatus::Scheduled => {
            capsule.delivered_at = Some(now);
            transition(capsule, CapsuleStatus::Delivered, now, None)?;
            Ok(true)
        }
        CapsuleStatus::Delivered | CapsuleStatus::Opened => Ok(false),
        from => Err(CapsuleError::InvalidTransition {
            from,
            to: CapsuleStatus::Delivered,
        }),
    }
}

/// `Delivered → Opened`, arming self-destruct on the first open.
///
/// Access and password checks belong to the caller.
pub fn open(capsule: &mut TimeCapsule, user_id: &str, now: u64) -> CapsuleResult<bool> {
    match capsule.status {
        CapsuleStatus::Delivered => {
            capsule.opened_at = Some(now);
            if let Some(policy) = capsule.self_destruct.filter(|p| p.enabled) {
                capsule.erase_after = Some(now.saturating_add(policy.delay_seconds));
            }
            transition(capsule, CapsuleStatus::Opened, now, Some(user_id))?;
            Ok(true)
        }
        CapsuleStatus::Opened => Ok(false),
        CapsuleStatus::Draft | CapsuleStatus::Scheduled => Err(CapsuleError::ConditionNotMet),
        CapsuleStatus::Deleted => Err(CapsuleError::NotFound(capsule.id.clone())),
    }
}

/// Any live state `→ Deleted`. Contents, recipients and conditions
/// (password digests included) are wiped; the audit trail stays.
pub fn erase(capsule: &mut TimeCapsule, now: u64, user_id: Option<&str>) -> CapsuleResult<bool> {
    if capsule.status == CapsuleStatus::Deleted {
        return Ok(false);
    }
    transition(capsule, CapsuleStatus::Deleted, now, user_id)?;
    capsule.contents.clear();
    capsule.recipients.clear();
    capsule.delivery_conditions.clear();
    capsule.deleted_at = Some(now);
    Ok(true)
}

/// Erase the capsule if its self-destruct deadline has passed.
pub fn purge_if_expired(capsule: &mut TimeCapsule, now: u64) -> CapsuleResult<bool> {
    if capsule.status == CapsuleStatus::Deleted || !capsule.is_expired(now) {
        return Ok(false);
    }
    info!(capsule_id = %capsule.id, "self-destruct deadline reached");
    erase(capsule, now, None)
}

/// Visibility rule. `None` is an unauthenticated reader.
///
/// * deleted or expired: nobody
/// * the creator: always
/// * anyone else: never while still a draft
/// * listed recipients: unless private
/// * everybody: when public
pub fn has_access(capsule: &TimeCapsule, user_id: Option<&str>, now: u64) -> bool {
    if capsule.status == CapsuleStatus::Deleted || capsule.is_expired(now) {
        return false;
    }
    if user_id.is_some_and(|u| capsule.is_creator(u)) {
        return true;
    }
    if capsule.status == CapsuleStatus::Draft {
        return false;
    }
    match capsule.visibility {
        Visibility::Private => false,
        Visibility::Recipients => user_id.is_some_and(|u| capsule.is_recipient(u)),
        Visibility::Public => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tcap_core::{DeliveryCondition, Recipient, SelfDestructPolicy};
    use tcap_crypto::{hash_password, KdfParams};

    fn capsule(visibility: Visibility) -> TimeCapsule {
        let mut c = TimeCapsule::new_draft("c1", "alice", "age1alice", "t", 10);
        c.recipients.push(Recipient::new("bob", "Bob", "age1bob"));
        c.visibility = visibility;
        c
    }

    fn events(c: &TimeCapsule) -> Vec<AuditEvent> {
        c.audit_trail().iter().map(|e| e.event).collect()
    }

    #[test]
    fn test_full_forward_path() {
        let mut c = capsule(Visibility::Recipients);
        assert!(schedule(&mut c, 11).unwrap());
        assert!(deliver(&mut c, 12).unwrap());
        assert!(open(&mut c, "bob", 13).unwrap());
        assert!(erase(&mut c, 14, Some("alice")).unwrap());

        assert_eq!(
            events(&c),
            vec![
                AuditEvent::Created,
                AuditEvent::Scheduled,
                AuditEvent::Delivered,
                AuditEvent::Opened,
                AuditEvent::Deleted,
            ]
        );
        assert_eq!(c.delivered_at, Some(12));
        assert_eq!(c.opened_at, Some(13));
        assert_eq!(c.deleted_at, Some(14));
        assert_eq!(c.audit_trail()[3].user_id.as_deref(), Some("bob"));
    }

    #[test]
    fn test_repeats_are_noops() {
        let mut c = capsule(Visibility::Recipients);
        schedule(&mut c, 1).unwrap();
        assert!(!schedule(&mut c, 2).unwrap());
        deliver(&mut c, 3).unwrap();
        assert!(!deliver(&mut c, 4).unwrap());
        open(&mut c, "bob", 5).unwrap();
        assert!(!open(&mut c, "alice", 6).unwrap());
        assert!(!deliver(&mut c, 7).unwrap());
        assert_eq!(c.audit_trail().len(), 4);
        assert_eq!(c.opened_at, Some(5));
    }

    #[test]
    fn test_backward_moves_rejected() {
        let mut c = capsule(Visibility::Private);
        assert!(matches!(
            deliver(&mut c, 1),
            Err(CapsuleError::InvalidTransition {
                from: CapsuleStatus::Draft,
                to: CapsuleStatus::Delivered
            })
        ));
        schedule(&mut c, 1).unwrap();
        deliver(&mut c, 2).unwrap();
        open(&mut c, "alice", 3).unwrap();
        assert!(matches!(
            schedule(&mut c, 4),
            Err(CapsuleError::InvalidTransition { .. })
        ));
        assert_eq!(c.status, CapsuleStatus::Opened);
    }

    #[test]
    fn test_open_before_delivery() {
        let mut c = capsule(Visibility::Private);
        assert!(matches!(
            open(&mut c, "alice", 1),
            Err(CapsuleError::ConditionNotMet)
        ));
        schedule(&mut c, 1).unwrap();
        assert!(matches!(
            open(&mut c, "alice", 2),
            Err(CapsuleError::ConditionNotMet)
        ));
        assert_eq!(c.audit_trail().len(), 2);
    }

    #[test]
    fn test_self_destruct_armed_on_first_open() {
        let mut c = capsule(Visibility::Recipients);
        c.self_destruct = Some(SelfDestructPolicy {
            enabled: true,
            delay_seconds: 30,
        });
        schedule(&mut c, 1).unwrap();
        deliver(&mut c, 2).unwrap();
        open(&mut c, "bob", 100).unwrap();
        assert_eq!(c.erase_after, Some(130));

        assert!(!purge_if_expired(&mut c, 129).unwrap());
        assert!(purge_if_expired(&mut c, 130).unwrap());
        assert_eq!(c.status, CapsuleStatus::Deleted);
        assert!(c.contents.is_empty());
        assert!(!purge_if_expired(&mut c, 131).unwrap());
    }

    #[test]
    fn test_tombstone_drops_keys_and_digests() {
        let mut c = capsule(Visibility::Recipients);
        c.delivery_conditions = vec![
            DeliveryCondition::Event {
                event_id: "graduation".into(),
            },
            DeliveryCondition::Password {
                digest: hash_password(&SecretString::from("pw"), None, &KdfParams::interactive())
                    .unwrap(),
            },
        ];
        schedule(&mut c, 1).unwrap();

        assert!(erase(&mut c, 2, Some("alice")).unwrap());
        assert!(c.recipients.is_empty());
        assert!(c.delivery_conditions.is_empty());
        assert!(!c.has_password_gate());
        assert_eq!(c.deleted_at, Some(2));
        assert_eq!(events(&c).last(), Some(&AuditEvent::Deleted));
    }

    #[test]
    fn test_disabled_policy_never_arms() {
        let mut c = capsule(Visibility::Recipients);
        c.self_destruct = Some(SelfDestructPolicy {
            enabled: false,
            delay_seconds: 30,
        });
        schedule(&mut c, 1).unwrap();
        deliver(&mut c, 2).unwrap();
        open(&mut c, "bob", 3).unwrap();
        assert_eq!(c.erase_after, None);
    }

    #[test]
    fn test_visibility_rules() {
        let mut private = capsule(Visibility::Private);
        let mut shared = capsule(Visibility::Recipients);
        let mut public = capsule(Visibility::Public);

        // Drafts: creator only
        for c in [&private, &shared, &public] {
            assert!(has_access(c, Some("alice"), 0));
            assert!(!has_access(c, Some("bob"), 0));
            assert!(!has_access(c, None, 0));
        }

        for c in [&mut private, &mut shared, &mut public] {
            schedule(c, 1).unwrap();
        }

        assert!(has_access(&private, Some("alice"), 2));
        assert!(!has_access(&private, Some("bob"), 2));

        assert!(has_access(&shared, Some("bob"), 2));
        assert!(!has_access(&shared, Some("carol"), 2));
        assert!(!has_access(&shared, None, 2));

        assert!(has_access(&public, Some("carol"), 2));
        assert!(has_access(&public, None, 2));

        erase(&mut public, 3, None).unwrap();
        assert!(!has_access(&public, Some("alice"), 4));
    }
}
