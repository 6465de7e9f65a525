use serde::{Deserialize, Serialize};
use tcap_crypto::{EncryptedEnvelope, PasswordDigest, RecipientKey};

/// Lifecycle state of a capsule.
///
/// Ordered: a capsule only ever moves to a state with a higher rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    /// Created, not yet waiting on delivery conditions
    Draft,
    /// Waiting for a delivery condition to be met
    Scheduled,
    /// Conditions met, readable by those with access
    Delivered,
    /// Opened at least once
    Opened,
    /// Erased (self-destruct or explicit delete); terminal
    Deleted,
}

impl CapsuleStatus {
    pub fn rank(self) -> u8 {
        match self {
            CapsuleStatus::Draft => 0,
            CapsuleStatus::Scheduled => 1,
            CapsuleStatus::Delivered => 2,
            CapsuleStatus::Opened => 3,
            CapsuleStatus::Deleted => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CapsuleStatus::Draft => "draft",
            CapsuleStatus::Scheduled => "scheduled",
            CapsuleStatus::Delivered => "delivered",
            CapsuleStatus::Opened => "opened",
            CapsuleStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for CapsuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may retrieve a capsule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Creator only
    #[default]
    Private,
    /// Creator and listed recipients
    Recipients,
    /// Anyone, once the capsule has left draft
    Public,
}

/// A capsule recipient. Fixed once the capsule is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub display_name: String,
    /// age X25519 public key (`age1…`)
    pub public_key: String,
}

impl Recipient {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            public_key: public_key.into(),
        }
    }

    pub fn key(&self) -> RecipientKey {
        RecipientKey::new(self.id.clone(), self.public_key.clone())
    }
}

/// WGS84 coordinates in decimal degrees, as reported by a position source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A condition under which a capsule becomes deliverable.
///
/// A capsule may carry several; meeting any one of them is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryCondition {
    /// Deliverable at or after `target_timestamp` (Unix seconds)
    Date { target_timestamp: u64 },
    /// Deliverable when the reader is within `radius_meters` of the point
    Location {
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    },
    /// Deliverable once an external registry confirms `event_id`
    Event { event_id: String },
    /// Gates opening rather than delivery
    Password { digest: PasswordDigest },
    /// Deliverable once an external channel asserts `challenge_id`
    Biometric { challenge_id: String },
}

impl DeliveryCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryCondition::Date { .. } => "date",
            DeliveryCondition::Location { .. } => "location",
            DeliveryCondition::Event { .. } => "event",
            DeliveryCondition::Password { .. } => "password",
            DeliveryCondition::Biometric { .. } => "biometric",
        }
    }
}

/// Erase the capsule `delay_seconds` after it is first opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDestructPolicy {
    pub enabled: bool,
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Modified,
    Scheduled,
    Delivered,
    Opened,
    Deleted,
}

/// One immutable audit trail record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Aggregate root: a sealed capsule and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCapsule {
    pub id: String,
    pub creator_id: String,
    /// Creator's age public key; the creator always holds a wrapped key
    pub creator_public_key: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub contents: Vec<EncryptedEnvelope>,
    pub recipients: Vec<Recipient>,
    pub delivery_conditions: Vec<DeliveryCondition>,
    #[serde(default)]
    pub self_destruct: Option<SelfDestructPolicy>,
    pub visibility: Visibility,
    #[serde(default)]
    pub is_anonymous: bool,
    pub status: CapsuleStatus,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub scheduled_for: Option<u64>,
    #[serde(default)]
    pub delivered_at: Option<u64>,
    #[serde(default)]
    pub opened_at: Option<u64>,
    /// Persisted self-destruct deadline, set when first opened
    #[serde(default)]
    pub erase_after: Option<u64>,
    #[serde(default)]
    pub deleted_at: Option<u64>,
    audit_trail: Vec<AuditEntry>,
}

impl TimeCapsule {
    /// A fresh draft with a `created` audit entry and no content yet.
    pub fn new_draft(
        id: impl Into<String>,
        creator_id: impl Into<String>,
        creator_public_key: impl Into<String>,
        title: impl Into<String>,
        now: u64,
    ) -> Self {
        let creator_id = creator_id.into();
        let mut capsule = Self {
            id: id.into(),
            creator_id: creator_id.clone(),
            creator_public_key: creator_public_key.into(),
            title: title.into(),
            description: None,
            contents: Vec::new(),
            recipients: Vec::new(),
            delivery_conditions: Vec::new(),
            self_destruct: None,
            visibility: Visibility::default(),
            is_anonymous: false,
            status: CapsuleStatus::Draft,
            created_at: now,
            updated_at: now,
            scheduled_for: None,
            delivered_at: None,
            opened_at: None,
            erase_after: None,
            deleted_at: None,
            audit_trail: Vec::new(),
        };
        capsule.record(AuditEvent::Created, now, Some(creator_id));
        capsule
    }

    /// Append an audit entry. The trail has no other mutator.
    pub fn record(&mut self, event: AuditEvent, timestamp: u64, user_id: Option<String>) {
        self.audit_trail.push(AuditEntry {
            event,
            timestamp,
            user_id,
        });
        self.updated_at = timestamp;
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    pub fn is_creator(&self, user_id: &str) -> bool {
        self.creator_id == user_id
    }

    pub fn is_recipient(&self, user_id: &str) -> bool {
        self.recipients.iter().any(|r| r.id == user_id)
    }

    /// Password digests gating this capsule's opening
    pub fn password_gates(&self) -> impl Iterator<Item = &PasswordDigest> {
        self.delivery_conditions.iter().filter_map(|c| match c {
            DeliveryCondition::Password { digest } => Some(digest),
            _ => None,
        })
    }

    pub fn has_password_gate(&self) -> bool {
        self.password_gates().next().is_some()
    }

    /// Earliest `date` condition target, if any
    pub fn earliest_date(&self) -> Option<u64> {
        self.delivery_conditions
            .iter()
            .filter_map(|c| match c {
                DeliveryCondition::Date { target_timestamp } => Some(*target_timestamp),
                _ => None,
            })
            .min()
    }

    /// Whether the self-destruct deadline has passed at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.erase_after.is_some_and(|deadline| now >= deadline)
    }

    /// Key holders for sealing: the creator, plus every recipient unless
    /// the capsule is private.
    pub fn key_holders(&self) -> Vec<RecipientKey> {
        let mut holders = vec![RecipientKey::new(
            self.creator_id.clone(),
            self.creator_public_key.clone(),
        )];
        if self.visibility == Visibility::Private {
            return holders;
        }
        holders.extend(
            self.recipients
                .iter()
                .filter(|r| r.id != self.creator_id)
                .map(Recipient::key),
        );
        holders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcap_crypto::{hash_password, KdfParams};

    fn sample() -> TimeCapsule {
        let mut capsule = TimeCapsule::new_draft("c1", "alice", "age1alice", "Hello", 100);
        capsule.recipients.push(Recipient::new("bob", "Bob", "age1bob"));
        capsule.delivery_conditions = vec![
            DeliveryCondition::Date {
                target_timestamp: 500,
            },
            DeliveryCondition::Date {
                target_timestamp: 300,
            },
            DeliveryCondition::Event {
                event_id: "graduation".into(),
            },
        ];
        capsule
    }

    #[test]
    fn test_new_draft_records_creation() {
        let capsule = sample();
        assert_eq!(capsule.status, CapsuleStatus::Draft);
        assert_eq!(capsule.audit_trail().len(), 1);
        assert_eq!(capsule.audit_trail()[0].event, AuditEvent::Created);
        assert_eq!(capsule.audit_trail()[0].user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_status_ranks_are_monotonic() {
        let order = [
            CapsuleStatus::Draft,
            CapsuleStatus::Scheduled,
            CapsuleStatus::Delivered,
            CapsuleStatus::Opened,
            CapsuleStatus::Deleted,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_condition_kind_names() {
        let event = DeliveryCondition::Event {
            event_id: "x".into(),
        };
        assert_eq!(event.kind(), "event");
        assert_eq!(
            serde_json::to_value(&event).unwrap()["type"],
            event.kind()
        );
    }

    #[test]
    fn test_earliest_date() {
        assert_eq!(sample().earliest_date(), Some(300));
    }

    #[test]
    fn test_key_holders_include_creator_once() {
        let mut capsule = sample();
        capsule.visibility = Visibility::Recipients;
        capsule
            .recipients
            .push(Recipient::new("alice", "Alice", "age1alice"));

        let ids: Vec<_> = capsule.key_holders().into_iter().map(|k| k.id).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[test]
    fn test_private_capsule_seals_for_creator_only() {
        let mut capsule = sample();
        capsule.visibility = Visibility::Private;

        let ids: Vec<_> = capsule.key_holders().into_iter().map(|k| k.id).collect();
        assert_eq!(ids, vec!["alice"]);
    }

    #[test]
    fn test_condition_json_is_tagged() {
        let json = serde_json::to_value(DeliveryCondition::Location {
            latitude: 48.85,
            longitude: 2.35,
            radius_meters: 100.0,
        })
        .unwrap();
        assert_eq!(json["type"], "location");
        assert_eq!(json["radius_meters"], 100.0);
    }

    #[test]
    fn test_capsule_json_roundtrip_keeps_audit_trail() {
        let mut capsule = sample();
        let digest = hash_password(
            &secrecy::SecretString::from("pw"),
            None,
            &KdfParams::interactive(),
        )
        .unwrap();
        capsule
            .delivery_conditions
            .push(DeliveryCondition::Password { digest });
        capsule.self_destruct = Some(SelfDestructPolicy {
            enabled: true,
            delay_seconds: 60,
        });
        capsule.record(AuditEvent::Scheduled, 150, None);

        let json = serde_json::to_string(&capsule).unwrap();
        let restored: TimeCapsule = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, capsule);
        assert_eq!(restored.audit_trail().len(), 2);
        assert!(restored.has_password_gate());
    }

    #[test]
    fn test_expiry() {
        let mut capsule = sample();
        assert!(!capsule.is_expired(u64::MAX));
        capsule.erase_after = Some(1000);
        assert!(!capsule.is_expired(999));
        assert!(capsule.is_expired(1000));
    }
}
