//! Capsule service: the operations callers use.
//!
//! A single actor. Every mutating call loads the whole store, changes the
//! loaded copy, and saves only after the change succeeded, so a failed call
//! leaves persisted state untouched. Expired self-destruct capsules are
//! purged on every load.

use std::collections::HashSet;

use secrecy::{ExposeSecret, SecretString};
use tcap_core::{
    AuditEvent, CapsuleError, CapsuleResult, CapsuleStatus, DeliveryCondition, Recipient,
    SelfDestructPolicy, TimeCapsule, Visibility,
};
use tcap_crypto::{
    hash_password, open_all_for_recipient, seal_for_recipients, verify_password, ContentItem,
    CryptoError, IdentityKeyPair, KdfParams,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::conditions::{self, ConditionSources};
use crate::lifecycle;
use crate::repository::CapsuleRepository;

/// A delivery condition as the creator supplies it.
///
/// Same as [`DeliveryCondition`] except that a password is given in plain
/// form and hashed during creation.
#[derive(Debug)]
pub enum ConditionSpec {
    Date {
        target_timestamp: u64,
    },
    Location {
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    },
    Event {
        event_id: String,
    },
    Password {
        password: SecretString,
    },
    Biometric {
        challenge_id: String,
    },
}

#[derive(Debug, Default)]
pub struct CreateCapsuleParams {
    pub title: String,
    pub description: Option<String>,
    pub contents: Vec<ContentItem>,
    pub recipients: Vec<Recipient>,
    pub conditions: Vec<ConditionSpec>,
    pub self_destruct: Option<SelfDestructPolicy>,
    pub visibility: Visibility,
    pub is_anonymous: bool,
}

/// Metadata edits allowed while a capsule is still a draft
#[derive(Debug, Default, Clone)]
pub struct DraftUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

pub struct CapsuleService<R, C = SystemClock> {
    repo: R,
    clock: C,
    kdf: KdfParams,
    /// (capsule id, user id) pairs that passed a password check this session
    unlocked: HashSet<(String, String)>,
}

impl<R: CapsuleRepository, C: Clock> CapsuleService<R, C> {
    pub fn new(repo: R, clock: C) -> Self {
        Self {
            repo,
            clock,
            kdf: KdfParams::default(),
            unlocked: HashSet::new(),
        }
    }

    /// Argon2id parameters for new password conditions.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub async fn create_capsule(
        &mut self,
        creator_id: &str,
        creator_public_key: &str,
        params: CreateCapsuleParams,
    ) -> CapsuleResult<TimeCapsule> {
        validate_params(creator_id, &params)?;

        let delivery_conditions = self.resolve_conditions(params.conditions).await?;
        let now = self.clock.now();

        let mut capsule = TimeCapsule::new_draft(
            Uuid::new_v4().to_string(),
            creator_id,
            creator_public_key,
            params.title.trim(),
            now,
        );
        capsule.description = params.description;
        capsule.recipients = params.recipients;
        capsule.delivery_conditions = delivery_conditions;
        capsule.self_destruct = params.self_destruct;
        capsule.visibility = params.visibility;
        capsule.is_anonymous = params.is_anonymous;

        let holders = capsule.key_holders();
        for item in params.contents {
            capsule
                .contents
                .push(seal_for_recipients(item, holders.clone()).await?);
        }

        if capsule.earliest_date().is_some() {
            lifecycle::schedule(&mut capsule, now)?;
        }

        let mut all = self.load_live()?;
        all.push(capsule.clone());
        self.repo.save_all_capsules(&all)?;

        info!(
            capsule_id = %capsule.id,
            creator = %creator_id,
            items = capsule.contents.len(),
            recipients = capsule.recipients.len(),
            status = %capsule.status,
            "capsule created"
        );
        Ok(capsule)
    }

    /// Capsules the user created or is a recipient of, filtered by visibility.
    pub fn get_capsules_for_user(&mut self, user_id: &str) -> CapsuleResult<Vec<TimeCapsule>> {
        let now = self.clock.now();
        Ok(self
            .load_live()?
            .into_iter()
            .filter(|c| c.is_creator(user_id) || c.is_recipient(user_id))
            .filter(|c| lifecycle::has_access(c, Some(user_id), now))
            .collect())
    }

    /// `None` when the capsule does not exist or the requester may not see it.
    pub fn get_capsule_by_id(
        &mut self,
        id: &str,
        requesting_user_id: Option<&str>,
    ) -> CapsuleResult<Option<TimeCapsule>> {
        let now = self.clock.now();
        Ok(self
            .load_live()?
            .into_iter()
            .find(|c| c.id == id)
            .filter(|c| lifecycle::has_access(c, requesting_user_id, now)))
    }

    pub fn get_public_capsules(&mut self) -> CapsuleResult<Vec<TimeCapsule>> {
        Ok(self
            .load_live()?
            .into_iter()
            .filter(|c| c.visibility == Visibility::Public)
            .filter(|c| {
                matches!(
                    c.status,
                    CapsuleStatus::Scheduled | CapsuleStatus::Delivered | CapsuleStatus::Opened
                )
            })
            .collect())
    }

    /// Decrypt every item the identity holds a key for.
    ///
    /// Gates are checked against the stored record, not the caller's copy,
    /// so a capsule deleted or purged since it was fetched stays unreadable.
    /// Best effort: items that fail to open are skipped. Non-creators need
    /// visibility access, delivery and, on password-gated capsules, a pass
    /// through [`CapsuleService::verify_capsule_password`].
    pub async fn decrypt_capsule_contents(
        &mut self,
        capsule: &TimeCapsule,
        identity: &IdentityKeyPair,
    ) -> CapsuleResult<Vec<ContentItem>> {
        let now = self.clock.now();
        let stored = self
            .load_live()?
            .into_iter()
            .find(|c| c.id == capsule.id)
            .filter(|c| c.status != CapsuleStatus::Deleted && !c.is_expired(now))
            .ok_or_else(|| CapsuleError::NotFound(capsule.id.clone()))?;

        let holder = key_holder_id(&stored, identity).ok_or(CapsuleError::AccessDenied)?;
        if !lifecycle::has_access(&stored, Some(&holder), now) {
            return Err(CapsuleError::AccessDenied);
        }

        if !stored.is_creator(&holder) {
            if stored.status.rank() < CapsuleStatus::Delivered.rank() {
                return Err(CapsuleError::ConditionNotMet);
            }
            if stored.has_password_gate() && !self.is_unlocked(&stored.id, &holder) {
                return Err(CapsuleError::PasswordMismatch);
            }
        }

        decrypt_envelopes(&stored, holder, identity).await
    }

    /// `Draft → Scheduled`.
    pub fn schedule(&mut self, id: &str) -> CapsuleResult<TimeCapsule> {
        self.update(id, |capsule, now| lifecycle::schedule(capsule, now).map(|_| ()))
    }

    /// Edit title or description of a draft. Creator only.
    pub fn update_draft(
        &mut self,
        id: &str,
        user_id: &str,
        update: DraftUpdate,
    ) -> CapsuleResult<TimeCapsule> {
        self.update(id, |capsule, now| {
            if !capsule.is_creator(user_id) {
                return Err(CapsuleError::AccessDenied);
            }
            if capsule.status != CapsuleStatus::Draft {
                return Err(CapsuleError::InvalidInput(format!(
                    "capsule is {}, only drafts can be edited",
                    capsule.status
                )));
            }

            let mut changed = false;
            if let Some(title) = update.title {
                let title = title.trim();
                if title.is_empty() {
                    return Err(CapsuleError::InvalidInput("title must not be empty".into()));
                }
                if title != capsule.title {
                    capsule.title = title.to_owned();
                    changed = true;
                }
            }
            if let Some(description) = update.description {
                if capsule.description.as_deref() != Some(description.as_str()) {
                    capsule.description = Some(description);
                    changed = true;
                }
            }
            if changed {
                capsule.record(AuditEvent::Modified, now, Some(user_id.to_owned()));
            }
            Ok(())
        })
    }

    /// `Scheduled → Delivered`, regardless of conditions.
    pub fn mark_delivered(&mut self, id: &str) -> CapsuleResult<TimeCapsule> {
        self.update(id, |capsule, now| lifecycle::deliver(capsule, now).map(|_| ()))
    }

    /// `Delivered → Opened` for a user with access.
    pub fn mark_opened(&mut self, id: &str, user_id: &str) -> CapsuleResult<TimeCapsule> {
        let unlocked = self.is_unlocked(id, user_id);
        self.update(id, |capsule, now| {
            if !lifecycle::has_access(capsule, Some(user_id), now) {
                return Err(CapsuleError::AccessDenied);
            }
            if capsule.status.rank() < CapsuleStatus::Delivered.rank() {
                return Err(CapsuleError::ConditionNotMet);
            }
            if capsule.has_password_gate() && !unlocked {
                return Err(CapsuleError::PasswordMismatch);
            }
            lifecycle::open(capsule, user_id, now).map(|_| ())
        })
    }

    /// Check a password attempt and, on success, unlock the capsule for
    /// this user for the rest of the session.
    pub async fn verify_capsule_password(
        &mut self,
        id: &str,
        user_id: &str,
        password: SecretString,
    ) -> CapsuleResult<()> {
        let now = self.clock.now();
        let capsule = self
            .load_live()?
            .into_iter()
            .find(|c| c.id == id && c.status != CapsuleStatus::Deleted)
            .ok_or_else(|| CapsuleError::NotFound(id.to_owned()))?;
        if !lifecycle::has_access(&capsule, Some(user_id), now) {
            return Err(CapsuleError::AccessDenied);
        }

        let digests: Vec<_> = capsule.password_gates().cloned().collect();
        let matched = tokio::task::spawn_blocking(move || {
            digests.is_empty() || digests.iter().any(|d| verify_password(&password, d))
        })
        .await
        .map_err(CryptoError::from)?;

        if !matched {
            warn!(capsule_id = %id, user = %user_id, "password mismatch");
            return Err(CapsuleError::PasswordMismatch);
        }
        self.unlocked.insert((id.to_owned(), user_id.to_owned()));
        debug!(capsule_id = %id, user = %user_id, "capsule unlocked");
        Ok(())
    }

    /// Mark opened and decrypt in one step.
    ///
    /// The identity must belong to `user_id`. Content is returned even when
    /// a zero-delay self-destruct erases the capsule on this very open.
    pub async fn open_capsule(
        &mut self,
        id: &str,
        user_id: &str,
        identity: &IdentityKeyPair,
    ) -> CapsuleResult<(TimeCapsule, Vec<ContentItem>)> {
        let current = self
            .get_capsule_by_id(id, Some(user_id))?
            .ok_or_else(|| CapsuleError::NotFound(id.to_owned()))?;
        if key_holder_id(&current, identity).as_deref() != Some(user_id) {
            return Err(CapsuleError::AccessDenied);
        }

        let opened = self.mark_opened(id, user_id)?;
        let items = decrypt_envelopes(&opened, user_id.to_owned(), identity).await?;
        Ok((opened, items))
    }

    /// Any live state `→ Deleted`. The tombstone keeps the audit trail.
    pub fn delete_capsule(&mut self, id: &str) -> CapsuleResult<()> {
        self.update(id, |capsule, now| lifecycle::erase(capsule, now, None).map(|_| ()))?;
        self.forget_grants(&[id.to_owned()]);
        Ok(())
    }

    /// Deliver every scheduled capsule whose conditions are met now.
    pub fn sweep_eligible_deliveries(
        &mut self,
        sources: &ConditionSources,
    ) -> CapsuleResult<Vec<TimeCapsule>> {
        let now = self.clock.now();
        let ctx = sources.at(now);
        let mut all = self.load_live()?;

        let mut delivered = Vec::new();
        for capsule in all
            .iter_mut()
            .filter(|c| c.status == CapsuleStatus::Scheduled)
        {
            if conditions::is_eligible(&capsule.delivery_conditions, &ctx) {
                lifecycle::deliver(capsule, now)?;
                delivered.push(capsule.clone());
            }
        }

        if !delivered.is_empty() {
            self.repo.save_all_capsules(&all)?;
        }
        debug!(delivered = delivered.len(), "delivery sweep complete");
        Ok(delivered)
    }

    /// Erase capsules past their self-destruct deadline. Returns their ids.
    pub fn purge_expired(&mut self) -> CapsuleResult<Vec<String>> {
        let (_, purged) = self.load_purged()?;
        Ok(purged)
    }

    fn is_unlocked(&self, capsule_id: &str, user_id: &str) -> bool {
        self.unlocked
            .contains(&(capsule_id.to_owned(), user_id.to_owned()))
    }

    fn forget_grants(&mut self, capsule_ids: &[String]) {
        self.unlocked.retain(|(id, _)| !capsule_ids.contains(id));
    }

    async fn resolve_conditions(
        &self,
        specs: Vec<ConditionSpec>,
    ) -> CapsuleResult<Vec<DeliveryCondition>> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            resolved.push(match spec {
                ConditionSpec::Date { target_timestamp } => {
                    DeliveryCondition::Date { target_timestamp }
                }
                ConditionSpec::Location {
                    latitude,
                    longitude,
                    radius_meters,
                } => DeliveryCondition::Location {
                    latitude,
                    longitude,
                    radius_meters,
                },
                ConditionSpec::Event { event_id } => DeliveryCondition::Event { event_id },
                ConditionSpec::Password { password } => {
                    let kdf = self.kdf;
                    let digest =
                        tokio::task::spawn_blocking(move || hash_password(&password, None, &kdf))
                            .await
                            .map_err(CryptoError::from)??;
                    DeliveryCondition::Password { digest }
                }
                ConditionSpec::Biometric { challenge_id } => {
                    DeliveryCondition::Biometric { challenge_id }
                }
            });
        }
        Ok(resolved)
    }

    /// Load the store, erase whatever has expired, and persist that if needed.
    fn load_purged(&mut self) -> CapsuleResult<(Vec<TimeCapsule>, Vec<String>)> {
        let now = self.clock.now();
        let mut all = self.repo.load_all_capsules()?;

        let mut purged = Vec::new();
        for capsule in all.iter_mut() {
            if lifecycle::purge_if_expired(capsule, now)? {
                purged.push(capsule.id.clone());
            }
        }

        if !purged.is_empty() {
            self.repo.save_all_capsules(&all)?;
            self.forget_grants(&purged);
            info!(count = purged.len(), "purged self-destructed capsules");
        }
        Ok((all, purged))
    }

    fn load_live(&mut self) -> CapsuleResult<Vec<TimeCapsule>> {
        self.load_purged().map(|(all, _)| all)
    }

    /// Apply `f` to one live capsule and persist the result if it changed.
    fn update<F>(&mut self, id: &str, f: F) -> CapsuleResult<TimeCapsule>
    where
        F: FnOnce(&mut TimeCapsule, u64) -> CapsuleResult<()>,
    {
        let now = self.clock.now();
        let mut all = self.load_live()?;
        let capsule = all
            .iter_mut()
            .find(|c| c.id == id && c.status != CapsuleStatus::Deleted)
            .ok_or_else(|| CapsuleError::NotFound(id.to_owned()))?;

        let before = capsule.clone();
        f(capsule, now)?;
        let after = capsule.clone();

        if after != before {
            self.repo.save_all_capsules(&all)?;
        }
        Ok(after)
    }
}

fn validate_params(creator_id: &str, params: &CreateCapsuleParams) -> CapsuleResult<()> {
    if creator_id.trim().is_empty() {
        return Err(CapsuleError::InvalidInput("creator id must not be empty".into()));
    }
    if params.title.trim().is_empty() {
        return Err(CapsuleError::InvalidInput("title must not be empty".into()));
    }

    let mut seen = HashSet::new();
    for recipient in &params.recipients {
        if recipient.id.trim().is_empty() {
            return Err(CapsuleError::InvalidInput(
                "recipient id must not be empty".into(),
            ));
        }
        if !seen.insert(recipient.id.as_str()) {
            return Err(CapsuleError::InvalidInput(format!(
                "duplicate recipient: {}",
                recipient.id
            )));
        }
    }

    for spec in &params.conditions {
        match spec {
            ConditionSpec::Location {
                latitude,
                longitude,
                radius_meters,
            } => {
                if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                    return Err(CapsuleError::InvalidInput(format!(
                        "coordinates out of range: {latitude}, {longitude}"
                    )));
                }
                if !radius_meters.is_finite() || *radius_meters < 0.0 {
                    return Err(CapsuleError::InvalidInput(format!(
                        "invalid radius: {radius_meters}"
                    )));
                }
            }
            ConditionSpec::Event { event_id } if event_id.is_empty() => {
                return Err(CapsuleError::InvalidInput("event id must not be empty".into()));
            }
            ConditionSpec::Biometric { challenge_id } if challenge_id.is_empty() => {
                return Err(CapsuleError::InvalidInput(
                    "challenge id must not be empty".into(),
                ));
            }
            ConditionSpec::Password { password } => {
                if password.expose_secret().is_empty() {
                    return Err(CapsuleError::InvalidInput(
                        "password must not be empty".into(),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// The user id whose wrapped keys this identity can open.
fn key_holder_id(capsule: &TimeCapsule, identity: &IdentityKeyPair) -> Option<String> {
    let public_key = identity.public_key();
    if capsule.creator_public_key == public_key {
        return Some(capsule.creator_id.clone());
    }
    capsule
        .recipients
        .iter()
        .find(|r| r.public_key == public_key)
        .map(|r| r.id.clone())
}

async fn decrypt_envelopes(
    capsule: &TimeCapsule,
    holder: String,
    identity: &IdentityKeyPair,
) -> CapsuleResult<Vec<ContentItem>> {
    let total = capsule.contents.len();
    let items = open_all_for_recipient(capsule.contents.clone(), holder, identity.clone()).await?;
    if items.len() < total {
        warn!(
            capsule_id = %capsule.id,
            decrypted = items.len(),
            total,
            "partial decryption"
        );
    }
    Ok(items)
}
