//! Delivery condition evaluator.
//!
//! Pure predicates over a condition and an [`EvaluationContext`]. External
//! signals (position, events, biometric assertions) come in through optional
//! ports; an unwired port means the condition is simply not met yet.

use std::collections::HashSet;
use std::sync::Arc;

use tcap_core::{DeliveryCondition, GeoPoint};

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Reports the reader's current position
pub trait PositionSource: Send + Sync {
    /// `None` when no fix is available
    fn current_position(&self) -> Option<GeoPoint>;
}

/// Confirms that a named external event has occurred
pub trait EventRegistry: Send + Sync {
    fn has_occurred(&self, event_id: &str) -> bool;
}

/// Asserts that a biometric challenge has been passed
pub trait BiometricChannel: Send + Sync {
    fn is_asserted(&self, challenge_id: &str) -> bool;
}

/// A fixed position, e.g. from a `--at` flag
impl PositionSource for GeoPoint {
    fn current_position(&self) -> Option<GeoPoint> {
        Some(*self)
    }
}

impl EventRegistry for HashSet<String> {
    fn has_occurred(&self, event_id: &str) -> bool {
        self.contains(event_id)
    }
}

impl BiometricChannel for HashSet<String> {
    fn is_asserted(&self, challenge_id: &str) -> bool {
        self.contains(challenge_id)
    }
}

/// Long-lived set of wired ports, owned by whoever runs sweeps.
#[derive(Clone, Default)]
pub struct ConditionSources {
    pub position: Option<Arc<dyn PositionSource>>,
    pub events: Option<Arc<dyn EventRegistry>>,
    pub biometrics: Option<Arc<dyn BiometricChannel>>,
}

impl ConditionSources {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.position = Some(source);
        self
    }

    pub fn with_events(mut self, registry: Arc<dyn EventRegistry>) -> Self {
        self.events = Some(registry);
        self
    }

    pub fn with_biometrics(mut self, channel: Arc<dyn BiometricChannel>) -> Self {
        self.biometrics = Some(channel);
        self
    }

    /// Snapshot for evaluating at `now`.
    pub fn at(&self, now: u64) -> EvaluationContext<'_> {
        EvaluationContext {
            now,
            position: self.position.as_deref(),
            events: self.events.as_deref(),
            biometrics: self.biometrics.as_deref(),
        }
    }
}

impl std::fmt::Debug for ConditionSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionSources")
            .field("position", &self.position.is_some())
            .field("events", &self.events.is_some())
            .field("biometrics", &self.biometrics.is_some())
            .finish()
    }
}

/// Everything a condition may be evaluated against
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub now: u64,
    pub position: Option<&'a dyn PositionSource>,
    pub events: Option<&'a dyn EventRegistry>,
    pub biometrics: Option<&'a dyn BiometricChannel>,
}

impl EvaluationContext<'_> {
    /// Only the clock is wired.
    pub fn at(now: u64) -> Self {
        EvaluationContext {
            now,
            position: None,
            events: None,
            biometrics: None,
        }
    }
}

/// Great-circle distance between two points, in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

pub fn is_satisfied(condition: &DeliveryCondition, ctx: &EvaluationContext<'_>) -> bool {
    match condition {
        DeliveryCondition::Date { target_timestamp } => ctx.now >= *target_timestamp,
        DeliveryCondition::Location {
            latitude,
            longitude,
            radius_meters,
        } => {
            let target = GeoPoint {
                latitude: *latitude,
                longitude: *longitude,
            };
            ctx.position
                .and_then(|p| p.current_position())
                .is_some_and(|here| haversine_distance(here, target) <= *radius_meters)
        }
        DeliveryCondition::Event { event_id } => {
            ctx.events.is_some_and(|r| r.has_occurred(event_id))
        }
        // Gates opening, checked at open time
        DeliveryCondition::Password { .. } => false,
        DeliveryCondition::Biometric { challenge_id } => {
            ctx.biometrics.is_some_and(|c| c.is_asserted(challenge_id))
        }
    }
}

/// OR over every non-password condition. No such condition means never eligible.
pub fn is_eligible(conditions: &[DeliveryCondition], ctx: &EvaluationContext<'_>) -> bool {
    conditions
        .iter()
        .filter(|c| !matches!(c, DeliveryCondition::Password { .. }))
        .any(|c| is_satisfied(c, ctx))
}
