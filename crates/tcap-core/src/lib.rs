pub mod config;
pub mod error;
pub mod types;

pub use config::TcapConfig;
pub use error::{CapsuleError, CapsuleResult};
pub use types::{
    AuditEntry, AuditEvent, CapsuleStatus, DeliveryCondition, GeoPoint, Recipient,
    SelfDestructPolicy, TimeCapsule, Visibility,
};
