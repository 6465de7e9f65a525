//! tcap-vault: capsule lifecycle for the tcap time-capsule vault
//!
//! ```text
//! caller ──► CapsuleService ──► lifecycle (state machine + audit trail)
//!                │    │
//!                │    └──► conditions (delivery evaluator, OR semantics)
//!                │
//!                ├──► tcap-crypto (seal / open envelopes, Argon2id)
//!                └──► CapsuleRepository (memory | JSON file)
//! ```

pub mod clock;
pub mod conditions;
pub mod lifecycle;
pub mod repository;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conditions::{
    is_eligible, is_satisfied, BiometricChannel, ConditionSources, EvaluationContext,
    EventRegistry, PositionSource,
};
pub use repository::{CapsuleRepository, JsonFileRepository, MemoryRepository};
pub use service::{CapsuleService, ConditionSpec, CreateCapsuleParams, DraftUpdate};
