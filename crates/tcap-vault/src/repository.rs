//! Capsule persistence port.
//!
//! Two adapters are available:
//!   - **Memory**: a plain `Vec`, for tests and dry runs.
//!   - **JSON file**: pretty JSON on disk, written atomically via temp+rename.
//!
//! The lifecycle loads everything, works on the loaded copy, and saves the
//! whole set back only once an operation has succeeded.

use std::path::{Path, PathBuf};

use tcap_core::{CapsuleError, CapsuleResult, TimeCapsule};

pub trait CapsuleRepository: Send {
    fn load_all_capsules(&self) -> CapsuleResult<Vec<TimeCapsule>>;
    fn save_all_capsules(&mut self, capsules: &[TimeCapsule]) -> CapsuleResult<()>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    capsules: Vec<TimeCapsule>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capsules(capsules: Vec<TimeCapsule>) -> Self {
        Self { capsules }
    }
}

impl CapsuleRepository for MemoryRepository {
    fn load_all_capsules(&self) -> CapsuleResult<Vec<TimeCapsule>> {
        Ok(self.capsules.clone())
    }

    fn save_all_capsules(&mut self, capsules: &[TimeCapsule]) -> CapsuleResult<()> {
        self.capsules = capsules.to_vec();
        Ok(())
    }
}

/// Capsule store persisted to a single JSON file
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    /// A missing file reads as an empty store; it is created on first save.
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CapsuleRepository for JsonFileRepository {
    fn load_all_capsules(&self) -> CapsuleResult<Vec<TimeCapsule>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            CapsuleError::Storage(format!("parsing capsule store {}: {e}", self.path.display()))
        })
    }

    fn save_all_capsules(&mut self, capsules: &[TimeCapsule]) -> CapsuleResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(capsules)
            .map_err(|e| CapsuleError::Storage(format!("serializing capsule store: {e}")))?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), count = capsules.len(), "saved capsule store");
        Ok(())
    }
}
