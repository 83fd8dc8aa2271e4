//! Persistence layer.
//!
//! The engine only needs load/save over a fixed snapshot shape. The
//! default gateway writes the snapshot to a JSON file; an in-memory
//! gateway backs headless runs that should leave nothing on disk.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::Snapshot;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "coinflip_state.json";

/// Load/save capability over the full game snapshot.
pub trait PersistenceGateway: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>>;

    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Snapshot stored as pretty-printed JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the state file (for testing or a hard reset).
    pub fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to delete state file {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl PersistenceGateway for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        let path = self.path.display();

        if !self.path.exists() {
            info!(%path, "No saved state found, starting fresh");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {path}"))?;

        let snapshot: Snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse state from {path}"))?;

        info!(
            %path,
            balance = snapshot.balance,
            history = snapshot.history.len(),
            "State loaded from disk"
        );

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path.display();
        let json = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialise game state")?;

        std::fs::write(&self.path, &json)
            .with_context(|| format!("Failed to write state to {path}"))?;

        debug!(%path, balance = snapshot.balance, "State saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Keeps the last saved snapshot in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a previously saved snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// The last saved snapshot, if any.
    pub fn last_saved(&self) -> Option<Snapshot> {
        self.slot.lock().clone()
    }
}

impl PersistenceGateway for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
