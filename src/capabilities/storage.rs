use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::local_user::LocalUser;
use crate::model::{ModId, ModProfile};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable store for the single local-user record.
///
/// `save` must be atomic: a reader never observes a partially written
/// record, and the last completed write wins.
pub trait UserDataStore: Send + Sync {
    fn load(&self) -> Result<Option<LocalUser>, StoreError>;
    fn save(&self, user: &LocalUser) -> Result<(), StoreError>;
}

/// Durable per-mod store, consulted before the network when resolving
/// profiles. `save` is the write-through path for fetched profiles.
pub trait ModStore: Send + Sync {
    fn load_by_id(&self, id: ModId) -> Result<Option<ModProfile>, StoreError>;

    /// Loads whichever of `ids` are present; absent ids are simply omitted.
    fn load_by_ids(&self, ids: &[ModId]) -> Result<Vec<ModProfile>, StoreError>;

    fn save(&self, profile: &ModProfile) -> Result<(), StoreError>;
}

/// Write via a temp file + rename so a crash mid-write leaves the previous
/// record intact.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");

    let mut file = File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// User record persisted as a single JSON file.
#[derive(Debug)]
pub struct JsonFileUserStore {
    path: PathBuf,
}

impl JsonFileUserStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UserDataStore for JsonFileUserStore {
    fn load(&self) -> Result<Option<LocalUser>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path)?;
        match serde_json::from_slice(&data) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                // An unreadable record is recoverable: callers fall back to
                // a fresh default rather than refusing to start.
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "user data file unreadable, starting fresh"
                );
                Ok(None)
            }
        }
    }

    fn save(&self, user: &LocalUser) -> Result<(), StoreError> {
        let data = serde_json::to_vec(user)?;
        write_atomic(&self.path, &data)
    }
}

/// Mod profiles persisted one JSON file per mod id under a root directory.
#[derive(Debug)]
pub struct FileModStore {
    root: PathBuf,
}

impl FileModStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: ModId) -> PathBuf {
        self.root.join(format!("{}.json", id.get()))
    }
}

impl ModStore for FileModStore {
    fn load_by_id(&self, id: ModId) -> Result<Option<ModProfile>, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        match serde_json::from_slice(&data) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "mod profile file unreadable");
                Ok(None)
            }
        }
    }

    fn load_by_ids(&self, ids: &[ModId]) -> Result<Vec<ModProfile>, StoreError> {
        let mut found = Vec::new();
        for id in ids {
            match self.load_by_id(*id) {
                Ok(Some(profile)) => found.push(profile),
                Ok(None) => {}
                // One unreadable entry must not sink the batch.
                Err(e) => warn!(mod_id = %id, error = %e, "skipping unreadable mod profile"),
            }
        }
        Ok(found)
    }

    fn save(&self, profile: &ModProfile) -> Result<(), StoreError> {
        let data = serde_json::to_vec(profile)?;
        write_atomic(&self.path_for(profile.id), &data)
    }
}

/// In-memory user store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    slot: Mutex<Option<LocalUser>>,
    saves: AtomicUsize,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(user: LocalUser) -> Self {
        Self {
            slot: Mutex::new(Some(user)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl UserDataStore for MemoryUserStore {
    fn load(&self) -> Result<Option<LocalUser>, StoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, user: &LocalUser) -> Result<(), StoreError> {
        *self.slot.lock() = Some(user.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory mod store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryModStore {
    entries: Mutex<HashMap<ModId, ModProfile>>,
}

impl MemoryModStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: ModProfile) {
        self.entries.lock().insert(profile.id, profile);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ModStore for MemoryModStore {
    fn load_by_id(&self, id: ModId) -> Result<Option<ModProfile>, StoreError> {
        Ok(self.entries.lock().get(&id).cloned())
    }

    fn load_by_ids(&self, ids: &[ModId]) -> Result<Vec<ModProfile>, StoreError> {
        let entries = self.entries.lock();
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }

    fn save(&self, profile: &ModProfile) -> Result<(), StoreError> {
        self.entries.lock().insert(profile.id, profile.clone());
        Ok(())
    }
}
