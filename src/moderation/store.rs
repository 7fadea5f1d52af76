//! Sanction store
//!
//! Central map of sanctions, mirrored to a YAML file whenever it changes so
//! pending reversals survive restarts. A record leaves the map (and the file)
//! only once its reversal has been applied on the platform.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::record::{SanctionKind, SanctionRecord, SanctionState};
use super::{ModerationError, ModerationResult};
use crate::MODERATION_TARGET;

/// Store for sanction records
#[derive(Clone, Default)]
pub struct SanctionStore {
    records: Arc<DashMap<String, SanctionRecord>>,
    /// Backing file; `None` keeps the store in memory only
    path: Option<Arc<PathBuf>>,
    /// Serializes file writes so an older snapshot never overwrites a newer one
    write_lock: Arc<Mutex<()>>,
}

impl SanctionStore {
    /// Create a store that is never written to disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load sanctions from `path`; a missing file yields an empty store.
    ///
    /// Records already marked reversed or cancelled are kept: their undo did
    /// not finish before the file was last written.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> ModerationResult<Self> {
        let path = path.into();
        let store = Self {
            path: Some(Arc::new(path.clone())),
            ..Self::default()
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let records: Vec<SanctionRecord> = serde_yaml::from_str(&content)?;
                for record in records {
                    store.add(record);
                }
                info!(
                    target: MODERATION_TARGET,
                    count = store.len(),
                    path = %path.display(),
                    "Loaded sanctions"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(store)
    }

    pub fn add(&self, record: SanctionRecord) {
        self.records.insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<SanctionRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<SanctionRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every stored record, including ones whose reversal is in flight
    #[must_use]
    pub fn all(&self) -> Vec<SanctionRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Active mute for a user in a guild
    #[must_use]
    pub fn active_mute_for(&self, guild_id: u64, user_id: u64) -> Option<SanctionRecord> {
        self.records
            .iter()
            .find(|entry| {
                let record = entry.value();
                record.guild_id == guild_id
                    && record.state == SanctionState::Active
                    && record.muted_user() == Some(user_id)
            })
            .map(|entry| entry.value().clone())
    }

    /// Active lockdown for a guild
    #[must_use]
    pub fn active_lockdown_for(&self, guild_id: u64) -> Option<SanctionRecord> {
        self.records
            .iter()
            .find(|entry| {
                let record = entry.value();
                record.guild_id == guild_id
                    && record.state == SanctionState::Active
                    && matches!(record.kind, SanctionKind::Lockdown { .. })
            })
            .map(|entry| entry.value().clone())
    }

    /// Move a record from Active to Reversed
    ///
    /// # Errors
    /// Returns an error if the record is missing or not Active.
    pub fn reverse(&self, id: &str) -> ModerationResult<SanctionRecord> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| ModerationError::NotFound(id.to_string()))?;
        record.reverse()?;
        Ok(record.clone())
    }

    /// Move a record from Active to Cancelled
    ///
    /// # Errors
    /// Returns an error if the record is missing or not Active.
    pub fn cancel(&self, id: &str) -> ModerationResult<SanctionRecord> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| ModerationError::NotFound(id.to_string()))?;
        record.cancel()?;
        Ok(record.clone())
    }

    /// Write every stored record to the backing file
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created, the records
    /// cannot be serialized or the file cannot be written.
    pub async fn persist(&self) -> ModerationResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;

        let mut records = self.all();
        records.sort_by_key(|record| record.expires_at);
        let yaml = serde_yaml::to_string(&records)?;

        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, yaml).await?;

        Ok(())
    }

    /// Persist and log failures instead of returning them
    pub async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            warn!(target: MODERATION_TARGET, error = %e, "Failed to persist sanctions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::record::ChannelLock;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("raidguard-{}", uuid::Uuid::new_v4()))
            .join("sanctions.yaml")
    }

    #[test]
    fn test_lookup_by_user_and_guild() {
        let store = SanctionStore::in_memory();
        let mute = SanctionRecord::mute(1, 2, 3, 300, "spam", None);
        let lockdown = SanctionRecord::lockdown(1, Vec::new(), 300, "raid", None);
        store.add(mute.clone());
        store.add(lockdown.clone());

        assert_eq!(store.active_mute_for(1, 2).map(|r| r.id), Some(mute.id.clone()));
        assert!(store.active_mute_for(1, 4).is_none());
        assert!(store.active_mute_for(5, 2).is_none());
        assert_eq!(store.active_lockdown_for(1).map(|r| r.id), Some(lockdown.id));

        store.reverse(&mute.id).unwrap();
        assert!(store.active_mute_for(1, 2).is_none());
        assert!(matches!(
            store.reverse(&mute.id),
            Err(ModerationError::InvalidStateTransition)
        ));
        assert!(matches!(
            store.cancel("missing"),
            Err(ModerationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_persist_is_noop() {
        let store = SanctionStore::in_memory();
        store.add(SanctionRecord::mute(1, 2, 3, 300, "spam", None));
        assert!(store.persist().await.is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_keeps_records_until_removed() {
        let path = temp_path();
        let store = SanctionStore::load(&path).await.unwrap();
        assert!(store.is_empty());

        let mute = SanctionRecord::mute(1, 2, 3, 300, "spam", Some(4));
        let lockdown = SanctionRecord::lockdown(
            1,
            vec![ChannelLock {
                channel_id: 7,
                previous_allow: Some(0),
                previous_deny: Some(0),
            }],
            600,
            "raid",
            None,
        );
        let reversed = SanctionRecord::mute(1, 5, 3, 300, "spam", None);
        store.add(mute.clone());
        store.add(lockdown.clone());
        store.add(reversed.clone());
        store.reverse(&reversed.id).unwrap();
        store.persist().await.unwrap();

        // A reversed record whose undo has not finished is still written
        let reloaded = SanctionStore::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(&mute.id), Some(mute.clone()));
        assert_eq!(reloaded.get(&lockdown.id), Some(lockdown.clone()));
        assert_eq!(
            reloaded.get(&reversed.id).map(|record| record.state),
            Some(SanctionState::Reversed)
        );
        let active = reloaded
            .all()
            .into_iter()
            .filter(|record| record.state == SanctionState::Active)
            .count();
        assert_eq!(active, 2);

        store.remove(&reversed.id);
        store.persist().await.unwrap();
        let reloaded = SanctionStore::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.get(&reversed.id).is_none());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not: [valid").unwrap();

        assert!(matches!(
            SanctionStore::load(&path).await,
            Err(ModerationError::Yaml(_))
        ));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
