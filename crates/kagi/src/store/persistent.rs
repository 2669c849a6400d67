use crate::{
    cdm::MediaKeySession,
    config::EME_MAX_STORED_PERSISTENT_SESSION_INFORMATION,
    record::KeySessionRecord,
    storage::{SessionStorage, StoredSessionEntry},
};

struct PersistentEntry {
    stored: StoredSessionEntry,
    record: Option<KeySessionRecord>,
}

impl PersistentEntry {
    fn new(stored: StoredSessionEntry) -> Self {
        let record = match stored.to_record() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "DRM-PSS: Ignoring unreadable persisted session {}: {e}",
                    stored.session_id
                );
                None
            }
        };
        Self { stored, record }
    }

    /// Whether the stored session handles the initialization data of `record`.
    fn handles(&self, record: &KeySessionRecord) -> bool {
        self.record
            .as_ref()
            .is_some_and(|r| r.is_compatible_with(record.init_data()))
    }
}

/// Persisted MediaKeySession information, least recently used first.
///
/// Storage failures never reach the caller: a failed load starts from an
/// empty store and a failed save is logged.
pub struct PersistentSessionsStore<St: SessionStorage> {
    storage: St,
    entries: Vec<PersistentEntry>,
    max_size: usize,
}

impl<St: SessionStorage> PersistentSessionsStore<St> {
    pub async fn load(storage: St) -> Self {
        let entries = match storage.load().await {
            Ok(entries) => entries.into_iter().map(PersistentEntry::new).collect(),
            Err(e) => {
                tracing::warn!("DRM-PSS: Could not load persisted sessions: {e}");
                Vec::new()
            }
        };
        Self {
            storage,
            entries,
            max_size: EME_MAX_STORED_PERSISTENT_SESSION_INFORMATION,
        }
    }

    /// Maximum number of entries kept after an [`PersistentSessionsStore::add`].
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every stored entry, least recently used first.
    pub fn get_all(&self) -> impl Iterator<Item = &StoredSessionEntry> {
        self.entries.iter().map(|e| &e.stored)
    }

    pub fn get(&self, record: &KeySessionRecord) -> Option<&StoredSessionEntry> {
        self.index_of(record).map(|index| &self.entries[index].stored)
    }

    /// Like [`PersistentSessionsStore::get`], also marking the entry as the
    /// most recently used one.
    pub async fn get_and_reuse(&mut self, record: &KeySessionRecord) -> Option<StoredSessionEntry> {
        let index = self.index_of(record)?;
        let entry = self.entries.remove(index);
        let stored = entry.stored.clone();
        self.entries.push(entry);
        self.save().await;
        Some(stored)
    }

    /// Store the session linked to `record`, replacing any compatible entry.
    ///
    /// Returns `false` when the session can not be stored, as it has no id
    /// yet.
    pub async fn add<S: MediaKeySession>(
        &mut self,
        record: &KeySessionRecord,
        session: &S,
    ) -> bool {
        let session_id = session.session_id();
        if session_id.is_empty() {
            tracing::warn!("DRM-PSS: Invalid persisted session given");
            return false;
        }

        if let Some(index) = self.index_of(record) {
            if self.entries[index].stored.session_id == session_id {
                return true;
            }
            tracing::info!("DRM-PSS: Updating persisted session {session_id}");
            self.entries.remove(index);
        } else {
            tracing::info!("DRM-PSS: Add new persisted session {session_id}");
        }

        if self.entries.len() >= self.max_size {
            let to_delete = self.entries.len() + 1 - self.max_size;
            tracing::info!("DRM-PSS: Too many stored persistent sessions, removing {to_delete}");
            self.entries.drain(..to_delete);
        }

        let stored = StoredSessionEntry::new(record, session_id);
        self.entries.push(PersistentEntry::new(stored));
        self.save().await;
        true
    }

    pub async fn delete(&mut self, record: &KeySessionRecord) {
        let Some(index) = self.index_of(record) else {
            tracing::warn!("DRM-PSS: Asked to delete a non-existent session");
            return;
        };
        let entry = self.entries.remove(index);
        tracing::info!("DRM-PSS: Delete persisted session {}", entry.stored.session_id);
        self.save().await;
    }

    /// Delete the `count` least recently used entries.
    pub async fn delete_old_sessions(&mut self, count: usize) {
        let count = count.min(self.entries.len());
        if count == 0 {
            return;
        }
        tracing::info!("DRM-PSS: Deleting {count} old persisted session(s)");
        self.entries.drain(..count);
        self.save().await;
    }

    pub async fn clear(&mut self) {
        self.entries.clear();
        self.save().await;
    }

    fn index_of(&self, record: &KeySessionRecord) -> Option<usize> {
        self.entries.iter().position(|e| e.handles(record))
    }

    async fn save(&self) {
        let entries: Vec<_> = self.entries.iter().map(|e| e.stored.clone()).collect();
        if let Err(e) = self.storage.save(&entries).await {
            let location = self.storage.location_hint().unwrap_or_default();
            tracing::warn!("DRM-PSS: Could not save persisted sessions {location}: {e}");
        }
    }
}

/// Delete the oldest persisted entries so at most `limit` remain.
pub async fn clean_old_stored_persistent_info<St: SessionStorage>(
    store: &mut PersistentSessionsStore<St>,
    limit: usize,
) {
    if store.len() <= limit {
        return;
    }
    let to_delete = store.len() - limit;
    tracing::info!("DRM: Too many stored persistent sessions, removing {to_delete}");
    store.delete_old_sessions(to_delete).await;
}
