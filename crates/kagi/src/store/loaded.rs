use std::{future::Future, sync::Arc};

use crate::{
    cdm::{MediaKeySession, MediaKeySessionType, MediaKeys},
    error::{KagiError, KagiResult},
    init_data::InitializationData,
    record::KeySessionRecord,
};

pub struct LoadedSessionEntry<S> {
    pub media_key_session: Arc<S>,
    pub session_type: MediaKeySessionType,
    pub key_session_record: Arc<KeySessionRecord>,
}

impl<S> Clone for LoadedSessionEntry<S> {
    fn clone(&self) -> Self {
        Self {
            media_key_session: self.media_key_session.clone(),
            session_type: self.session_type,
            key_session_record: self.key_session_record.clone(),
        }
    }
}

/// MediaKeySessions currently open on a MediaKeys instance, least recently
/// used first.
pub struct LoadedSessionsStore<K: MediaKeys> {
    media_keys: Arc<K>,
    entries: Vec<LoadedSessionEntry<K::Session>>,
}

impl<K: MediaKeys> LoadedSessionsStore<K> {
    pub fn new(media_keys: Arc<K>) -> Self {
        Self {
            media_keys,
            entries: Vec::new(),
        }
    }

    /// Create a new session and store it as the most recently used one.
    ///
    /// No entry compatible with `init_data` may already be stored.
    pub fn create_session(
        &mut self,
        init_data: Arc<InitializationData>,
        session_type: MediaKeySessionType,
    ) -> KagiResult<LoadedSessionEntry<K::Session>> {
        let session = self
            .media_keys
            .create_session(session_type)
            .map_err(|e| KagiError::CdmSessionCreationError(session_type, e.to_string()))?;

        let entry = LoadedSessionEntry {
            media_key_session: Arc::new(session),
            session_type,
            key_session_record: Arc::new(KeySessionRecord::new(init_data)),
        };
        tracing::debug!(
            "DRM-LSS: Add MediaKeySession ({session_type}), {} session(s) loaded",
            self.entries.len() + 1
        );
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Find the entry compatible with `init_data` and mark it as the most
    /// recently used one.
    pub fn reuse(
        &mut self,
        init_data: &InitializationData,
    ) -> Option<LoadedSessionEntry<K::Session>> {
        let index = self
            .entries
            .iter()
            .rposition(|e| e.key_session_record.is_compatible_with(init_data))?;
        let entry = self.entries.remove(index);
        self.entries.push(entry.clone());
        Some(entry)
    }

    /// Every entry, least recently used first.
    pub fn get_all(&self) -> &[LoadedSessionEntry<K::Session>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, session: &Arc<K::Session>) -> bool {
        self.entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.media_key_session, session))
    }

    /// Remove `session` from the store and close it.
    ///
    /// The entry is removed immediately. Closing failures are only logged, a
    /// session the CDM already dropped must still leave the store.
    pub fn close_session(&mut self, session: &Arc<K::Session>) -> impl Future<Output = ()> + Send {
        let index = self
            .entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.media_key_session, session));
        let removed = index.map(|index| self.entries.remove(index));

        async move {
            let Some(entry) = removed else {
                tracing::warn!("DRM-LSS: No MediaKeySession found to close");
                return;
            };
            tracing::debug!("DRM-LSS: Closing MediaKeySession");
            if let Err(e) = entry.media_key_session.close().await {
                tracing::warn!("DRM-LSS: Could not close MediaKeySession: {e}");
            }
        }
    }

    /// Close and remove every stored session.
    pub async fn close_all_sessions(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        tracing::debug!("DRM-LSS: Closing all {} MediaKeySession(s)", entries.len());
        let closing = entries.into_iter().map(|entry| async move {
            if let Err(e) = entry.media_key_session.close().await {
                tracing::warn!("DRM-LSS: Could not close MediaKeySession: {e}");
            }
        });
        futures::future::join_all(closing).await;
    }
}

/// Close the least recently used sessions so at most `limit` remain.
pub async fn clean_old_loaded_sessions<K: MediaKeys>(store: &mut LoadedSessionsStore<K>, limit: usize) {
    if store.len() <= limit {
        return;
    }

    let to_delete = store.len() - limit;
    tracing::info!("DRM: Closing {to_delete} old MediaKeySession(s)");
    let sessions: Vec<_> = store.get_all()[..to_delete]
        .iter()
        .map(|e| e.media_key_session.clone())
        .collect();
    let closing: Vec<_> = sessions
        .iter()
        .map(|session| store.close_session(session))
        .collect();
    futures::future::join_all(closing).await;
}
