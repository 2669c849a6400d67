use std::sync::Arc;

use crate::{
    cdm::{MediaKeySession, MediaKeySessionType, MediaKeyStatus, MediaKeys},
    error::{KagiError, KagiResult},
    init_data::InitializationData,
    storage::SessionStorage,
    store::{
        clean_old_loaded_sessions, LoadedSessionEntry, LoadedSessionsStore, MediaKeySessionStores,
        PersistentSessionsStore,
    },
};

/// How the MediaKeySession handling some initialization data was obtained.
pub enum SessionOutcome<S> {
    /// A new session was created, a license request is needed.
    Created(LoadedSessionEntry<S>),
    /// An already opened session was reused.
    LoadedOpenSession(LoadedSessionEntry<S>),
    /// A persisted session was loaded.
    LoadedPersistentSession(LoadedSessionEntry<S>),
}

impl<S> SessionOutcome<S> {
    pub fn entry(&self) -> &LoadedSessionEntry<S> {
        match self {
            Self::Created(entry)
            | Self::LoadedOpenSession(entry)
            | Self::LoadedPersistentSession(entry) => entry,
        }
    }
}

/// Returns `true` if the session has a usable set of keys.
pub fn is_session_usable<S: MediaKeySession>(session: &S) -> bool {
    if session.session_id().is_empty() {
        return false;
    }
    let statuses = session.key_statuses();
    if statuses.is_empty() {
        tracing::debug!("DRM: Session has an empty key statuses list");
        return false;
    }
    !statuses.iter().any(|(_, status)| {
        matches!(status, MediaKeyStatus::Expired | MediaKeyStatus::InternalError)
    })
}

/// Reuse an open session compatible with `init_data`, or make room in the
/// cache and create (or load) one.
pub async fn get_session<K, St>(
    stores: &mut MediaKeySessionStores<K, St>,
    init_data: Arc<InitializationData>,
    wanted_session_type: MediaKeySessionType,
    max_session_cache_size: usize,
) -> KagiResult<SessionOutcome<K::Session>>
where
    K: MediaKeys,
    St: SessionStorage,
{
    let loaded_sessions_store = &mut stores.loaded_sessions_store;
    if let Some(entry) = loaded_sessions_store.reuse(&init_data) {
        if is_session_usable(entry.media_key_session.as_ref()) {
            tracing::info!("DRM: Reuse loaded session");
            return Ok(SessionOutcome::LoadedOpenSession(entry));
        }
        tracing::info!("DRM: Loaded session not usable anymore, closing it");
        loaded_sessions_store
            .close_session(&entry.media_key_session)
            .await;
        if let Some(persistent) = stores.persistent_sessions_store.as_mut() {
            if persistent.get(&entry.key_session_record).is_some() {
                persistent.delete(&entry.key_session_record).await;
            }
        }
    }

    clean_old_loaded_sessions(
        &mut stores.loaded_sessions_store,
        max_session_cache_size.saturating_sub(1),
    )
    .await;
    create_session(stores, init_data, wanted_session_type).await
}

/// Create a new session, or load a persisted one, on the MediaKeys.
///
/// Only creates sessions: `init_data` must not be compatible with an
/// already-loaded session.
pub async fn create_session<K, St>(
    stores: &mut MediaKeySessionStores<K, St>,
    init_data: Arc<InitializationData>,
    wanted_session_type: MediaKeySessionType,
) -> KagiResult<SessionOutcome<K::Session>>
where
    K: MediaKeys,
    St: SessionStorage,
{
    let MediaKeySessionStores {
        loaded_sessions_store,
        persistent_sessions_store,
    } = stores;

    match (wanted_session_type, persistent_sessions_store) {
        (MediaKeySessionType::Temporary, _) => {
            create_temporary_session(loaded_sessions_store, init_data)
        }
        (MediaKeySessionType::PersistentLicense, None) => {
            tracing::warn!(
                "DRM: Cannot create persistent MediaKeySession, PersistentSessionsStore not created."
            );
            create_temporary_session(loaded_sessions_store, init_data)
        }
        (MediaKeySessionType::PersistentLicense, Some(persistent_sessions_store)) => {
            create_and_try_to_retrieve_persistent_session(
                loaded_sessions_store,
                persistent_sessions_store,
                init_data,
            )
            .await
        }
    }
}

fn create_temporary_session<K: MediaKeys>(
    loaded_sessions_store: &mut LoadedSessionsStore<K>,
    init_data: Arc<InitializationData>,
) -> KagiResult<SessionOutcome<K::Session>> {
    tracing::info!("DRM: Creating a new temporary session");
    let entry = loaded_sessions_store.create_session(init_data, MediaKeySessionType::Temporary)?;
    Ok(SessionOutcome::Created(entry))
}

async fn create_and_try_to_retrieve_persistent_session<K, St>(
    loaded_sessions_store: &mut LoadedSessionsStore<K>,
    persistent_sessions_store: &mut PersistentSessionsStore<St>,
    init_data: Arc<InitializationData>,
) -> KagiResult<SessionOutcome<K::Session>>
where
    K: MediaKeys,
    St: SessionStorage,
{
    tracing::info!("DRM: Creating persistent MediaKeySession");
    let entry = loaded_sessions_store
        .create_session(init_data.clone(), MediaKeySessionType::PersistentLicense)?;
    let Some(stored) = persistent_sessions_store
        .get_and_reuse(&entry.key_session_record)
        .await
    else {
        return Ok(SessionOutcome::Created(entry));
    };

    let loaded = entry
        .media_key_session
        .load(&stored.session_id)
        .await
        .map_err(|e| KagiError::KeyLoadError(e.to_string()));
    match loaded {
        Ok(false) => {
            tracing::warn!("DRM: No data stored for the loaded session");
            persistent_sessions_store
                .delete(&entry.key_session_record)
                .await;
            return Ok(SessionOutcome::Created(entry));
        }
        Ok(true) if is_session_usable(entry.media_key_session.as_ref()) => {
            persistent_sessions_store
                .add(&entry.key_session_record, entry.media_key_session.as_ref())
                .await;
            tracing::info!("DRM: Succeeded to load persistent session.");
            return Ok(SessionOutcome::LoadedPersistentSession(entry));
        }
        Ok(true) => tracing::warn!("DRM: Previous persistent session not usable anymore."),
        Err(e) => tracing::warn!("DRM: {e}"),
    }

    tracing::info!("DRM: Removing previous persistent session.");
    if persistent_sessions_store
        .get(&entry.key_session_record)
        .is_some()
    {
        persistent_sessions_store
            .delete(&entry.key_session_record)
            .await;
    }
    loaded_sessions_store
        .close_session(&entry.media_key_session)
        .await;

    let entry =
        loaded_sessions_store.create_session(init_data, MediaKeySessionType::PersistentLicense)?;
    Ok(SessionOutcome::Created(entry))
}
