//! Encryption handling of one content.
//!
//! ```text
//!  encrypted events ─┐                       ┌─> LoadedSessionsStore
//!                    ├─> [gate] ─> manager ──┼─> PersistentSessionsStore
//!  content protections┘               ▲      └─> session listeners ─┐
//!                                     └──────── key statuses ───────┘
//! ```
//!
//! Initialization data is processed one at a time. While a license
//! covering a whole content is negotiated, the intake is paused.

mod gate;
mod ledger;

pub use ledger::SessionSource;

use std::{pin::pin, sync::Arc};

use futures::{Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    cdm::{
        can_create_persistent_session, MediaElement, MediaKeySessionType, MediaKeySystemAccess,
        MediaKeys,
    },
    config::{KeySystemOptions, SingleLicensePer},
    error::{KagiError, KagiResult},
    init_data::{InitializationData, KeyId, KeyIdsUpdate, MediaEncryptedEvent},
    license::LicenseFetcher,
    listener::{SessionEvent, SessionEventSender, SessionListener},
    record::{are_all_key_ids_contained_in, are_some_key_ids_contained_in},
    session::{get_session, SessionOutcome},
    storage::{KagiStorage, SessionStorage},
    store::{LoadedSessionsStore, MediaKeySessionStores, PersistentSessionsStore},
};
use gate::InitDataGate;
use ledger::{ProcessedInitData, SessionInfo};

/// Encryption signaling received by the manager.
#[derive(Debug)]
pub enum EncryptionSignal {
    /// `encrypted` event of the media element.
    Encrypted(MediaEncryptedEvent),
    /// Protection data found by the player, e.g. while parsing a manifest.
    ContentProtection(InitializationData),
}

/// Merge the `encrypted` events of the media element with the protection
/// data signaled by the player.
pub fn intake(
    encrypted: mpsc::UnboundedReceiver<MediaEncryptedEvent>,
    protections: mpsc::UnboundedReceiver<InitializationData>,
) -> impl Stream<Item = EncryptionSignal> + Send {
    let encrypted = futures::stream::unfold(encrypted, |mut rx| async move {
        rx.recv().await.map(|e| (EncryptionSignal::Encrypted(e), rx))
    });
    let protections = futures::stream::unfold(protections, |mut rx| async move {
        rx.recv()
            .await
            .map(|p| (EncryptionSignal::ContentProtection(p), rx))
    });
    futures::stream::select(encrypted, protections)
}

/// Events emitted while a content is decrypted.
#[derive(Debug)]
pub enum EmeEvent {
    CreatedMediaKeys { key_system: String },
    AttachedMediaKeys,
    /// A MediaKeySession now handles some initialization data.
    SessionReady {
        source: SessionSource,
        session_type: MediaKeySessionType,
    },
    /// Key statuses of a session were evaluated.
    KeysUpdate(KeyIdsUpdate),
    Warning(KagiError),
}

pub struct EmeManager<F, St = KagiStorage> {
    options: Arc<KeySystemOptions>,
    fetcher: F,
    storage: Option<St>,
}

impl<F> EmeManager<F>
where
    F: LicenseFetcher + Clone,
{
    pub fn new(options: KeySystemOptions, fetcher: F) -> Self {
        Self {
            options: Arc::new(options),
            fetcher,
            storage: None,
        }
    }
}

impl<F, St> EmeManager<F, St>
where
    F: LicenseFetcher + Clone,
    St: SessionStorage,
{
    /// Durable storage for persistent sessions, used when the
    /// `persistent_license` option is set.
    pub fn with_storage<St2: SessionStorage>(self, storage: St2) -> EmeManager<F, St2> {
        EmeManager {
            options: self.options,
            fetcher: self.fetcher,
            storage: Some(storage),
        }
    }

    /// Attach MediaKeys to `element` and handle every initialization data of
    /// `intake` until it ends, which tears the content down.
    ///
    /// Returns an error when decryption can not continue.
    pub async fn run<A, E, I>(
        self,
        access: A,
        element: E,
        intake: I,
        events: mpsc::UnboundedSender<EmeEvent>,
    ) -> KagiResult<()>
    where
        A: MediaKeySystemAccess,
        E: MediaElement<A::MediaKeys>,
        I: Stream<Item = EncryptionSignal> + Send,
    {
        tracing::debug!("EME: Starting EME manager");
        let media_keys = init_media_keys(&access, &element, &self.options, &events).await?;

        let persistent_sessions_store = match (self.options.persistent_license, self.storage) {
            (true, Some(storage)) => Some(PersistentSessionsStore::load(storage).await),
            (true, None) => {
                tracing::warn!("EME: No storage given, persistent sessions will not be stored");
                None
            }
            (false, _) => None,
        };

        let mut content = ContentDecryption {
            can_persist: can_create_persistent_session(&access),
            options: self.options,
            fetcher: self.fetcher,
            stores: MediaKeySessionStores {
                loaded_sessions_store: LoadedSessionsStore::new(media_keys),
                persistent_sessions_store,
            },
            processed: ProcessedInitData::default(),
            gate: InitDataGate::default(),
            events,
        };

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut listeners = JoinSet::new();
        let mut intake = pin!(intake);

        let result = loop {
            tokio::select! {
                biased;
                Some((id, event)) = receiver.recv() => {
                    if let Err(e) = content.on_session_event(id, event).await {
                        break Err(e);
                    }
                }
                Some(joined) = listeners.join_next() => match joined {
                    Ok(id) => content.on_listener_end(id),
                    Err(e) => tracing::error!("EME: Session listener failed: {e}"),
                },
                signal = intake.next(), if content.gate.is_open() => {
                    let Some(signal) = signal else {
                        tracing::info!("EME: Initialization data intake ended");
                        break Ok(());
                    };
                    if let Err(e) = content.on_signal(signal, &mut listeners, &sender).await {
                        break Err(e);
                    }
                }
                else => break Ok(()),
            }
        };

        listeners.abort_all();
        content
            .stores
            .loaded_sessions_store
            .close_all_sessions()
            .await;
        if let Err(e) = &result {
            tracing::error!("EME: Stopping on fatal error: {e}");
        }
        result
    }
}

async fn init_media_keys<A, E>(
    access: &A,
    element: &E,
    options: &KeySystemOptions,
    events: &mpsc::UnboundedSender<EmeEvent>,
) -> KagiResult<Arc<A::MediaKeys>>
where
    A: MediaKeySystemAccess,
    E: MediaElement<A::MediaKeys>,
{
    let media_keys = access
        .create_media_keys()
        .await
        .map_err(|e| KagiError::MediaKeysCreationError(e.to_string()))?;
    let media_keys = Arc::new(media_keys);
    tracing::info!("EME: MediaKeys created for {}", access.key_system());
    _ = events.send(EmeEvent::CreatedMediaKeys {
        key_system: access.key_system().to_string(),
    });

    if let Some(certificate) = &options.server_certificate {
        tracing::info!("EME: Setting server certificate");
        if let Err(e) = media_keys.set_server_certificate(certificate).await {
            tracing::warn!("EME: Could not set server certificate: {e}");
            _ = events.send(EmeEvent::Warning(KagiError::ServerCertificateError(
                e.to_string(),
            )));
        }
    }

    element
        .attach_media_keys(media_keys.clone())
        .await
        .map_err(|e| KagiError::MediaKeysAttachError(e.to_string()))?;
    tracing::info!("EME: MediaKeys attached to the media element");
    _ = events.send(EmeEvent::AttachedMediaKeys);
    Ok(media_keys)
}

/// What a previously processed initialization data says about a new one.
enum PreviousProcessing {
    /// Nothing more to do for the new initialization data.
    Handled,
    /// The session which handled it is gone.
    Stale,
}

struct ContentDecryption<K: MediaKeys, St: SessionStorage, F> {
    can_persist: bool,
    options: Arc<KeySystemOptions>,
    fetcher: F,
    stores: MediaKeySessionStores<K, St>,
    processed: ProcessedInitData<K::Session>,
    gate: InitDataGate,
    events: mpsc::UnboundedSender<EmeEvent>,
}

impl<K, St, F> ContentDecryption<K, St, F>
where
    K: MediaKeys,
    St: SessionStorage,
    F: LicenseFetcher + Clone,
{
    fn emit(&self, event: EmeEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("EME: No one is listening to EME events");
        }
    }

    async fn on_signal(
        &mut self,
        signal: EncryptionSignal,
        listeners: &mut JoinSet<u64>,
        sender: &mpsc::UnboundedSender<(u64, SessionEvent)>,
    ) -> KagiResult<()> {
        let init_data = match signal {
            EncryptionSignal::Encrypted(event) => {
                tracing::debug!("EME: Encrypted event received from media element");
                let Some(init_data) = event.into_init_data() else {
                    tracing::warn!("EME: Encrypted event without initialization data, ignoring");
                    return Ok(());
                };
                init_data
            }
            EncryptionSignal::ContentProtection(init_data) => {
                tracing::debug!("EME: Encrypted event received from player");
                init_data
            }
        };
        self.on_init_data(Arc::new(init_data), listeners, sender)
            .await
    }

    async fn on_init_data(
        &mut self,
        init_data: Arc<InitializationData>,
        listeners: &mut JoinSet<u64>,
        sender: &mpsc::UnboundedSender<(u64, SessionEvent)>,
    ) -> KagiResult<()> {
        if let Some(index) = self.processed.find_compatible(&init_data) {
            match self.check_previous_processing(index, &init_data)? {
                PreviousProcessing::Handled => return Ok(()),
                PreviousProcessing::Stale => {
                    tracing::debug!(
                        "EME: A session from a processed init data is not available anymore. Re-processing it."
                    );
                    self.processed.remove(index);
                }
            }
        }

        let mut ticket = None;
        if self.options.single_license_per == SingleLicensePer::Content {
            if let Some(first) = self.processed.first_new_session() {
                // A license covering the whole content was already fetched
                // and did not cover this initialization data.
                let Some(key_ids) = &init_data.key_ids else {
                    tracing::warn!(
                        "EME: Initialization data linked to unknown key id, we'll not be able to fallback from it."
                    );
                    return Ok(());
                };
                let mut associated = first.record.key_ids().unwrap_or_default();
                associated.extend(key_ids.iter().cloned());
                first.record.associate_key_ids(&associated);
                if let Some(manifest) = init_data.manifest() {
                    manifest.update_decipherabilities_based_on_key_ids(&KeyIdsUpdate::blacklist(
                        key_ids.clone(),
                    ));
                }
                return Ok(());
            }
            ticket = self.gate.acquire();
        }

        let wanted_session_type = if !self.options.persistent_license {
            MediaKeySessionType::Temporary
        } else if !self.can_persist {
            tracing::warn!("EME: Cannot create \"persistent-license\" session: not supported");
            MediaKeySessionType::Temporary
        } else {
            MediaKeySessionType::PersistentLicense
        };

        let outcome = get_session(
            &mut self.stores,
            init_data.clone(),
            wanted_session_type,
            self.options.max_session_cache_size(),
        )
        .await?;
        let (entry, source) = match outcome {
            SessionOutcome::Created(entry) => (entry, SessionSource::NewSession),
            SessionOutcome::LoadedOpenSession(entry) => (entry, SessionSource::FromCache),
            SessionOutcome::LoadedPersistentSession(entry) => {
                (entry, SessionSource::FromPersisted)
            }
        };

        let item = self.processed.push(init_data.clone(), ticket);
        let id = item.id;
        item.session_info = Some(SessionInfo {
            record: entry.key_session_record.clone(),
            source,
            session: entry.media_key_session.clone(),
            session_type: entry.session_type,
            key_statuses: None,
            blacklisted_session_error: None,
            is_persisted: false,
        });
        tracing::debug!(
            "EME: {} initialization data processed for this content",
            self.processed.len()
        );

        let listener = SessionListener {
            session: entry.media_key_session,
            init_data,
            generate_request: source == SessionSource::NewSession,
            options: self.options.clone(),
            fetcher: self.fetcher.clone(),
        };
        let sender = SessionEventSender::new(id, sender.clone());
        listeners.spawn(async move {
            listener.run(sender).await;
            id
        });

        self.emit(EmeEvent::SessionReady {
            source,
            session_type: entry.session_type,
        });
        Ok(())
    }

    fn check_previous_processing(
        &mut self,
        index: usize,
        init_data: &InitializationData,
    ) -> KagiResult<PreviousProcessing> {
        let item = self.processed.get(index);
        let Some(info) = &item.session_info else {
            tracing::debug!("EME: A session is still being created for this init data");
            return Ok(PreviousProcessing::Handled);
        };

        if info.blacklisted_session_error.is_some() {
            let Some(manifest) = init_data.manifest() else {
                tracing::error!(
                    "EME: This initialization data has already been blacklisted but the current content is not known."
                );
                return Err(KagiError::BlacklistedUnknownContent);
            };
            tracing::info!(
                "EME: This initialization data has already been blacklisted. Blacklisting the related content."
            );
            manifest.add_undecipherable_protection_data(init_data);
            return Ok(PreviousProcessing::Handled);
        }

        if let (Some(statuses), Some(key_ids)) = (&info.key_statuses, &init_data.key_ids) {
            let should_blacklist = match self.options.single_license_per {
                // Only key ids explicitly blacklisted are avoided.
                SingleLicensePer::InitData => {
                    are_some_key_ids_contained_in(key_ids, &statuses.blacklisted_key_ids)
                }
                SingleLicensePer::Content => {
                    !are_all_key_ids_contained_in(key_ids, &statuses.whitelisted_key_ids)
                }
            };
            if should_blacklist {
                let Some(manifest) = init_data.manifest() else {
                    tracing::error!("EME: Cannot blacklist key id, the content is unknown.");
                    return Ok(PreviousProcessing::Handled);
                };
                tracing::info!("EME: The encountered key id has been blacklisted.");
                manifest.update_decipherabilities_based_on_key_ids(&KeyIdsUpdate::blacklist(
                    key_ids.clone(),
                ));
                return Ok(PreviousProcessing::Handled);
            }
        }

        let loaded_sessions_store = &mut self.stores.loaded_sessions_store;
        if loaded_sessions_store.contains(&info.session) {
            loaded_sessions_store.reuse(init_data);
            tracing::debug!("EME: Init data already processed. Skipping it.");
            return Ok(PreviousProcessing::Handled);
        }
        Ok(PreviousProcessing::Stale)
    }

    async fn on_session_event(&mut self, id: u64, event: SessionEvent) -> KagiResult<()> {
        match event {
            SessionEvent::Warning(e) => {
                self.emit(EmeEvent::Warning(e));
                Ok(())
            }
            SessionEvent::KeyStatuses(update) => {
                self.on_keys_update(id, update).await;
                Ok(())
            }
            SessionEvent::Error(KagiError::BlacklistedSession(error)) => {
                self.on_blacklisted_session(id, *error)
            }
            SessionEvent::Error(e) => {
                self.release_gate(id);
                Err(e)
            }
        }
    }

    async fn on_keys_update(&mut self, id: u64, mut update: KeyIdsUpdate) {
        let Some(item) = self.processed.by_id_mut(id) else {
            tracing::debug!("EME: Keys update for a forgotten init data");
            return;
        };

        if self.options.single_license_per != SingleLicensePer::InitData {
            // Key ids awaited but absent from the license can not be played.
            if let Some(expected) = &item.init_data.key_ids {
                let missing: Vec<KeyId> = expected
                    .iter()
                    .filter(|k| {
                        !update.whitelisted_key_ids.contains(k)
                            && !update.blacklisted_key_ids.contains(k)
                    })
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    tracing::debug!("EME: Blacklisting {} missing key id(s)", missing.len());
                    update.blacklisted_key_ids.extend(missing);
                }
            }
        }

        if let Some(info) = item.session_info.as_mut() {
            let all_key_ids: Vec<KeyId> = update
                .whitelisted_key_ids
                .iter()
                .chain(&update.blacklisted_key_ids)
                .cloned()
                .collect();
            info.record.associate_key_ids(&all_key_ids);
            info.key_statuses = Some(update.clone());

            if info.session_type == MediaKeySessionType::PersistentLicense
                && !info.is_persisted
                && !update.is_empty()
            {
                if let Some(store) = self.stores.persistent_sessions_store.as_mut() {
                    info.is_persisted = store.add(&info.record, info.session.as_ref()).await;
                }
            }
        }

        if let Some(manifest) = item.init_data.manifest() {
            manifest.update_decipherabilities_based_on_key_ids(&update);
        }
        if let Some(ticket) = item.ticket.take() {
            self.gate.release(ticket);
        }
        self.emit(EmeEvent::KeysUpdate(update));
    }

    fn on_blacklisted_session(&mut self, id: u64, error: KagiError) -> KagiResult<()> {
        let Some(item) = self.processed.by_id_mut(id) else {
            return Ok(());
        };
        if let Some(info) = item.session_info.as_mut() {
            info.blacklisted_session_error = Some(error.to_string());
        }
        if let Some(ticket) = item.ticket.take() {
            self.gate.release(ticket);
        }

        let Some(manifest) = item.init_data.manifest() else {
            tracing::error!("EME: Current session blacklisted and content not known. Throwing.");
            return Err(error);
        };
        tracing::warn!("EME: Current session blacklisted. Blacklisting content.");
        manifest.add_undecipherable_protection_data(&item.init_data);
        self.emit(EmeEvent::Warning(error));
        Ok(())
    }

    fn on_listener_end(&mut self, id: u64) {
        tracing::debug!("EME: Session listener {id} ended");
        self.release_gate(id);
    }

    fn release_gate(&mut self, id: u64) {
        if let Some(ticket) = self.processed.by_id_mut(id).and_then(|i| i.ticket.take()) {
            self.gate.release(ticket);
        }
    }
}
