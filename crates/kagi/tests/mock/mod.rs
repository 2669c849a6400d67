//! In-memory CDM used by the tests.
//!
//! Licenses are a list of one-byte key ids: updating a session with a
//! license makes every byte of it a key of the session.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use kagi::{
    cdm::{
        MediaElement, MediaKeyMessageType, MediaKeySession, MediaKeySessionEvent,
        MediaKeySessionType, MediaKeyStatus, MediaKeySystemAccess, MediaKeys,
    },
    license::LicenseFetcher,
    ContentManifest, InitDataValue, InitializationData, KagiError, KagiResult, KeyId,
    KeyIdsUpdate,
};
use tokio::sync::broadcast;

pub const WIDEVINE_SYSTEM_ID: &str = "edef8ba979d64acea3c827dcd51d21ed";

/// Initialization data whose payload is its one-byte key ids.
pub fn init_data(key_ids: &[u8]) -> InitializationData {
    init_data_without_key_ids(key_ids).with_key_ids(key_ids.iter().map(|k| vec![*k]).collect())
}

pub fn init_data_without_key_ids(data: &[u8]) -> InitializationData {
    InitializationData::new(
        Some("cenc"),
        vec![InitDataValue::new(Some(WIDEVINE_SYSTEM_ID), data.to_vec())],
    )
}

#[derive(Default)]
pub struct MockCdm {
    persisted: Mutex<HashMap<String, Vec<(KeyId, MediaKeyStatus)>>>,
    license_status: Mutex<Option<MediaKeyStatus>>,
    next_session_id: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    requests_generated: AtomicUsize,
    server_certificate: Mutex<Option<Vec<u8>>>,
    pub fail_session_creation: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_load: AtomicBool,
    pub fail_server_certificate: AtomicBool,
    /// Sessions only get an id with their first license renewal.
    pub withhold_session_id: AtomicBool,
}

impl MockCdm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a persistent session as if a previous playback created it.
    pub fn persist(&self, session_id: &str, statuses: Vec<(KeyId, MediaKeyStatus)>) {
        self.persisted
            .lock()
            .unwrap()
            .insert(session_id.to_string(), statuses);
    }

    pub fn persisted_session_ids(&self) -> Vec<String> {
        self.persisted.lock().unwrap().keys().cloned().collect()
    }

    /// Status given to the keys of the following licenses.
    pub fn set_license_status(&self, status: MediaKeyStatus) {
        *self.license_status.lock().unwrap() = Some(status);
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn requests_generated(&self) -> usize {
        self.requests_generated.load(Ordering::SeqCst)
    }

    pub fn server_certificate(&self) -> Option<Vec<u8>> {
        self.server_certificate.lock().unwrap().clone()
    }

    fn next_session_id(&self) -> String {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        format!("session-{id}")
    }
}

pub struct MockSession {
    cdm: Arc<MockCdm>,
    session_type: MediaKeySessionType,
    session_id: Mutex<String>,
    key_statuses: Mutex<Vec<(KeyId, MediaKeyStatus)>>,
    events: Mutex<Option<broadcast::Sender<MediaKeySessionEvent>>>,
}

impl MockSession {
    fn new(cdm: Arc<MockCdm>, session_type: MediaKeySessionType) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            cdm,
            session_type,
            session_id: Mutex::new(String::new()),
            key_statuses: Mutex::new(Vec::new()),
            events: Mutex::new(Some(sender)),
        }
    }

    pub fn session_type(&self) -> MediaKeySessionType {
        self.session_type
    }

    fn emit(&self, event: MediaKeySessionEvent) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl MediaKeySession for MockSession {
    fn session_id(&self) -> String {
        self.session_id.lock().unwrap().clone()
    }

    fn key_statuses(&self) -> Vec<(KeyId, MediaKeyStatus)> {
        self.key_statuses.lock().unwrap().clone()
    }

    fn events(&self) -> BoxStream<'static, MediaKeySessionEvent> {
        let receiver = self
            .events
            .lock()
            .unwrap()
            .as_ref()
            .map(broadcast::Sender::subscribe);
        let Some(receiver) = receiver else {
            return futures::stream::empty().boxed();
        };
        futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn generate_request(
        &self,
        _init_data_type: Option<&str>,
        init_data: &[u8],
    ) -> KagiResult<()> {
        self.cdm.requests_generated.fetch_add(1, Ordering::SeqCst);
        if !self.cdm.withhold_session_id.load(Ordering::SeqCst) {
            *self.session_id.lock().unwrap() = self.cdm.next_session_id();
        }
        self.emit(MediaKeySessionEvent::Message {
            message_type: MediaKeyMessageType::LicenseRequest,
            message: Bytes::copy_from_slice(init_data),
        });
        Ok(())
    }

    async fn load(&self, session_id: &str) -> KagiResult<bool> {
        if self.cdm.fail_load.load(Ordering::SeqCst) {
            return Err(KagiError::KeyLoadError("corrupted session".to_string()));
        }
        let statuses = self.cdm.persisted.lock().unwrap().get(session_id).cloned();
        let Some(statuses) = statuses else {
            return Ok(false);
        };
        *self.session_id.lock().unwrap() = session_id.to_string();
        *self.key_statuses.lock().unwrap() = statuses;
        Ok(true)
    }

    async fn update(&self, response: &[u8]) -> KagiResult<()> {
        let renewal = self.session_id().is_empty() && !self.key_statuses().is_empty();
        if renewal {
            // Let the manager handle the keys of the first license first
            tokio::task::yield_now().await;
            *self.session_id.lock().unwrap() = self.cdm.next_session_id();
        }

        let status = self
            .cdm
            .license_status
            .lock()
            .unwrap()
            .unwrap_or(MediaKeyStatus::Usable);
        let statuses: Vec<_> = response.iter().map(|k| (vec![*k], status)).collect();
        *self.key_statuses.lock().unwrap() = statuses.clone();
        let session_id = self.session_id();
        if self.session_type == MediaKeySessionType::PersistentLicense && !session_id.is_empty() {
            self.cdm.persist(&session_id, statuses);
        }
        self.emit(MediaKeySessionEvent::KeyStatusesChange);
        if session_id.is_empty() {
            self.emit(MediaKeySessionEvent::Message {
                message_type: MediaKeyMessageType::LicenseRenewal,
                message: Bytes::copy_from_slice(response),
            });
        }
        Ok(())
    }

    async fn close(&self) -> KagiResult<()> {
        self.cdm.sessions_closed.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
        if self.cdm.fail_close.load(Ordering::SeqCst) {
            return Err(KagiError::SessionCloseError("already closed".to_string()));
        }
        Ok(())
    }
}

pub struct MockMediaKeys {
    cdm: Arc<MockCdm>,
}

impl MockMediaKeys {
    pub fn new(cdm: Arc<MockCdm>) -> Self {
        Self { cdm }
    }
}

impl MediaKeys for MockMediaKeys {
    type Session = MockSession;

    fn create_session(&self, session_type: MediaKeySessionType) -> KagiResult<MockSession> {
        if self.cdm.fail_session_creation.load(Ordering::SeqCst) {
            return Err(KagiError::CdmSessionCreationError(
                session_type,
                "too many sessions".to_string(),
            ));
        }
        self.cdm.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession::new(self.cdm.clone(), session_type))
    }

    async fn set_server_certificate(&self, certificate: &[u8]) -> KagiResult<()> {
        if self.cdm.fail_server_certificate.load(Ordering::SeqCst) {
            return Err(KagiError::ServerCertificateError(
                "certificate rejected".to_string(),
            ));
        }
        *self.cdm.server_certificate.lock().unwrap() = Some(certificate.to_vec());
        Ok(())
    }
}

pub struct MockAccess {
    cdm: Arc<MockCdm>,
    session_types: Vec<MediaKeySessionType>,
}

impl MockAccess {
    pub fn new(cdm: Arc<MockCdm>) -> Self {
        Self {
            cdm,
            session_types: vec![MediaKeySessionType::Temporary],
        }
    }

    pub fn with_persistent_sessions(mut self) -> Self {
        self.session_types
            .push(MediaKeySessionType::PersistentLicense);
        self
    }
}

impl MediaKeySystemAccess for MockAccess {
    type MediaKeys = MockMediaKeys;

    fn key_system(&self) -> &str {
        "com.widevine.alpha"
    }

    fn session_types(&self) -> Vec<MediaKeySessionType> {
        self.session_types.clone()
    }

    async fn create_media_keys(&self) -> KagiResult<MockMediaKeys> {
        Ok(MockMediaKeys::new(self.cdm.clone()))
    }
}

#[derive(Default)]
pub struct MockElement {
    pub media_keys: Mutex<Option<Arc<MockMediaKeys>>>,
}

impl MediaElement<MockMediaKeys> for MockElement {
    async fn attach_media_keys(&self, media_keys: Arc<MockMediaKeys>) -> KagiResult<()> {
        *self.media_keys.lock().unwrap() = Some(media_keys);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockManifest {
    pub undecipherable: Mutex<Vec<InitializationData>>,
    pub updates: Mutex<Vec<KeyIdsUpdate>>,
}

impl ContentManifest for MockManifest {
    fn add_undecipherable_protection_data(&self, init_data: &InitializationData) {
        self.undecipherable.lock().unwrap().push(init_data.clone());
    }

    fn update_decipherabilities_based_on_key_ids(&self, update: &KeyIdsUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

/// License server answering every challenge with the key ids it contains.
#[derive(Default)]
pub struct MockFetcher {
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` requests.
    pub fn failing(count: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(count),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LicenseFetcher for MockFetcher {
    async fn get_license(
        &self,
        message: &[u8],
        _message_type: MediaKeyMessageType,
    ) -> KagiResult<Option<Bytes>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(KagiError::LicenseRequestError(
                "license server unavailable".to_string(),
            ));
        }
        Ok(Some(Bytes::copy_from_slice(message)))
    }
}
