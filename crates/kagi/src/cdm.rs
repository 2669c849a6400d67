//! Contracts of the Content Decryption Module exposed by the media host.

use std::{fmt, future::Future, sync::Arc};

use bytes::Bytes;
use futures::stream::BoxStream;
use crate::{error::KagiResult, init_data::KeyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKeySessionType {
    Temporary,
    PersistentLicense,
}

impl fmt::Display for MediaKeySessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary => write!(f, "temporary"),
            Self::PersistentLicense => write!(f, "persistent-license"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKeyStatus {
    Usable,
    Expired,
    Released,
    OutputRestricted,
    OutputDownscaled,
    StatusPending,
    InternalError,
}

impl fmt::Display for MediaKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Usable => "usable",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::OutputRestricted => "output-restricted",
            Self::OutputDownscaled => "output-downscaled",
            Self::StatusPending => "status-pending",
            Self::InternalError => "internal-error",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKeyMessageType {
    LicenseRequest,
    LicenseRenewal,
    LicenseRelease,
    IndividualizationRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKeySessionEvent {
    /// The CDM wants `message` to be sent to a license server.
    Message {
        message_type: MediaKeyMessageType,
        message: Bytes,
    },
    /// The key statuses of the session changed.
    KeyStatusesChange,
}

pub trait MediaKeySession: Send + Sync + 'static {
    /// Session id given by the CDM. Empty until a request is generated or a
    /// session is loaded.
    fn session_id(&self) -> String;

    fn key_statuses(&self) -> Vec<(KeyId, MediaKeyStatus)>;

    /// Events sent by the CDM for this session. The stream ends once the
    /// session is closed.
    fn events(&self) -> BoxStream<'static, MediaKeySessionEvent>;

    fn generate_request(
        &self,
        init_data_type: Option<&str>,
        init_data: &[u8],
    ) -> impl Future<Output = KagiResult<()>> + Send;

    /// Load a persisted session. Resolves to `false` when nothing was stored
    /// under that id.
    fn load(&self, session_id: &str) -> impl Future<Output = KagiResult<bool>> + Send;

    fn update(&self, response: &[u8]) -> impl Future<Output = KagiResult<()>> + Send;

    fn close(&self) -> impl Future<Output = KagiResult<()>> + Send;
}

pub trait MediaKeys: Send + Sync + 'static {
    type Session: MediaKeySession;

    fn create_session(&self, session_type: MediaKeySessionType) -> KagiResult<Self::Session>;

    fn set_server_certificate(
        &self,
        certificate: &[u8],
    ) -> impl Future<Output = KagiResult<()>> + Send;
}

pub trait MediaKeySystemAccess: Send + Sync + 'static {
    type MediaKeys: MediaKeys;

    fn key_system(&self) -> &str;

    /// Session types allowed by the negotiated configuration.
    fn session_types(&self) -> Vec<MediaKeySessionType>;

    fn create_media_keys(&self) -> impl Future<Output = KagiResult<Self::MediaKeys>> + Send;
}

pub trait MediaElement<K: MediaKeys>: Send + Sync {
    fn attach_media_keys(&self, media_keys: Arc<K>) -> impl Future<Output = KagiResult<()>> + Send;
}

/// Returns `true` if the access can create `persistent-license` sessions.
pub fn can_create_persistent_session<A: MediaKeySystemAccess>(access: &A) -> bool {
    access
        .session_types()
        .contains(&MediaKeySessionType::PersistentLicense)
}
