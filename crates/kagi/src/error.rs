use thiserror::Error;

use crate::cdm::MediaKeySessionType;

#[derive(Error, Debug)]
pub enum KagiError {
    #[error("Could not create MediaKeys: {0}")]
    MediaKeysCreationError(String),

    #[error("Could not attach MediaKeys to the media element: {0}")]
    MediaKeysAttachError(String),

    #[error("Could not set the server certificate: {0}")]
    ServerCertificateError(String),

    #[error("CDM refused to create a {0} session: {1}")]
    CdmSessionCreationError(MediaKeySessionType, String),

    #[error("Could not generate a license request: {0}")]
    KeyGenerateRequestError(String),

    #[error("License request failed: {0}")]
    LicenseRequestError(String),

    #[error("Could not update the session with the license: {0}")]
    KeyUpdateError(String),

    #[error("Could not load persisted session: {0}")]
    KeyLoadError(String),

    #[error("Could not close session: {0}")]
    SessionCloseError(String),

    #[error("Key status change: {0}")]
    KeyStatusChangeError(String),

    #[error("Session blacklisted: {0}")]
    BlacklistedSession(Box<KagiError>),

    #[error("Initialization data has been blacklisted but its content is unknown")]
    BlacklistedUnknownContent,

    #[error("Persistent session storage error: {0}")]
    PersistenceError(String),

    #[error("Buffer quota exceeded")]
    QuotaExceeded,

    #[error("Could not append segment to buffer: {0}")]
    BufferAppendError(String),

    #[error("Buffer full: {0}")]
    BufferFullError(String),

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

impl KagiError {
    /// Whether this error is a [`KagiError::BlacklistedSession`], which the
    /// manager recovers from by marking the content undecipherable.
    pub fn is_blacklisted_session(&self) -> bool {
        matches!(self, KagiError::BlacklistedSession(_))
    }
}

pub type KagiResult<T> = Result<T, KagiError>;
