use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum number of MediaKeySessions kept open at the same time when
/// `max_session_cache_size` is not set.
pub const EME_DEFAULT_MAX_SIMULTANEOUS_MEDIA_KEY_SESSIONS: usize = 15;

/// Maximum number of persistent session entries kept in durable storage.
pub const EME_MAX_STORED_PERSISTENT_SESSION_INFORMATION: usize = 1000;

pub const EME_DEFAULT_LICENSE_REQUEST_RETRY: u32 = 2;
pub const EME_DEFAULT_LICENSE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const EME_LICENSE_REQUEST_BASE_DELAY: Duration = Duration::from_millis(200);
pub const EME_LICENSE_REQUEST_MAX_DELAY: Duration = Duration::from_secs(3);

/// Distance from the playhead, in seconds, under which buffered data is kept
/// by a first garbage collection pass.
pub const BUFFER_GC_GAP_CALM: f64 = 240.;
/// Same as [`BUFFER_GC_GAP_CALM`], used when the first pass removed nothing.
pub const BUFFER_GC_GAP_BEEFY: f64 = 30.;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SingleLicensePer {
    /// One license per initialization data.
    #[default]
    InitData,
    /// A single license covers every key of the content.
    Content,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackOn {
    /// Blacklist keys reporting `internal-error` instead of failing.
    pub key_internal_error: bool,
    /// Blacklist keys reporting `output-restricted` instead of failing.
    pub key_output_restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseConfig {
    pub retry: u32,
    pub timeout_ms: Option<u64>,
    /// When the last license request attempt fails, blacklist the session
    /// instead of stopping playback.
    pub fallback_on_last_try: bool,
}

impl LicenseConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(EME_DEFAULT_LICENSE_REQUEST_TIMEOUT)
    }
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            retry: EME_DEFAULT_LICENSE_REQUEST_RETRY,
            timeout_ms: None,
            fallback_on_last_try: false,
        }
    }
}

/// Per-content key system options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeySystemOptions {
    pub single_license_per: SingleLicensePer,
    pub persistent_license: bool,
    pub max_session_cache_size: Option<usize>,
    #[serde(with = "hex_opt")]
    pub server_certificate: Option<Vec<u8>>,
    pub throw_on_license_expiration: bool,
    pub fallback_on: FallbackOn,
    pub license: LicenseConfig,
}

impl KeySystemOptions {
    pub fn max_session_cache_size(&self) -> usize {
        self.max_session_cache_size
            .unwrap_or(EME_DEFAULT_MAX_SIMULTANEOUS_MEDIA_KEY_SESSIONS)
    }
}

impl Default for KeySystemOptions {
    fn default() -> Self {
        Self {
            single_license_per: SingleLicensePer::default(),
            persistent_license: false,
            max_session_cache_size: None,
            server_certificate: None,
            throw_on_license_expiration: true,
            fallback_on: FallbackOn::default(),
            license: LicenseConfig::default(),
        }
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
