pub mod file;
pub mod memory;

use crate::{
    error::KagiResult,
    init_data::{hash_buffer, InitDataValue, InitializationData, KeyId},
    record::KeySessionRecord,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, path::PathBuf, sync::Arc};

/// Current version of [`StoredSessionEntry`].
pub const STORED_SESSION_ENTRY_VERSION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredInitDataValue {
    pub system_id: Option<String>,
    pub hash: i32,
    /// Hex-encoded payload
    pub data: String,
}

/// Serializable form of a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSessionEntry {
    pub version: u32,
    pub session_id: String,
    pub init_data_type: Option<String>,
    pub values: Vec<StoredInitDataValue>,
    /// Hex-encoded key ids known to be handled by the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ids: Option<Vec<String>>,
}

impl StoredSessionEntry {
    pub fn new(record: &KeySessionRecord, session_id: String) -> Self {
        let init_data = record.init_data();
        let key_ids = record.key_ids().or_else(|| init_data.key_ids.clone());
        Self {
            version: STORED_SESSION_ENTRY_VERSION,
            session_id,
            init_data_type: init_data.r#type.clone(),
            values: init_data
                .values
                .iter()
                .map(|v| StoredInitDataValue {
                    system_id: v.system_id.clone(),
                    hash: hash_buffer(&v.data),
                    data: hex::encode(&v.data),
                })
                .collect(),
            key_ids: key_ids.map(|ids| ids.iter().map(hex::encode).collect()),
        }
    }

    /// Rebuild the record this entry was stored from.
    pub fn to_record(&self) -> KagiResult<KeySessionRecord> {
        let values = self
            .values
            .iter()
            .map(|v| Ok(InitDataValue::new(v.system_id.as_deref(), hex::decode(&v.data)?)))
            .collect::<KagiResult<Vec<_>>>()?;
        let key_ids = self
            .key_ids
            .as_ref()
            .map(|ids| ids.iter().map(hex::decode).collect::<Result<Vec<KeyId>, _>>())
            .transpose()?;

        let init_data = InitializationData::new(self.init_data_type.as_deref(), values);
        let record = KeySessionRecord::new(Arc::new(init_data));
        if let Some(key_ids) = key_ids {
            record.associate_key_ids(&key_ids);
        }
        Ok(record)
    }
}

/// Durable storage for persistent session entries.
pub trait SessionStorage: Send + Sync + 'static {
    /// Load every stored entry, oldest first.
    fn load(&self) -> impl Future<Output = KagiResult<Vec<StoredSessionEntry>>> + Send;

    /// Replace the stored entries.
    fn save(&self, entries: &[StoredSessionEntry]) -> impl Future<Output = KagiResult<()>> + Send;

    /// Hint a location for the stored entries.
    fn location_hint(&self) -> Option<String> {
        None
    }
}

impl<S> SessionStorage for Arc<S>
where
    S: SessionStorage,
{
    fn load(&self) -> impl Future<Output = KagiResult<Vec<StoredSessionEntry>>> + Send {
        self.as_ref().load()
    }

    fn save(&self, entries: &[StoredSessionEntry]) -> impl Future<Output = KagiResult<()>> + Send {
        self.as_ref().save(entries)
    }

    fn location_hint(&self) -> Option<String> {
        self.as_ref().location_hint()
    }
}

pub enum KagiStorage {
    Memory(memory::MemorySessionStorage),
    File(file::FileSessionStorage),
}

impl KagiStorage {
    pub fn memory() -> Self {
        Self::Memory(memory::MemorySessionStorage::new())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(file::FileSessionStorage::new(path.into()))
    }
}

impl SessionStorage for KagiStorage {
    async fn load(&self) -> KagiResult<Vec<StoredSessionEntry>> {
        match self {
            KagiStorage::Memory(storage) => storage.load().await,
            KagiStorage::File(storage) => storage.load().await,
        }
    }

    async fn save(&self, entries: &[StoredSessionEntry]) -> KagiResult<()> {
        match self {
            KagiStorage::Memory(storage) => storage.save(entries).await,
            KagiStorage::File(storage) => storage.save(entries).await,
        }
    }

    fn location_hint(&self) -> Option<String> {
        match self {
            KagiStorage::Memory(storage) => storage.location_hint(),
            KagiStorage::File(storage) => storage.location_hint(),
        }
    }
}
