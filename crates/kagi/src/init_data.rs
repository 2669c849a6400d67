use std::{
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;

pub type KeyId = Vec<u8>;

/// One initialization data payload, as signaled for a given DRM system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataValue {
    /// Hex-encoded DRM system id, when known.
    pub system_id: Option<String>,
    pub data: Bytes,
}

impl InitDataValue {
    pub fn new(system_id: Option<&str>, data: impl Into<Bytes>) -> Self {
        Self {
            system_id: system_id.map(str::to_string),
            data: data.into(),
        }
    }
}

/// Key id decipherability changes announced to the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIdsUpdate {
    pub whitelisted_key_ids: Vec<KeyId>,
    pub blacklisted_key_ids: Vec<KeyId>,
}

impl KeyIdsUpdate {
    pub fn blacklist(key_ids: Vec<KeyId>) -> Self {
        Self {
            whitelisted_key_ids: Vec::new(),
            blacklisted_key_ids: key_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.whitelisted_key_ids.is_empty() && self.blacklisted_key_ids.is_empty()
    }
}

/// The manifest side of the player, told about content that can not be
/// decrypted.
pub trait ContentManifest: Send + Sync {
    fn add_undecipherable_protection_data(&self, init_data: &InitializationData);

    fn update_decipherabilities_based_on_key_ids(&self, update: &KeyIdsUpdate);
}

/// Non-owning handle to the manifest which produced some initialization data.
#[derive(Clone)]
pub struct ContentRef(Weak<dyn ContentManifest>);

impl ContentRef {
    pub fn new(manifest: &Arc<dyn ContentManifest>) -> Self {
        Self(Arc::downgrade(manifest))
    }

    pub fn manifest(&self) -> Option<Arc<dyn ContentManifest>> {
        self.0.upgrade()
    }
}

impl fmt::Debug for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentRef")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

/// One unit of encryption signaling.
#[derive(Debug, Clone, Default)]
pub struct InitializationData {
    /// Format of the payloads, e.g. `cenc` or `keyids`.
    pub r#type: Option<String>,
    pub values: Vec<InitDataValue>,
    /// Key ids known up front.
    pub key_ids: Option<Vec<KeyId>>,
    pub content: Option<ContentRef>,
}

impl InitializationData {
    pub fn new(r#type: Option<&str>, values: Vec<InitDataValue>) -> Self {
        Self {
            r#type: r#type.map(str::to_string),
            values,
            key_ids: None,
            content: None,
        }
    }

    pub fn with_key_ids(mut self, key_ids: Vec<KeyId>) -> Self {
        self.key_ids = Some(key_ids);
        self
    }

    pub fn with_content(mut self, content: ContentRef) -> Self {
        self.content = Some(content);
        self
    }

    pub fn manifest(&self) -> Option<Arc<dyn ContentManifest>> {
        self.content.as_ref().and_then(ContentRef::manifest)
    }

    /// Every payload concatenated, as awaited by a license request.
    pub fn concat_values(&self) -> Bytes {
        let mut data = Vec::with_capacity(self.values.iter().map(|v| v.data.len()).sum());
        for value in &self.values {
            data.extend_from_slice(&value.data);
        }
        data.into()
    }
}

/// Media element `encrypted` event.
#[derive(Debug, Clone, Default)]
pub struct MediaEncryptedEvent {
    pub init_data_type: Option<String>,
    pub init_data: Option<Bytes>,
}

impl MediaEncryptedEvent {
    pub fn into_init_data(self) -> Option<InitializationData> {
        let data = self.init_data?;
        Some(InitializationData {
            r#type: self.init_data_type,
            values: vec![InitDataValue {
                system_id: None,
                data,
            }],
            key_ids: None,
            content: None,
        })
    }
}

/// Java-style 32-bit hash of a byte buffer.
pub fn hash_buffer(buffer: &[u8]) -> i32 {
    buffer.iter().fold(0i32, |hash, &byte| {
        (hash << 5).wrapping_sub(hash).wrapping_add(byte as i32)
    })
}

/// An [`InitDataValue`] with its hash, sorted by system id for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormattedInitDataValue {
    pub system_id: Option<String>,
    pub hash: i32,
    pub data: Bytes,
}

/// Sort values by system id, values without one last, and hash them.
pub(crate) fn format_values(values: &[InitDataValue]) -> Vec<FormattedInitDataValue> {
    let mut values: Vec<_> = values
        .iter()
        .map(|v| FormattedInitDataValue {
            system_id: v.system_id.clone(),
            hash: hash_buffer(&v.data),
            data: v.data.clone(),
        })
        .collect();
    values.sort_by(|a, b| match (&a.system_id, &b.system_id) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    values
}

/// Whether one set of formatted values is contained in the other, without
/// any conflicting payload for a shared system id.
pub(crate) fn are_init_values_compatible(
    stored: &[FormattedInitDataValue],
    new: &[FormattedInitDataValue],
) -> bool {
    is_a_in_b(stored, new)
        .or_else(|| is_a_in_b(new, stored))
        .unwrap_or(false)
}

/// `Some(true)` if every value of `a` is found in `b`, `Some(false)` on a
/// conflicting payload, `None` when it can not be decided.
fn is_a_in_b(a: &[FormattedInitDataValue], b: &[FormattedInitDataValue]) -> Option<bool> {
    let Some(first) = a.first() else {
        return Some(false);
    };
    if b.len() < a.len() {
        return None;
    }

    let mut b_idx = b.iter().position(|v| v.system_id == first.system_id)?;
    if b.len() - b_idx < a.len() {
        return None;
    }

    for a_value in a {
        let offset = b[b_idx..]
            .iter()
            .position(|v| v.system_id == a_value.system_id)?;
        let b_value = &b[b_idx + offset];
        if b_value.hash != a_value.hash || b_value.data != a_value.data {
            return Some(false);
        }
        b_idx += offset + 1;
    }
    Some(true)
}
