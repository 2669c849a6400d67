use std::sync::{Arc, Mutex, PoisonError};

use crate::init_data::{
    are_init_values_compatible, format_values, FormattedInitDataValue, InitializationData, KeyId,
};

/// Key-related information linked to a `MediaKeySession`.
///
/// A record is created from the initialization data which led to the session,
/// and answers whether other initialization data would be handled by that
/// same session.
///
/// Key ids found in a license but unrelated to the original initialization
/// data can be associated to the record afterwards, so initialization data
/// linked to those key ids is then reported compatible too:
///
/// ```
/// use kagi::{InitDataValue, InitializationData, KeySessionRecord};
///
/// let init_data = InitializationData::new(Some("cenc"), vec![InitDataValue::new(None, &b"pssh"[..])]);
/// let record = KeySessionRecord::new(init_data.into());
///
/// let other = InitializationData::new(Some("cenc"), vec![]).with_key_ids(vec![vec![1; 16]]);
/// assert!(!record.is_compatible_with(&other));
///
/// record.associate_key_ids(&[vec![1; 16], vec![2; 16]]);
/// assert!(record.is_compatible_with(&other));
/// ```
#[derive(Debug)]
pub struct KeySessionRecord {
    init_data: Arc<InitializationData>,
    formatted_values: Vec<FormattedInitDataValue>,
    key_ids: Mutex<Option<Vec<KeyId>>>,
}

impl KeySessionRecord {
    pub fn new(init_data: Arc<InitializationData>) -> Self {
        let formatted_values = format_values(&init_data.values);
        Self {
            init_data,
            formatted_values,
            key_ids: Mutex::new(None),
        }
    }

    pub fn init_data(&self) -> &Arc<InitializationData> {
        &self.init_data
    }

    /// Key ids associated through [`KeySessionRecord::associate_key_ids`].
    pub fn key_ids(&self) -> Option<Vec<KeyId>> {
        self.key_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the associated key ids, without duplicates.
    pub fn associate_key_ids(&self, key_ids: &[KeyId]) {
        let mut deduped: Vec<KeyId> = Vec::with_capacity(key_ids.len());
        for key_id in key_ids {
            if !deduped.contains(key_id) {
                deduped.push(key_id.clone());
            }
        }
        *self.key_ids.lock().unwrap_or_else(PoisonError::into_inner) = Some(deduped);
    }

    pub fn is_compatible_with(&self, init_data: &InitializationData) -> bool {
        if let Some(key_ids) = &init_data.key_ids {
            let associated = self.key_ids.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(associated) = associated.as_ref() {
                if are_all_key_ids_contained_in(key_ids, associated) {
                    return true;
                }
            }
            if let Some(own_key_ids) = &self.init_data.key_ids {
                return are_all_key_ids_contained_in(key_ids, own_key_ids);
            }
        }

        if self.init_data.r#type != init_data.r#type {
            return false;
        }
        let formatted = format_values(&init_data.values);
        are_init_values_compatible(&self.formatted_values, &formatted)
    }
}

/// Whether every key id of `wanted` is in `key_ids`.
pub fn are_all_key_ids_contained_in(wanted: &[KeyId], key_ids: &[KeyId]) -> bool {
    wanted.iter().all(|k| key_ids.contains(k))
}

/// Whether at least one key id of `wanted` is in `key_ids`.
pub fn are_some_key_ids_contained_in(wanted: &[KeyId], key_ids: &[KeyId]) -> bool {
    wanted.iter().any(|k| key_ids.contains(k))
}
