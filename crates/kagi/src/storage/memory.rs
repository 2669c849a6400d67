use super::{SessionStorage, StoredSessionEntry};
use crate::error::KagiResult;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
pub struct MemorySessionStorage {
    entries: Arc<Mutex<Vec<StoredSessionEntry>>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Arc<Mutex<Vec<StoredSessionEntry>>> {
        self.entries.clone()
    }
}

impl SessionStorage for MemorySessionStorage {
    async fn load(&self) -> KagiResult<Vec<StoredSessionEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.clone())
    }

    async fn save(&self, entries: &[StoredSessionEntry]) -> KagiResult<()> {
        let mut stored = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        *stored = entries.to_vec();
        Ok(())
    }
}
