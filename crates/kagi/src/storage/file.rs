use super::{SessionStorage, StoredSessionEntry};
use crate::error::{KagiError, KagiResult};
use std::{io::ErrorKind, path::PathBuf};

/// Stores entries as a JSON array in a single file.
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn ensure_parent_dir(&self) -> KagiResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        Ok(())
    }
}

impl SessionStorage for FileSessionStorage {
    async fn load(&self) -> KagiResult<Vec<StoredSessionEntry>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data)
            .map_err(|e| KagiError::PersistenceError(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, entries: &[StoredSessionEntry]) -> KagiResult<()> {
        self.ensure_parent_dir().await?;

        // replaced through a sibling file so readers never see a partial write
        let tmp_path = self.path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn location_hint(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}
