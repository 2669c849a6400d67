pub mod loaded;
pub mod persistent;

pub use loaded::{clean_old_loaded_sessions, LoadedSessionEntry, LoadedSessionsStore};
pub use persistent::{clean_old_stored_persistent_info, PersistentSessionsStore};

use crate::{cdm::MediaKeys, storage::SessionStorage};

/// Session stores owned by one content.
pub struct MediaKeySessionStores<K: MediaKeys, St: SessionStorage> {
    pub loaded_sessions_store: LoadedSessionsStore<K>,
    /// `None` when persistent sessions are not wanted.
    pub persistent_sessions_store: Option<PersistentSessionsStore<St>>,
}
