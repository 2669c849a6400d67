pub mod buffer;
pub mod cdm;
pub mod config;
pub mod error;
pub mod init_data;
pub mod license;
pub mod listener;
pub mod manager;
pub mod record;
pub mod session;
pub mod storage;
pub mod store;
pub mod util;

pub use error::{KagiError, KagiResult};
pub use init_data::{
    ContentManifest, ContentRef, InitDataValue, InitializationData, KeyId, KeyIdsUpdate,
    MediaEncryptedEvent,
};
pub use manager::{EmeEvent, EmeManager, EncryptionSignal, SessionSource};
pub use record::KeySessionRecord;
pub use storage::KagiStorage;
