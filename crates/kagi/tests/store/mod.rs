use std::sync::{atomic::Ordering, Arc};

use kagi::{
    cdm::{MediaKeySession, MediaKeySessionType, MediaKeys},
    record::KeySessionRecord,
    storage::{file::FileSessionStorage, memory::MemorySessionStorage, SessionStorage},
    store::{
        clean_old_loaded_sessions, clean_old_stored_persistent_info, LoadedSessionsStore,
        PersistentSessionsStore,
    },
};

use crate::mock::{init_data, init_data_without_key_ids, MockCdm, MockMediaKeys};

fn loaded_store(cdm: &Arc<MockCdm>) -> LoadedSessionsStore<MockMediaKeys> {
    LoadedSessionsStore::new(Arc::new(MockMediaKeys::new(cdm.clone())))
}

fn record(key_ids: &[u8]) -> KeySessionRecord {
    KeySessionRecord::new(Arc::new(init_data(key_ids)))
}

/// A session answering to `session_id`.
async fn session_with_id(
    cdm: &Arc<MockCdm>,
    session_id: &str,
) -> anyhow::Result<impl MediaKeySession> {
    cdm.persist(session_id, Vec::new());
    let session = MockMediaKeys::new(cdm.clone())
        .create_session(MediaKeySessionType::PersistentLicense)?;
    assert!(session.load(session_id).await?);
    Ok(session)
}

#[tokio::test]
async fn test_loaded_store_reuse_moves_entry_last() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = loaded_store(&cdm);

    let first = store.create_session(Arc::new(init_data(&[1])), MediaKeySessionType::Temporary)?;
    store.create_session(Arc::new(init_data(&[2])), MediaKeySessionType::Temporary)?;
    assert_eq!(store.len(), 2);

    let reused = store.reuse(&init_data(&[1])).expect("compatible entry");
    assert!(Arc::ptr_eq(&reused.media_key_session, &first.media_key_session));
    assert!(Arc::ptr_eq(
        &store.get_all()[1].media_key_session,
        &first.media_key_session
    ));

    assert!(store.reuse(&init_data(&[3])).is_none());
    assert_eq!(store.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_loaded_store_reuse_by_associated_key_ids() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = loaded_store(&cdm);

    let entry = store.create_session(
        Arc::new(init_data_without_key_ids(b"pssh")),
        MediaKeySessionType::Temporary,
    )?;
    assert!(store.reuse(&init_data(&[9])).is_none());

    entry.key_session_record.associate_key_ids(&[vec![8], vec![9]]);
    assert!(store.reuse(&init_data(&[9])).is_some());
    Ok(())
}

#[tokio::test]
async fn test_close_session_removes_entry_even_on_failure() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    cdm.fail_close.store(true, Ordering::SeqCst);
    let mut store = loaded_store(&cdm);

    let entry = store.create_session(Arc::new(init_data(&[1])), MediaKeySessionType::Temporary)?;
    store.close_session(&entry.media_key_session).await;

    assert!(store.is_empty());
    assert!(!store.contains(&entry.media_key_session));
    assert_eq!(cdm.sessions_closed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_clean_old_loaded_sessions_keeps_most_recent() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = loaded_store(&cdm);

    let mut entries = Vec::new();
    for key in 1..=5 {
        entries.push(store.create_session(
            Arc::new(init_data(&[key])),
            MediaKeySessionType::Temporary,
        )?);
    }
    // Key 1 becomes the most recently used
    store.reuse(&init_data(&[1]));

    clean_old_loaded_sessions(&mut store, 2).await;
    assert_eq!(store.len(), 2);
    assert_eq!(cdm.sessions_closed(), 3);
    assert!(store.contains(&entries[4].media_key_session));
    assert!(store.contains(&entries[0].media_key_session));

    // Under the limit, nothing happens
    clean_old_loaded_sessions(&mut store, 10).await;
    assert_eq!(store.len(), 2);

    clean_old_loaded_sessions(&mut store, 0).await;
    assert!(store.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_close_all_sessions() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = loaded_store(&cdm);
    store.create_session(Arc::new(init_data(&[1])), MediaKeySessionType::Temporary)?;
    store.create_session(
        Arc::new(init_data(&[2])),
        MediaKeySessionType::PersistentLicense,
    )?;

    store.close_all_sessions().await;
    assert!(store.is_empty());
    assert_eq!(cdm.sessions_closed(), 2);
    Ok(())
}

#[tokio::test]
async fn test_persistent_store_round_trip() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let storage = Arc::new(MemorySessionStorage::new());
    let mut store = PersistentSessionsStore::load(storage.clone()).await;

    let session = session_with_id(&cdm, "abc").await?;
    store.add(&record(&[1, 2]), &session).await;
    assert_eq!(store.len(), 1);
    assert_eq!(storage.load().await?.len(), 1);

    // Another record of the same content finds it back
    let stored = store.get_and_reuse(&record(&[1, 2])).await.expect("stored");
    assert_eq!(stored.session_id, "abc");
    assert!(store.get(&record(&[3])).is_none());

    // A fresh store reads what was saved
    let mut store = PersistentSessionsStore::load(storage.clone()).await;
    assert_eq!(
        store.get(&record(&[1, 2])).map(|s| s.session_id.as_str()),
        Some("abc")
    );

    store.delete(&record(&[1, 2])).await;
    assert!(store.is_empty());
    assert!(storage.load().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_persistent_store_add_replaces_compatible_entry() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = PersistentSessionsStore::load(MemorySessionStorage::new()).await;

    assert!(store.add(&record(&[1]), &session_with_id(&cdm, "first").await?).await);
    assert!(store.add(&record(&[1]), &session_with_id(&cdm, "first").await?).await);
    assert_eq!(store.len(), 1);

    assert!(store.add(&record(&[1]), &session_with_id(&cdm, "second").await?).await);
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&record(&[1])).unwrap().session_id, "second");

    // Sessions without id are refused
    let session =
        MockMediaKeys::new(cdm.clone()).create_session(MediaKeySessionType::Temporary)?;
    assert!(!store.add(&record(&[2]), &session).await);
    assert_eq!(store.len(), 1);
    assert!(store.get(&record(&[2])).is_none());
    Ok(())
}

#[tokio::test]
async fn test_persistent_store_never_exceeds_max_size() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = PersistentSessionsStore::load(MemorySessionStorage::new())
        .await
        .with_max_size(3);

    for key in 0..10u8 {
        let session = session_with_id(&cdm, &format!("session-{key}")).await?;
        store.add(&record(&[key]), &session).await;
        assert!(store.len() <= 3);
    }

    let ids: Vec<_> = store.get_all().map(|e| e.session_id.clone()).collect();
    assert_eq!(ids, vec!["session-7", "session-8", "session-9"]);
    Ok(())
}

#[tokio::test]
async fn test_clean_old_stored_persistent_info() -> anyhow::Result<()> {
    let cdm = MockCdm::new();
    let mut store = PersistentSessionsStore::load(MemorySessionStorage::new()).await;
    for key in 0..4u8 {
        let session = session_with_id(&cdm, &format!("session-{key}")).await?;
        store.add(&record(&[key]), &session).await;
    }

    clean_old_stored_persistent_info(&mut store, 5).await;
    assert_eq!(store.len(), 4);

    clean_old_stored_persistent_info(&mut store, 1).await;
    let ids: Vec<_> = store.get_all().map(|e| e.session_id.clone()).collect();
    assert_eq!(ids, vec!["session-3"]);
    Ok(())
}

#[tokio::test]
async fn test_persistent_store_survives_unreadable_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.json");
    tokio::fs::write(&path, b"not json").await?;

    let cdm = MockCdm::new();
    let storage = FileSessionStorage::new(path.clone());
    let mut store = PersistentSessionsStore::load(storage).await;
    assert!(store.is_empty());

    store.add(&record(&[1]), &session_with_id(&cdm, "abc").await?).await;
    let store = PersistentSessionsStore::load(FileSessionStorage::new(path)).await;
    assert_eq!(store.len(), 1);
    Ok(())
}
