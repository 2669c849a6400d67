use std::sync::Arc;

use crate::{
    cdm::MediaKeySessionType,
    init_data::{InitializationData, KeyIdsUpdate},
    record::KeySessionRecord,
};

use super::gate::GateTicket;

/// Where the MediaKeySession handling some initialization data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    /// Created while processing the initialization data, a license request
    /// was needed.
    NewSession,
    /// An already open session was reused.
    FromCache,
    /// A persisted session was loaded.
    FromPersisted,
}

pub(crate) struct SessionInfo<S> {
    /// Record of the loaded session entry.
    pub record: Arc<KeySessionRecord>,
    pub source: SessionSource,
    pub session: Arc<S>,
    pub session_type: MediaKeySessionType,
    /// Last evaluated key statuses, `None` until they are known.
    pub key_statuses: Option<KeyIdsUpdate>,
    /// Set once the session has been blacklisted. Every compatible
    /// initialization data is then undecipherable.
    pub blacklisted_session_error: Option<String>,
    pub is_persisted: bool,
}

pub(crate) struct ProcessedInitDataItem<S> {
    pub id: u64,
    pub record: Arc<KeySessionRecord>,
    pub init_data: Arc<InitializationData>,
    /// `None` while the session is being created.
    pub session_info: Option<SessionInfo<S>>,
    /// Held while this item blocks the intake.
    pub ticket: Option<GateTicket>,
}

impl<S> ProcessedInitDataItem<S> {
    pub fn is_compatible_with(&self, init_data: &InitializationData) -> bool {
        self.record.is_compatible_with(init_data)
            || self
                .session_info
                .as_ref()
                .is_some_and(|info| info.record.is_compatible_with(init_data))
    }
}

/// Initialization data already handled for the current content, in
/// processing order.
pub(crate) struct ProcessedInitData<S> {
    items: Vec<ProcessedInitDataItem<S>>,
    next_id: u64,
}

impl<S> Default for ProcessedInitData<S> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_id: 0,
        }
    }
}

impl<S> ProcessedInitData<S> {
    pub fn push(
        &mut self,
        init_data: Arc<InitializationData>,
        ticket: Option<GateTicket>,
    ) -> &mut ProcessedInitDataItem<S> {
        let id = self.next_id;
        self.next_id += 1;
        self.items.push(ProcessedInitDataItem {
            id,
            record: Arc::new(KeySessionRecord::new(init_data.clone())),
            init_data,
            session_info: None,
            ticket,
        });
        let index = self.items.len() - 1;
        &mut self.items[index]
    }

    pub fn find_compatible(&self, init_data: &InitializationData) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.is_compatible_with(init_data))
    }

    pub fn get(&self, index: usize) -> &ProcessedInitDataItem<S> {
        &self.items[index]
    }

    pub fn by_id_mut(&mut self, id: u64) -> Option<&mut ProcessedInitDataItem<S>> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn remove(&mut self, index: usize) -> ProcessedInitDataItem<S> {
        self.items.remove(index)
    }

    /// First item whose session had to be created.
    pub fn first_new_session(&self) -> Option<&ProcessedInitDataItem<S>> {
        self.items.iter().find(|item| {
            item.session_info
                .as_ref()
                .is_some_and(|info| info.source == SessionSource::NewSession)
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
