//! Liked/unliked state per property, flipped optimistically on tap.

use crate::api::client::ApiClient;
use crate::api::events::PushFrame;
use crate::api::models::{FavoriteRecord, Id};
use crate::error::{ClientError, Result};
use crate::realtime::collection::{KeyedCollection, Optimistic, Reducer, Settled};
use crate::realtime::reconciler::SnapshotSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteEntry {
    pub liked: bool,
    pub record_id: Option<Id>,
}

/// What a screen renders for one property's heart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FavoriteState {
    pub liked: bool,
    pub record_id: Option<Id>,
    /// The control should be disabled while this is set.
    pub pending: bool,
}

#[derive(Debug, Default)]
pub struct FavoriteReducer;

impl Reducer for FavoriteReducer {
    type Key = Id;
    type Entry = FavoriteEntry;
    type Record = FavoriteRecord;
    type Event = FavoriteRecord;

    fn fold_snapshot(&self, records: Vec<FavoriteRecord>) -> Vec<(Id, FavoriteEntry)> {
        records.into_iter().filter_map(|r| self.fold_event(r)).collect()
    }

    fn fold_event(&self, event: FavoriteRecord) -> Option<(Id, FavoriteEntry)> {
        Some((event.property, FavoriteEntry { liked: true, record_id: Some(event.id) }))
    }

    fn event_from_frame(&self, _frame: PushFrame) -> Option<FavoriteRecord> {
        None
    }

    fn timestamp(&self, _entry: &FavoriteEntry) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    fn weight(&self, entry: &FavoriteEntry) -> usize {
        usize::from(entry.liked)
    }
}

/// Server side of a favorite toggle.
#[async_trait]
pub trait FavoriteRemote: Send + Sync {
    async fn add_favorite(&self, property: &Id) -> Result<FavoriteRecord>;
    async fn remove_favorite(&self, record: &Id) -> Result<()>;
}

#[async_trait]
impl FavoriteRemote for ApiClient {
    async fn add_favorite(&self, property: &Id) -> Result<FavoriteRecord> {
        ApiClient::add_favorite(self, property).await
    }

    async fn remove_favorite(&self, record: &Id) -> Result<()> {
        ApiClient::remove_favorite(self, record).await
    }
}

/// An optimistic flip waiting for the server.
#[derive(Debug)]
#[must_use = "a toggle must be committed or rolled back"]
pub struct FavoriteIntent {
    ticket: Optimistic<Id>,
    pub property: Id,
    pub now_liked: bool,
    /// Record to delete when un-liking.
    pub record_id: Option<Id>,
}

pub struct FavoriteBook {
    inner: Mutex<KeyedCollection<FavoriteReducer>>,
}

impl Default for FavoriteBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FavoriteBook {
    pub fn new() -> Self {
        Self { inner: Mutex::new(KeyedCollection::new(FavoriteReducer)) }
    }

    fn inner(&self) -> MutexGuard<'_, KeyedCollection<FavoriteReducer>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self, property: &Id) -> FavoriteState {
        let inner = self.inner();
        let pending = inner.is_pending(property);
        match inner.get(property) {
            Some(e) => FavoriteState { liked: e.liked, record_id: e.record_id.clone(), pending },
            None => FavoriteState { pending, ..FavoriteState::default() },
        }
    }

    pub fn liked_count(&self) -> usize {
        self.inner().aggregate()
    }

    pub fn apply_server_snapshot(&self, records: Vec<FavoriteRecord>) {
        self.inner().apply_server_snapshot(records);
    }

    pub async fn refresh(&self, source: &dyn SnapshotSource<FavoriteRecord>) -> Result<()> {
        let records = source.fetch().await?;
        self.apply_server_snapshot(records);
        Ok(())
    }

    /// Flips the heart locally. Refused while a previous flip for the same property is pending.
    pub fn begin_toggle(&self, property: &Id) -> Result<FavoriteIntent> {
        let mut inner = self.inner();
        let current = inner.get(property).cloned();
        let was_liked = current.as_ref().is_some_and(|e| e.liked);
        let record_id = current.and_then(|e| e.record_id);
        if was_liked && record_id.is_none() {
            return Err(ClientError::Validation(format!(
                "favorite for property {} has no record id",
                property
            )));
        }
        let ticket = inner.mutate_optimistic(property.clone(), move |_| FavoriteEntry {
            liked: !was_liked,
            record_id: None,
        })?;
        Ok(FavoriteIntent {
            ticket,
            property: property.clone(),
            now_liked: !was_liked,
            record_id,
        })
    }

    /// `record_id` is the server's new record when liking; ignored when un-liking.
    ///
    /// A like without a record cannot be un-liked later, so it is rolled back instead.
    pub fn commit(&self, intent: FavoriteIntent, record_id: Option<Id>) -> Settled {
        let confirmed = match (intent.now_liked, record_id) {
            (true, Some(id)) => FavoriteEntry { liked: true, record_id: Some(id) },
            (true, None) => {
                log::warn!("Like for property {} confirmed without a record id", intent.property);
                return self.rollback(intent);
            }
            (false, _) => FavoriteEntry { liked: false, record_id: None },
        };
        self.inner().commit(intent.ticket, Some(confirmed))
    }

    pub fn rollback(&self, intent: FavoriteIntent) -> Settled {
        self.inner().rollback(intent.ticket)
    }

    /// Optimistic flip, server call, then commit or rollback. Returns the new liked state.
    pub async fn toggle(&self, remote: &dyn FavoriteRemote, property: &Id) -> Result<bool> {
        let intent = self.begin_toggle(property)?;
        if intent.now_liked {
            match remote.add_favorite(property).await {
                Ok(record) => {
                    self.commit(intent, Some(record.id));
                    Ok(true)
                }
                Err(e) => {
                    log::warn!("Could not like property {}: {}", property, e);
                    self.rollback(intent);
                    Err(e)
                }
            }
        } else {
            let Some(record) = intent.record_id.clone() else {
                self.rollback(intent);
                return Err(ClientError::Validation("missing favorite record".into()));
            };
            match remote.remove_favorite(&record).await {
                Ok(()) => {
                    self.commit(intent, None);
                    Ok(false)
                }
                Err(e) => {
                    log::warn!("Could not unlike property {}: {}", property, e);
                    self.rollback(intent);
                    Err(e)
                }
            }
        }
    }
}
