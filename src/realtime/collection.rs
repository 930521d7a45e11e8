//! Keyed collection kept in sync from server snapshots, push events and local
//! optimistic mutations.
//!
//! Snapshots are authoritative: they replace the collection wholesale and the
//! aggregate is recomputed from the result, never adjusted incrementally.
//! Push events are hints merged per key, newest timestamp wins. Optimistic
//! mutations are two-phase: a [`Optimistic`] ticket is either committed or
//! rolled back, and while it is outstanding the key refuses a second mutation.
//! Server data arriving for a pending key lands underneath the mutation, and the
//! patch is re-applied on top of it.

use crate::api::events::PushFrame;
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Describes how records and events of one resource fold into keyed entries.
pub trait Reducer: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    type Entry: Clone + Debug + PartialEq + Send + Sync + 'static;
    /// Item of a poll response.
    type Record: Send + 'static;
    /// Payload of a push frame.
    type Event: Send + 'static;

    fn fold_snapshot(&self, records: Vec<Self::Record>) -> Vec<(Self::Key, Self::Entry)>;

    fn fold_event(&self, event: Self::Event) -> Option<(Self::Key, Self::Entry)>;

    fn event_from_frame(&self, frame: PushFrame) -> Option<Self::Event>;

    fn timestamp(&self, entry: &Self::Entry) -> DateTime<Utc>;

    /// Combine an existing entry with a strictly newer incoming one.
    fn merge(&self, _existing: &Self::Entry, incoming: Self::Entry) -> Self::Entry {
        incoming
    }

    /// Contribution of one entry to the collection's aggregate (e.g. unread count).
    fn weight(&self, _entry: &Self::Entry) -> usize {
        0
    }
}

/// Ticket for an in-flight optimistic mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an optimistic mutation must be committed or rolled back"]
pub struct Optimistic<K> {
    pub key: K,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Committed,
    RolledBack,
    /// The ticket no longer matches an outstanding mutation.
    Stale,
}

type Patch<E> = Box<dyn Fn(Option<&E>) -> E + Send + Sync>;

struct PendingSlot<E> {
    seq: u64,
    /// Server-side value underneath the optimistic one; restored on rollback.
    baseline: Option<E>,
    patch: Patch<E>,
}

impl<E> PendingSlot<E> {
    fn overlay(&self) -> E {
        (self.patch)(self.baseline.as_ref())
    }
}

pub struct KeyedCollection<R: Reducer> {
    reducer: R,
    entries: HashMap<R::Key, R::Entry>,
    pending: HashMap<R::Key, PendingSlot<R::Entry>>,
    next_seq: u64,
}

impl<R: Reducer> KeyedCollection<R> {
    pub fn new(reducer: R) -> Self {
        Self {
            reducer,
            entries: HashMap::new(),
            pending: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<&R::Entry> {
        self.entries.get(key)
    }

    pub fn is_pending(&self, key: &R::Key) -> bool {
        self.pending.contains_key(key)
    }

    /// Newest first; ties ordered by key.
    pub fn entries(&self) -> Vec<(R::Key, R::Entry)> {
        let mut out: Vec<(R::Key, R::Entry)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|(ka, a), (kb, b)| {
            self.reducer
                .timestamp(b)
                .cmp(&self.reducer.timestamp(a))
                .then_with(|| ka.cmp(kb))
        });
        out
    }

    pub fn aggregate(&self) -> usize {
        self.entries.values().map(|e| self.reducer.weight(e)).sum()
    }

    pub fn apply_server_snapshot(&mut self, records: Vec<R::Record>) {
        let mut fresh: HashMap<R::Key, R::Entry> =
            self.reducer.fold_snapshot(records).into_iter().collect();

        for (key, slot) in self.pending.iter_mut() {
            slot.baseline = fresh.remove(key);
            fresh.insert(key.clone(), slot.overlay());
        }
        self.entries = fresh;
    }

    /// Returns whether the visible collection changed.
    pub fn apply_push_event(&mut self, event: R::Event) -> bool {
        let Some((key, incoming)) = self.reducer.fold_event(event) else {
            return false;
        };
        if let Some(slot) = self.pending.get_mut(&key) {
            slot.baseline = merge_newer(&self.reducer, slot.baseline.take(), incoming);
            let rebased = slot.overlay();
            let changed = self.entries.get(&key) != Some(&rebased);
            self.entries.insert(key, rebased);
            return changed;
        }
        let current = self.entries.remove(&key);
        let changed = match &current {
            Some(existing) => self.reducer.timestamp(&incoming) > self.reducer.timestamp(existing),
            None => true,
        };
        if let Some(merged) = merge_newer(&self.reducer, current, incoming) {
            self.entries.insert(key, merged);
        }
        changed
    }

    pub fn apply_frame(&mut self, frame: PushFrame) -> bool {
        match self.reducer.event_from_frame(frame) {
            Some(event) => self.apply_push_event(event),
            None => false,
        }
    }

    /// Applies `patch` immediately. Fails with [`ClientError::Pending`] if `key` already has
    /// an outstanding mutation.
    ///
    /// The patch is kept until the ticket settles and re-run whenever a snapshot or push
    /// replaces the value underneath it.
    pub fn mutate_optimistic<F>(&mut self, key: R::Key, patch: F) -> Result<Optimistic<R::Key>>
    where
        F: Fn(Option<&R::Entry>) -> R::Entry + Send + Sync + 'static,
    {
        if self.pending.contains_key(&key) {
            return Err(ClientError::Pending(format!("{:?}", key)));
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = PendingSlot {
            seq,
            baseline: self.entries.get(&key).cloned(),
            patch: Box::new(patch),
        };
        self.entries.insert(key.clone(), slot.overlay());
        self.pending.insert(key.clone(), slot);
        Ok(Optimistic { key, seq })
    }

    /// Keeps the optimistic value, optionally replacing it with the server's confirmed entry.
    ///
    /// A confirmed entry older than server data that arrived while the ticket was pending
    /// loses to the patched newer value.
    pub fn commit(&mut self, ticket: Optimistic<R::Key>, confirmed: Option<R::Entry>) -> Settled {
        if !self.owns(&ticket) {
            return Settled::Stale;
        }
        let Some(slot) = self.pending.remove(&ticket.key) else {
            return Settled::Stale;
        };
        if let Some(entry) = confirmed {
            let superseded = slot
                .baseline
                .as_ref()
                .is_some_and(|b| self.reducer.timestamp(b) > self.reducer.timestamp(&entry));
            if !superseded {
                self.entries.insert(ticket.key, entry);
            }
        }
        Settled::Committed
    }

    /// Restores the value the key had underneath the mutation, including absence.
    pub fn rollback(&mut self, ticket: Optimistic<R::Key>) -> Settled {
        if !self.owns(&ticket) {
            return Settled::Stale;
        }
        let slot = match self.pending.remove(&ticket.key) {
            Some(slot) => slot,
            None => return Settled::Stale,
        };
        match slot.baseline {
            Some(prev) => {
                self.entries.insert(ticket.key, prev);
            }
            None => {
                self.entries.remove(&ticket.key);
            }
        }
        Settled::RolledBack
    }

    fn owns(&self, ticket: &Optimistic<R::Key>) -> bool {
        self.pending
            .get(&ticket.key)
            .is_some_and(|slot| slot.seq == ticket.seq)
    }
}

fn merge_newer<R: Reducer>(reducer: &R, current: Option<R::Entry>, incoming: R::Entry) -> Option<R::Entry> {
    match current {
        None => Some(incoming),
        Some(existing) => {
            if reducer.timestamp(&incoming) > reducer.timestamp(&existing) {
                Some(reducer.merge(&existing, incoming))
            } else {
                Some(existing)
            }
        }
    }
}
