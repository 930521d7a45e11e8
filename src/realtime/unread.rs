use crate::realtime::collection::Reducer;
use crate::realtime::reconciler::{Reconciler, SubscriptionId};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    pub messages: usize,
    pub notifications: usize,
}

impl UnreadCounts {
    pub fn total(&self) -> usize {
        self.messages + self.notifications
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadSlot {
    Messages,
    Notifications,
}

/// Unread badges shared by the screens that are alive. Create one per session and pass it
/// to whoever needs it.
#[derive(Debug)]
pub struct UnreadStore {
    tx: watch::Sender<UnreadCounts>,
}

impl Default for UnreadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UnreadCounts::default());
        Self { tx }
    }

    pub fn counts(&self) -> UnreadCounts {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<UnreadCounts> {
        self.tx.subscribe()
    }

    pub fn set(&self, slot: UnreadSlot, value: usize) {
        self.tx.send_if_modified(|c| {
            let field = match slot {
                UnreadSlot::Messages => &mut c.messages,
                UnreadSlot::Notifications => &mut c.notifications,
            };
            if *field == value {
                false
            } else {
                *field = value;
                true
            }
        });
    }

    /// Mirrors a reconciler's aggregate into `slot` for as long as the subscription lives.
    pub fn bind<R: Reducer>(self: &Arc<Self>, source: &Reconciler<R>, slot: UnreadSlot) -> SubscriptionId {
        self.set(slot, source.aggregate());
        let store = Arc::clone(self);
        source.subscribe(move |update| store.set(slot, update.aggregate))
    }

    pub fn reset(&self) {
        self.tx.send_replace(UnreadCounts::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Id, Notification};
    use crate::realtime::connection::WsPushChannel;
    use crate::realtime::notifications::NotificationReducer;
    use crate::realtime::reconciler::SnapshotSource;
    use crate::session::StaticTokens;
    use async_trait::async_trait;

    struct Empty;

    #[async_trait]
    impl SnapshotSource<Notification> for Empty {
        async fn fetch(&self) -> crate::error::Result<Vec<Notification>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_set_only_signals_changes() {
        let store = UnreadStore::new();
        let mut rx = store.watch();
        store.set(UnreadSlot::Messages, 0);
        assert!(!rx.has_changed().unwrap());
        store.set(UnreadSlot::Messages, 3);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), UnreadCounts { messages: 3, notifications: 0 });
    }

    #[test]
    fn test_bound_reconciler_feeds_counts() {
        let store = Arc::new(UnreadStore::new());
        let rec = Reconciler::new(
            "notifications",
            NotificationReducer,
            Arc::new(Empty),
            Arc::new(WsPushChannel),
            Arc::new(StaticTokens(None)),
        );
        let sub = store.bind(&rec, UnreadSlot::Notifications);
        rec.apply_server_snapshot(vec![
            Notification { id: Id::from(1), title: None, body: String::new(), is_read: false, timestamp: "2024-01-01T00:00:00Z".parse().unwrap() },
            Notification { id: Id::from(2), title: None, body: String::new(), is_read: false, timestamp: "2024-01-01T00:00:01Z".parse().unwrap() },
        ]);
        assert_eq!(store.counts().notifications, 2);
        assert_eq!(store.counts().total(), 2);

        rec.unsubscribe(sub);
        rec.apply_server_snapshot(vec![]);
        assert_eq!(store.counts().notifications, 2);

        store.reset();
        assert_eq!(store.counts(), UnreadCounts::default());
    }
}
