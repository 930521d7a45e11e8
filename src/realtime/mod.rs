//! Polling + push reconciliation for the resources screens keep live.

pub mod collection;
pub mod connection;
pub mod favorites;
pub mod notifications;
pub mod poller;
pub mod reconciler;
pub mod threads;
pub mod unread;

pub use collection::{KeyedCollection, Optimistic, Reducer, Settled};
pub use connection::{ConnectionState, PushChannel, UrlBuilder, WsPushChannel};
pub use favorites::{FavoriteBook, FavoriteState};
pub use notifications::NotificationReducer;
pub use poller::PollSchedule;
pub use reconciler::{Reconciler, SnapshotSource, StartOutcome, SubscriptionId, Update};
pub use threads::{Thread, ThreadReducer};
pub use unread::{UnreadCounts, UnreadSlot, UnreadStore};
