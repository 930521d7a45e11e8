use crate::api::client::ApiClient;
use crate::api::events::PushFrame;
use crate::api::models::{Id, Notification};
use crate::error::{ClientError, Result};
use crate::realtime::collection::Reducer;
use crate::realtime::reconciler::Reconciler;
use chrono::{DateTime, Utc};

/// Notifications keyed by id. The aggregate is the unread notification count.
#[derive(Debug, Default)]
pub struct NotificationReducer;

impl Reducer for NotificationReducer {
    type Key = Id;
    type Entry = Notification;
    type Record = Notification;
    type Event = Notification;

    fn fold_snapshot(&self, records: Vec<Notification>) -> Vec<(Id, Notification)> {
        records.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn fold_event(&self, event: Notification) -> Option<(Id, Notification)> {
        Some((event.id.clone(), event))
    }

    fn event_from_frame(&self, frame: PushFrame) -> Option<Notification> {
        match frame {
            PushFrame::Notification(n) => Some(n),
            _ => None,
        }
    }

    fn timestamp(&self, entry: &Notification) -> DateTime<Utc> {
        entry.timestamp
    }

    fn weight(&self, entry: &Notification) -> usize {
        usize::from(!entry.is_read)
    }
}

/// Marks all unread notifications as read, one request each.
///
/// Each notification flips to read optimistically; the ones whose request failed are rolled back.
pub async fn mark_all_read(notifications: &Reconciler<NotificationReducer>, api: &ApiClient) -> Result<usize> {
    let unread: Vec<(Id, Notification)> = notifications
        .entries()
        .into_iter()
        .filter(|(_, n)| !n.is_read)
        .collect();
    if unread.is_empty() {
        return Ok(0);
    }

    let mut tickets = Vec::with_capacity(unread.len());
    for (id, n) in unread {
        let patch = move |prev: Option<&Notification>| Notification {
            is_read: true,
            ..prev.unwrap_or(&n).clone()
        };
        match notifications.mutate_optimistic(id.clone(), patch) {
            Ok(t) => tickets.push(t),
            Err(ClientError::Pending(_)) => log::debug!("Notification {} already being updated", id),
            Err(e) => return Err(e),
        }
    }

    let ids: Vec<Id> = tickets.iter().map(|t| t.key.clone()).collect();
    let results = api.mark_all_notifications_read(&ids).await;

    let mut failed = 0;
    for (ticket, res) in tickets.into_iter().zip(results) {
        match res {
            Ok(()) => {
                notifications.commit(ticket, None);
            }
            Err(e) => {
                log::warn!("Failed to mark notification {} as read: {}", ticket.key, e);
                notifications.rollback(ticket);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(ClientError::Network(format!(
            "{} of {} notifications could not be marked as read",
            failed,
            ids.len()
        )));
    }
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::collection::KeyedCollection;

    fn note(id: u64, read: bool, ts: &str) -> Notification {
        Notification {
            id: Id::from(id),
            title: None,
            body: format!("n{}", id),
            is_read: read,
            timestamp: ts.parse().unwrap(),
        }
    }

    #[test]
    fn test_count_resets_to_snapshot() {
        let mut c = KeyedCollection::new(NotificationReducer);
        c.apply_server_snapshot(vec![note(1, false, "2024-01-01T00:00:00Z"), note(2, true, "2024-01-01T00:01:00Z")]);
        assert_eq!(c.aggregate(), 1);

        c.apply_push_event(note(3, false, "2024-01-01T00:02:00Z"));
        assert_eq!(c.aggregate(), 2);

        c.apply_server_snapshot(vec![note(1, true, "2024-01-01T00:00:00Z")]);
        assert_eq!(c.aggregate(), 0);
    }

    #[test]
    fn test_read_patch_follows_newer_server_copy() {
        let mut c = KeyedCollection::new(NotificationReducer);
        c.apply_server_snapshot(vec![note(1, false, "2024-01-01T00:00:00Z")]);
        let stale = note(1, false, "2024-01-01T00:00:00Z");
        let ticket = c
            .mutate_optimistic(Id::from(1), move |prev: Option<&Notification>| Notification {
                is_read: true,
                ..prev.unwrap_or(&stale).clone()
            })
            .unwrap();

        let mut edited = note(1, false, "2024-01-01T00:05:00Z");
        edited.body = "edited".into();
        c.apply_push_event(edited);
        c.commit(ticket, None);

        let n = c.get(&Id::from(1)).unwrap();
        assert_eq!(n.body, "edited");
        assert!(n.is_read);
        assert_eq!(c.aggregate(), 0);
    }

    #[test]
    fn test_frame_filtering() {
        let r = NotificationReducer;
        let frame = PushFrame::parse(
            r#"{"notification": {"id": 1, "body": "x", "timestamp": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert!(r.event_from_frame(frame).is_some());
        let frame = PushFrame::parse(
            r#"{"message": {"sender": 1, "recipient": 2, "timestamp": "2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert!(r.event_from_frame(frame).is_none());
    }
}
