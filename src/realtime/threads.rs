//! Conversation threads derived from the flat message list, one per counterpart.

use crate::api::client::ApiClient;
use crate::api::events::PushFrame;
use crate::api::models::{Id, Message, UserId};
use crate::error::{ClientError, Result};
use crate::realtime::collection::Reducer;
use crate::realtime::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub counterpart: UserId,
    pub counterpart_name: String,
    pub avatar: Option<String>,
    pub preview: String,
    pub last_timestamp: DateTime<Utc>,
    pub last_message_id: Option<Id>,
    /// Messages received by the viewer from this counterpart and not yet read.
    pub unread_count: usize,
}

impl Thread {
    pub fn is_unread(&self) -> bool {
        self.unread_count > 0
    }
}

pub struct ThreadReducer {
    viewer: UserId,
}

impl ThreadReducer {
    pub fn new(viewer: UserId) -> Self {
        Self { viewer }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    fn counterpart_of<'a>(&self, m: &'a Message) -> &'a UserId {
        if m.sender == self.viewer { &m.recipient } else { &m.sender }
    }

    fn is_unread_for_viewer(&self, m: &Message) -> bool {
        m.recipient == self.viewer && m.sender != self.viewer && !m.is_read
    }

    fn thread_from(&self, m: &Message, unread_count: usize) -> Thread {
        let incoming = m.sender != self.viewer;
        let (name, avatar) = if incoming {
            (m.sender_name.clone(), m.sender_avatar.clone())
        } else {
            (m.recipient_name.clone(), m.recipient_avatar.clone())
        };
        let counterpart = self.counterpart_of(m).clone();
        Thread {
            counterpart_name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| counterpart.to_string()),
            counterpart,
            avatar,
            preview: preview(&m.content),
            last_timestamp: m.timestamp,
            last_message_id: m.id.clone(),
            unread_count,
        }
    }

    /// Ids of unread messages the viewer received from `counterpart`.
    pub fn unread_ids_from(&self, messages: &[Message], counterpart: &UserId) -> Vec<Id> {
        messages
            .iter()
            .filter(|m| &m.sender == counterpart && self.is_unread_for_viewer(m))
            .filter_map(|m| m.id.clone())
            .collect()
    }
}

fn preview(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut.trim_end())
}

impl Reducer for ThreadReducer {
    type Key = UserId;
    type Entry = Thread;
    type Record = Message;
    type Event = Message;

    fn fold_snapshot(&self, records: Vec<Message>) -> Vec<(UserId, Thread)> {
        let mut latest: HashMap<UserId, &Message> = HashMap::new();
        let mut unread: HashMap<UserId, usize> = HashMap::new();
        for m in &records {
            let key = self.counterpart_of(m).clone();
            if self.is_unread_for_viewer(m) {
                *unread.entry(key.clone()).or_default() += 1;
            }
            match latest.get(&key) {
                Some(cur) if cur.timestamp >= m.timestamp => {}
                _ => {
                    latest.insert(key, m);
                }
            }
        }
        latest
            .into_iter()
            .map(|(key, m)| {
                let count = unread.get(&key).copied().unwrap_or(0);
                (key, self.thread_from(m, count))
            })
            .collect()
    }

    fn fold_event(&self, event: Message) -> Option<(UserId, Thread)> {
        if event.sender != self.viewer && event.recipient != self.viewer {
            log::debug!("Ignoring message not addressed to viewer {}", self.viewer);
            return None;
        }
        let unread = usize::from(self.is_unread_for_viewer(&event));
        let key = self.counterpart_of(&event).clone();
        Some((key, self.thread_from(&event, unread)))
    }

    fn event_from_frame(&self, frame: PushFrame) -> Option<Message> {
        match frame {
            PushFrame::Message(m) => Some(m),
            _ => None,
        }
    }

    fn timestamp(&self, entry: &Thread) -> DateTime<Utc> {
        entry.last_timestamp
    }

    fn merge(&self, existing: &Thread, incoming: Thread) -> Thread {
        let keep_name = incoming.counterpart_name == incoming.counterpart.as_str();
        Thread {
            counterpart_name: if keep_name {
                existing.counterpart_name.clone()
            } else {
                incoming.counterpart_name
            },
            avatar: incoming.avatar.or_else(|| existing.avatar.clone()),
            unread_count: existing.unread_count + incoming.unread_count,
            ..incoming
        }
    }

    fn weight(&self, entry: &Thread) -> usize {
        entry.unread_count
    }
}

/// Marks every unread message from `counterpart` as read.
///
/// The thread's unread count drops by the number of marked messages immediately and is
/// restored if any PATCH fails. Without a local thread only the requests are sent.
pub async fn mark_thread_read(
    threads: &Reconciler<ThreadReducer>,
    api: &ApiClient,
    counterpart: &UserId,
) -> Result<usize> {
    let messages = api.list_messages().await?;
    let ids = threads.with_reducer(|r| r.unread_ids_from(&messages, counterpart));
    if ids.is_empty() {
        return Ok(0);
    }

    let Some(current) = threads.get(counterpart) else {
        log::debug!("No thread with {} yet, marking messages without a preview update", counterpart);
        let failed = api.mark_messages_read(&ids).await;
        return read_outcome(failed, ids.len());
    };

    let marked = ids.len();
    let ticket = threads.mutate_optimistic(counterpart.clone(), move |prev| {
        without_unread(prev.unwrap_or(&current), marked)
    })?;

    let failed = api.mark_messages_read(&ids).await;
    if failed > 0 {
        threads.rollback(ticket);
    } else {
        threads.commit(ticket, None);
    }
    read_outcome(failed, ids.len())
}

/// `thread` with `marked` fewer unread messages. Messages that arrived later stay unread.
fn without_unread(thread: &Thread, marked: usize) -> Thread {
    Thread {
        unread_count: thread.unread_count.saturating_sub(marked),
        ..thread.clone()
    }
}

fn read_outcome(failed: usize, total: usize) -> Result<usize> {
    if failed > 0 {
        return Err(ClientError::Network(format!(
            "{} of {} messages could not be marked as read",
            failed, total
        )));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::collection::KeyedCollection;

    fn msg(id: u64, from: &str, to: &str, content: &str, ts: &str, read: bool) -> Message {
        Message {
            id: Some(Id::from(id)),
            sender: Id::from(from),
            recipient: Id::from(to),
            content: content.into(),
            timestamp: ts.parse().unwrap(),
            is_read: read,
            sender_name: Some(format!("User {}", from)),
            recipient_name: Some(format!("User {}", to)),
            sender_avatar: None,
            recipient_avatar: None,
            property: None,
        }
    }

    fn reducer() -> ThreadReducer {
        ThreadReducer::new(Id::from("me"))
    }

    #[test]
    fn test_one_thread_per_counterpart_latest_wins() {
        let mut c = KeyedCollection::new(reducer());
        c.apply_server_snapshot(vec![
            msg(1, "alice", "me", "hi", "2024-01-01T10:00:00Z", true),
            msg(2, "me", "alice", "hello back", "2024-01-01T11:00:00Z", false),
            msg(3, "bob", "me", "is it available?", "2024-01-01T09:00:00Z", false),
        ]);
        assert_eq!(c.len(), 2);
        let alice = c.get(&Id::from("alice")).unwrap();
        assert_eq!(alice.preview, "hello back");
        assert_eq!(alice.counterpart_name, "User alice");
        // Our own outgoing message never counts as unread.
        assert_eq!(alice.unread_count, 0);
        assert!(c.get(&Id::from("bob")).unwrap().is_unread());
        assert_eq!(c.aggregate(), 1);
    }

    #[test]
    fn test_unread_counts_only_incoming() {
        let r = reducer();
        let mut c = KeyedCollection::new(ThreadReducer::new(r.viewer().clone()));
        c.apply_server_snapshot(vec![
            msg(1, "bob", "me", "a", "2024-01-01T09:00:00Z", false),
            msg(2, "bob", "me", "b", "2024-01-01T09:01:00Z", false),
            msg(3, "me", "bob", "c", "2024-01-01T09:02:00Z", false),
        ]);
        assert_eq!(c.get(&Id::from("bob")).unwrap().unread_count, 2);
    }

    #[test]
    fn test_push_merge_accumulates_unread() {
        let mut c = KeyedCollection::new(reducer());
        c.apply_server_snapshot(vec![msg(1, "bob", "me", "a", "2024-01-01T09:00:00Z", false)]);
        c.apply_push_event(msg(2, "bob", "me", "b", "2024-01-01T09:05:00Z", false));
        let bob = c.get(&Id::from("bob")).unwrap();
        assert_eq!(bob.unread_count, 2);
        assert_eq!(bob.preview, "b");

        // Re-delivery of the same event changes nothing.
        c.apply_push_event(msg(2, "bob", "me", "b", "2024-01-01T09:05:00Z", false));
        assert_eq!(c.aggregate(), 2);
    }

    #[test]
    fn test_push_for_other_users_ignored() {
        let r = reducer();
        assert!(r.fold_event(msg(1, "x", "y", "z", "2024-01-01T09:00:00Z", false)).is_none());
    }

    #[test]
    fn test_name_fallback_and_preview_truncation() {
        let r = reducer();
        let mut m = msg(1, "carol", "me", &"x".repeat(200), "2024-01-01T09:00:00Z", true);
        m.sender_name = None;
        let (_, t) = r.fold_event(m).unwrap();
        assert_eq!(t.counterpart_name, "carol");
        assert_eq!(t.preview.chars().count(), PREVIEW_CHARS + 1);
    }

    #[test]
    fn test_unread_ids_from_counterpart() {
        let r = reducer();
        let list = vec![
            msg(1, "bob", "me", "a", "2024-01-01T09:00:00Z", false),
            msg(2, "bob", "me", "b", "2024-01-01T09:01:00Z", true),
            msg(3, "alice", "me", "c", "2024-01-01T09:02:00Z", false),
        ];
        assert_eq!(r.unread_ids_from(&list, &Id::from("bob")), vec![Id::from(1)]);
    }

    #[test]
    fn test_newer_message_while_marking_read_keeps_preview() {
        let mut c = KeyedCollection::new(reducer());
        c.apply_server_snapshot(vec![msg(1, "bob", "me", "old", "2024-01-01T09:00:00Z", false)]);
        let current = c.get(&Id::from("bob")).unwrap().clone();
        let ticket = c
            .mutate_optimistic(Id::from("bob"), move |prev| without_unread(prev.unwrap_or(&current), 1))
            .unwrap();
        assert_eq!(c.aggregate(), 0);

        c.apply_push_event(msg(2, "bob", "me", "NEW", "2024-01-01T10:00:00Z", false));
        c.commit(ticket, None);

        let bob = c.get(&Id::from("bob")).unwrap();
        assert_eq!(bob.preview, "NEW");
        assert_eq!(bob.last_message_id, Some(Id::from(2)));
        // Only the message read before it arrived is cleared.
        assert_eq!(bob.unread_count, 1);
    }

    #[test]
    fn test_read_outcome_reports_partial_failure() {
        assert_eq!(read_outcome(0, 3).unwrap(), 3);
        assert!(matches!(read_outcome(1, 3), Err(ClientError::Network(_))));
    }
}
