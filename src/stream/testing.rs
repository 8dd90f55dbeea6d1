//! In-memory backend and realtime fakes shared by the stream tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::{mpsc, Semaphore};

use super::error::StreamError;
use super::source::{
    ChannelEvent, ChannelEventKind, Cursor, EventSource, MessageSource, Page, PageQuery,
    Subscription,
};
use crate::models::{frappe_datetime, ChannelMember, ChannelMembers, Message, MessageType};

pub fn message(name: &str, creation: &str) -> Message {
    let creation = frappe_datetime::parse(creation).unwrap();
    Message {
        name: name.to_string(),
        channel_id: String::new(),
        creation,
        modified: creation,
        message_type: MessageType::Text,
        text: Some(format!("<p>{}</p>", name)),
        file: None,
        owner: "tester@example.com".to_string(),
        is_reply: false,
        linked_message: None,
        message_reactions: None,
        is_edited: false,
    }
}

/// `count` messages named `{prefix}-000`.. one minute apart from midnight of `day`.
pub fn day_messages(prefix: &str, day: &str, count: usize) -> Vec<Message> {
    let start = frappe_datetime::parse(&format!("{} 00:00:00", day)).unwrap();
    (0..count)
        .map(|i| {
            let mut msg = message(&format!("{}-{:03}", prefix, i), &format!("{} 00:00:00", day));
            msg.creation = start + Duration::minutes(i as i64);
            msg.modified = msg.creation;
            msg
        })
        .collect()
}

pub fn new_message_event(channel_id: &str, msg: Message) -> ChannelEvent {
    ChannelEvent {
        channel_id: channel_id.to_string(),
        kind: ChannelEventKind::NewMessage(msg),
    }
}

/// Backend fake holding whole channel histories.
#[derive(Default)]
pub struct MemorySource {
    channels: Mutex<HashMap<String, Vec<Message>>>,
    calls: Mutex<Vec<(String, PageQuery)>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failures: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, channel_id: &str, messages: Vec<Message>) -> Self {
        for msg in messages {
            self.push(channel_id, msg);
        }
        self
    }

    /// Add a message to the server-side history.
    pub fn push(&self, channel_id: &str, mut msg: Message) {
        msg.channel_id = channel_id.to_string();
        let mut channels = self.channels.lock().unwrap();
        let history = channels.entry(channel_id.to_string()).or_default();
        history.push(msg);
        history.sort_by(|a, b| (a.creation, &a.name).cmp(&(b.creation, &b.name)));
    }

    /// Fail the next `n` fetches.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Hold fetches for `channel_id` until `release` is called.
    pub fn gate(&self, channel_id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, channel_id: &str, fetches: usize) {
        if let Some(gate) = self.gates.lock().unwrap().get(channel_id) {
            gate.add_permits(fetches);
        }
    }

    pub fn calls(&self) -> Vec<(String, PageQuery)> {
        self.calls.lock().unwrap().clone()
    }

    fn page(&self, channel_id: &str, query: &PageQuery) -> Page {
        let channels = self.channels.lock().unwrap();
        let history = channels.get(channel_id).cloned().unwrap_or_default();
        let limit = query.limit;
        let key = |m: &Message| (m.creation, m.name.clone());

        match &query.cursor {
            Cursor::Latest => {
                let start = history.len().saturating_sub(limit);
                Page {
                    has_older: start > 0,
                    has_newer: false,
                    messages: history[start..].to_vec(),
                }
            }
            Cursor::Before(anchor) => {
                let bound = (anchor.creation, anchor.name.clone());
                let older: Vec<_> = history.iter().filter(|m| key(m) < bound).cloned().collect();
                let start = older.len().saturating_sub(limit);
                Page {
                    has_older: start > 0,
                    has_newer: true,
                    messages: older[start..].to_vec(),
                }
            }
            Cursor::After(anchor) => {
                let bound = (anchor.creation, anchor.name.clone());
                let newer: Vec<_> = history.iter().filter(|m| key(m) > bound).cloned().collect();
                Page {
                    has_older: true,
                    has_newer: newer.len() > limit,
                    messages: newer.into_iter().take(limit).collect(),
                }
            }
            Cursor::Around(id) => match history.iter().position(|m| &m.name == id) {
                Some(idx) => {
                    let start = idx.saturating_sub(limit / 2);
                    let end = (start + limit).min(history.len());
                    Page {
                        has_older: start > 0,
                        has_newer: end < history.len(),
                        messages: history[start..end].to_vec(),
                    }
                }
                None => Page::default(),
            },
        }
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn fetch_messages(
        &self,
        channel_id: &str,
        query: &PageQuery,
    ) -> Result<Page, StreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((channel_id.to_string(), query.clone()));

        let gate = self.gates.lock().unwrap().get(channel_id).cloned();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(StreamError::fetch)?;
            permit.forget();
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StreamError::Fetch("backend unavailable".into()));
        }
        Ok(self.page(channel_id, query))
    }

    async fn fetch_channel_members(&self, channel_id: &str) -> Result<ChannelMembers, StreamError> {
        let channels = self.channels.lock().unwrap();
        let mut members = ChannelMembers::new();
        for msg in channels.get(channel_id).into_iter().flatten() {
            members.entry(msg.owner.clone()).or_insert_with(|| ChannelMember {
                name: msg.owner.clone(),
                full_name: msg.owner.split('@').next().unwrap_or("").to_string(),
                user_image: None,
                is_admin: None,
            });
        }
        Ok(members)
    }
}

/// Realtime fake: tests push events into whichever channel is subscribed.
#[derive(Default)]
pub struct MemoryEvents {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<ChannelEvent>>>,
    fail_subscribe: std::sync::atomic::AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_subscriptions(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Hold subscriptions until `release` is called.
    pub fn gate(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    /// Deliver an event if its channel has a live subscriber.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.get(&event.channel_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Whether a live subscriber exists for the channel.
    pub fn is_subscribed(&self, channel_id: &str) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(channel_id)
            .map_or(false, |tx| !tx.is_closed())
    }
}

#[async_trait]
impl EventSource for MemoryEvents {
    async fn subscribe(&self, channel_id: &str) -> Result<Subscription, StreamError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(StreamError::subscription)?;
            permit.forget();
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(StreamError::Subscription("socket refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), tx);
        Ok(Subscription::new(channel_id, rx, None))
    }
}
