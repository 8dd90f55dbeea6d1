//! Contracts the stream consumes: paged message fetches and realtime events.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::StreamError;
use crate::models::{ChannelMembers, Message};

/// Boundary message a directional page is fetched from (exclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub name: String,
    pub creation: NaiveDateTime,
}

impl From<&Message> for Anchor {
    fn from(msg: &Message) -> Self {
        Self {
            name: msg.name.clone(),
            creation: msg.creation,
        }
    }
}

/// Where a page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Most recent messages (the live edge).
    Latest,
    /// Messages created strictly before the anchor.
    Before(Anchor),
    /// Messages created strictly after the anchor.
    After(Anchor),
    /// A window centered on the given message id.
    Around(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub cursor: Cursor,
    pub limit: usize,
}

/// One page of messages. Order is not significant; the window sorts.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Backend's view of older content beyond this page (used for `Around`).
    pub has_older: bool,
    /// Backend's view of newer content beyond this page (used for `Around`).
    pub has_newer: bool,
}

impl Page {
    pub fn is_full(&self, limit: usize) -> bool {
        limit > 0 && self.messages.len() >= limit
    }
}

/// Backend message API.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    async fn fetch_messages(&self, channel_id: &str, query: &PageQuery)
        -> Result<Page, StreamError>;

    async fn fetch_channel_members(&self, channel_id: &str) -> Result<ChannelMembers, StreamError>;
}

/// What happened to a message in a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    NewMessage(Message),
    UpdateMessage(Message),
    DeleteMessage { name: String },
    /// Reaction summary changed; raw JSON as stored on the message.
    Reactions { name: String, reactions: String },
    /// Feed reconnected after a drop; events in between were not delivered.
    Resumed,
}

/// Realtime event scoped to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel_id: String,
    pub kind: ChannelEventKind,
}

/// Live event feed for one channel. Dropping it releases the connection.
#[derive(Debug)]
pub struct Subscription {
    channel_id: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        channel_id: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            events,
            task,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Next event, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!("Releasing realtime subscription for {}", self.channel_id);
            task.abort();
        }
    }
}

/// Realtime event provider.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn subscribe(&self, channel_id: &str) -> Result<Subscription, StreamError>;
}
