//! Sequential stream controller.
//!
//! Each operation issues at most one fetch and awaits it before returning, so
//! a caller that owns `&mut ChatStream` can never overlap two mutations. The
//! concurrent variant lives in [`super::driver`].

use std::sync::Arc;
use std::time::Instant;

use super::error::StreamError;
use super::source::{ChannelEvent, MessageSource};
use super::state::{
    EventOutcome, FetchOutcome, FetchTicket, ScrollStart, StreamSettings, StreamState,
};
use super::window::EntryKey;
use crate::models::ChannelMembers;

pub struct ChatStream<S> {
    source: Arc<S>,
    state: StreamState,
    members: Option<(String, ChannelMembers)>,
}

impl<S: MessageSource> ChatStream<S> {
    pub fn new(source: Arc<S>, settings: StreamSettings) -> Self {
        Self {
            source,
            state: StreamState::new(settings),
            members: None,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    /// Load the most recent page of `channel_id`, replacing any open stream.
    pub async fn open(&mut self, channel_id: &str) -> Result<(), StreamError> {
        if self
            .members
            .as_ref()
            .map_or(false, |(id, _)| id != channel_id)
        {
            self.members = None;
        }
        let ticket = self.state.open(channel_id);
        match self.run(ticket).await {
            FetchOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    /// Prepend the page before the oldest loaded message.
    ///
    /// Returns the entry that was first before the prepend so the view can
    /// keep it in place; `None` when there was nothing to load.
    pub async fn load_older_messages(&mut self) -> Result<Option<EntryKey>, StreamError> {
        let Some(ticket) = self.state.begin_older() else {
            return Ok(None);
        };
        match self.run(ticket).await {
            FetchOutcome::PrependedOlder { anchor, .. } => Ok(anchor),
            FetchOutcome::Failed(err) => Err(err),
            _ => Ok(None),
        }
    }

    /// Append the page after the newest loaded message.
    pub async fn load_newer_messages(&mut self) -> Result<usize, StreamError> {
        let Some(ticket) = self.state.begin_newer() else {
            return Ok(0);
        };
        match self.run(ticket).await {
            FetchOutcome::AppendedNewer { added } => Ok(added),
            FetchOutcome::Opened { count } => Ok(count),
            FetchOutcome::Failed(err) => Err(err),
            _ => Ok(0),
        }
    }

    /// Highlight a message, loading a window around it first if needed.
    pub async fn scroll_to_message(&mut self, message_id: &str) -> Result<(), StreamError> {
        match self.state.begin_scroll_to(message_id, Instant::now())? {
            ScrollStart::Loaded => Ok(()),
            ScrollStart::Fetch(ticket) => match self.run(ticket).await {
                FetchOutcome::Failed(err) => Err(err),
                _ => Ok(()),
            },
        }
    }

    /// Drop the window and reload at the live edge.
    pub async fn go_to_latest_messages(&mut self) -> Result<(), StreamError> {
        let ticket = self.state.go_to_latest()?;
        match self.run(ticket).await {
            FetchOutcome::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> EventOutcome {
        self.state.apply_event(event)
    }

    /// Members of the open channel, fetched once per channel.
    pub async fn channel_members(&mut self) -> Result<&ChannelMembers, StreamError> {
        let channel_id = self
            .state
            .channel_id()
            .ok_or(StreamError::NotOpen)?
            .to_string();
        let cached = matches!(self.members, Some((ref id, _)) if *id == channel_id);
        if !cached {
            let members = self.source.fetch_channel_members(&channel_id).await?;
            tracing::debug!("Loaded {} members for {}", members.len(), channel_id);
            self.members = Some((channel_id, members));
        }
        match self.members {
            Some((_, ref members)) => Ok(members),
            None => Err(StreamError::NotOpen),
        }
    }

    async fn run(&mut self, ticket: FetchTicket) -> FetchOutcome {
        let result = self
            .source
            .fetch_messages(&ticket.channel_id, &ticket.query)
            .await;
        self.state.apply_fetch(ticket, result, Instant::now())
    }
}
