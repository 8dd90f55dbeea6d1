//! Stream state reducer.
//!
//! Every transition of a channel's stream happens here, synchronously:
//! operations hand out a [`FetchTicket`], the caller performs the fetch, and
//! the result is fed back through [`StreamState::apply_fetch`]. Tickets carry
//! the epoch they were issued in; a channel switch or window replacement
//! bumps the epoch so late results are discarded instead of merged.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::StreamError;
use super::source::{Anchor, ChannelEvent, ChannelEventKind, Cursor, Page, PageQuery};
use super::window::{EntryKey, MessageWindow, StreamEntry};

/// Tunables for a stream, stored in the `[stream]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Messages per page.
    pub page_limit: usize,
    /// How long a jumped-to message stays highlighted.
    pub highlight_ms: u64,
    /// Subscribe to live events when a channel opens.
    pub realtime: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            page_limit: 50,
            highlight_ms: 3000,
            realtime: true,
        }
    }
}

impl StreamSettings {
    pub fn highlight_duration(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }
}

/// What a fetch is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// Window at the live edge (open / jump to latest).
    Initial,
    Older,
    Newer,
    /// Window centered on a message that was not loaded.
    Around(String),
}

/// A fetch the caller must perform and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub channel_id: String,
    pub epoch: u64,
    pub kind: FetchKind,
    pub query: PageQuery,
}

/// Result of applying a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Superseded by a channel switch or window replacement.
    Discarded,
    Failed(StreamError),
    Opened { count: usize },
    /// `anchor` is the previously-first message; the view re-anchors on it.
    PrependedOlder { anchor: Option<EntryKey>, added: usize },
    AppendedNewer { added: usize },
    Centered { message_id: String },
}

/// Result of applying a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored,
    /// Held until the pending newer/window fetch resolves.
    Queued,
    Appended,
    /// Viewer is away from the live edge; only the flag changed.
    FlaggedNew,
    Updated,
    Removed,
}

/// Scroll instruction for the view. The stream never scrolls by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollRequest {
    Bottom,
    /// Keep this entry where it was after content was prepended above it.
    Anchor(EntryKey),
    /// Bring this message into view (it is highlighted).
    Reveal(String),
}

/// Outcome of starting a scroll-to-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollStart {
    /// Already loaded: highlighted and a reveal request is pending.
    Loaded,
    Fetch(FetchTicket),
}

#[derive(Debug, Clone)]
struct Highlight {
    message_id: String,
    until: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct Loading {
    window: bool,
    older: bool,
    newer: bool,
}

/// Read-only view of the stream for rendering.
#[derive(Debug, Clone, Default)]
pub struct StreamSnapshot {
    pub channel_id: Option<String>,
    pub entries: Arc<Vec<StreamEntry>>,
    pub has_older_messages: bool,
    pub has_new_messages: bool,
    pub is_loading: bool,
    pub loading_older: bool,
    pub loading_newer: bool,
    pub highlighted: Option<String>,
    pub error: Option<StreamError>,
    /// Set while live updates are unavailable.
    pub subscription_error: Option<StreamError>,
}

/// Per-channel stream state.
#[derive(Debug)]
pub struct StreamState {
    settings: StreamSettings,
    channel_id: Option<String>,
    epoch: u64,
    window: MessageWindow,
    entries: Arc<Vec<StreamEntry>>,
    has_older_messages: bool,
    has_new_messages: bool,
    loading: Loading,
    highlight: Option<Highlight>,
    scroll_request: Option<ScrollRequest>,
    following: bool,
    error: Option<StreamError>,
    subscription_error: Option<StreamError>,
    queued: VecDeque<ChannelEvent>,
}

impl StreamState {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            channel_id: None,
            epoch: 0,
            window: MessageWindow::new(),
            entries: Arc::new(Vec::new()),
            has_older_messages: false,
            has_new_messages: false,
            loading: Loading::default(),
            highlight: None,
            scroll_request: None,
            following: true,
            error: None,
            subscription_error: None,
            queued: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    pub fn has_older_messages(&self) -> bool {
        self.has_older_messages
    }

    pub fn has_new_messages(&self) -> bool {
        self.has_new_messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading.window
    }

    pub fn loading_older(&self) -> bool {
        self.loading.older
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub fn highlighted(&self) -> Option<&str> {
        self.highlight.as_ref().map(|h| h.message_id.as_str())
    }

    pub fn highlight_deadline(&self) -> Option<Instant> {
        self.highlight.as_ref().map(|h| h.until)
    }

    /// Viewer reports whether it sits at the bottom of the loaded window.
    pub fn set_following(&mut self, following: bool) {
        self.following = following;
    }

    pub fn take_scroll_request(&mut self) -> Option<ScrollRequest> {
        self.scroll_request.take()
    }

    /// Live updates failed or dropped. Reads keep working.
    pub fn record_subscription_error(&mut self, err: StreamError) {
        tracing::warn!("Realtime degraded: {}", err);
        self.subscription_error = Some(err);
    }

    /// Live updates (re)attached.
    pub fn clear_subscription_error(&mut self) {
        self.subscription_error = None;
    }

    /// Start a fresh stream for `channel_id`, dropping all previous state.
    pub fn open(&mut self, channel_id: &str) -> FetchTicket {
        self.reset();
        self.channel_id = Some(channel_id.to_string());
        tracing::debug!("Opening stream for {}", channel_id);
        self.start_window_fetch(FetchKind::Initial, Cursor::Latest)
    }

    /// Tear down: forget the channel and invalidate in-flight fetches.
    pub fn close(&mut self) {
        self.reset();
        self.channel_id = None;
        self.epoch += 1;
    }

    /// Ticket for the page before the oldest loaded message, if one may exist.
    pub fn begin_older(&mut self) -> Option<FetchTicket> {
        let channel_id = self.channel_id.clone()?;
        if self.loading.window || self.loading.older || !self.has_older_messages {
            return None;
        }
        let anchor = Anchor::from(self.window.oldest()?);
        self.loading.older = true;
        Some(FetchTicket {
            channel_id,
            epoch: self.epoch,
            kind: FetchKind::Older,
            query: PageQuery {
                cursor: Cursor::Before(anchor),
                limit: self.settings.page_limit,
            },
        })
    }

    /// Ticket for the page after the newest loaded message, if flagged.
    pub fn begin_newer(&mut self) -> Option<FetchTicket> {
        let channel_id = self.channel_id.clone()?;
        if self.loading.window || self.loading.newer || !self.has_new_messages {
            return None;
        }
        let Some(newest) = self.window.newest() else {
            return Some(self.start_window_fetch(FetchKind::Initial, Cursor::Latest));
        };
        let anchor = Anchor::from(newest);
        self.loading.newer = true;
        Some(FetchTicket {
            channel_id,
            epoch: self.epoch,
            kind: FetchKind::Newer,
            query: PageQuery {
                cursor: Cursor::After(anchor),
                limit: self.settings.page_limit,
            },
        })
    }

    /// Live feed (re)attached: fetch whatever was posted while it was down.
    ///
    /// `None` when there is no loaded window to extend or a window fetch is
    /// already pending (its page covers the gap).
    pub fn begin_catch_up(&mut self) -> Option<FetchTicket> {
        if self.loading.window || self.window.is_empty() {
            return None;
        }
        self.has_new_messages = true;
        self.begin_newer()
    }

    /// Highlight a loaded message, or issue a ticket for a window around it.
    pub fn begin_scroll_to(
        &mut self,
        message_id: &str,
        now: Instant,
    ) -> Result<ScrollStart, StreamError> {
        if self.channel_id.is_none() {
            return Err(StreamError::NotOpen);
        }
        if self.window.contains(message_id) {
            self.reveal(message_id, now);
            return Ok(ScrollStart::Loaded);
        }
        self.highlight = None;
        Ok(ScrollStart::Fetch(self.start_window_fetch(
            FetchKind::Around(message_id.to_string()),
            Cursor::Around(message_id.to_string()),
        )))
    }

    /// Discard the window and reload at the live edge.
    pub fn go_to_latest(&mut self) -> Result<FetchTicket, StreamError> {
        if self.channel_id.is_none() {
            return Err(StreamError::NotOpen);
        }
        self.window.clear();
        self.has_new_messages = false;
        self.has_older_messages = false;
        self.highlight = None;
        self.following = true;
        self.refresh_entries();
        Ok(self.start_window_fetch(FetchKind::Initial, Cursor::Latest))
    }

    /// Merge a fetch result. Stale tickets change nothing.
    pub fn apply_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Page, StreamError>,
        now: Instant,
    ) -> FetchOutcome {
        if !self.is_current(&ticket) {
            tracing::debug!(
                "Discarding stale {:?} page for {} (epoch {} != {})",
                ticket.kind,
                ticket.channel_id,
                ticket.epoch,
                self.epoch
            );
            return FetchOutcome::Discarded;
        }

        let limit = ticket.query.limit;
        let outcome = match result {
            Err(err) => self.fail(&ticket.kind, err),
            Ok(page) => match ticket.kind {
                FetchKind::Initial => {
                    self.loading.window = false;
                    self.has_older_messages = page.is_full(limit);
                    self.has_new_messages = false;
                    self.window = MessageWindow::from_messages(page.messages);
                    self.error = None;
                    self.scroll_request = Some(ScrollRequest::Bottom);
                    FetchOutcome::Opened {
                        count: self.window.len(),
                    }
                }
                FetchKind::Older => {
                    self.loading.older = false;
                    let anchor = self
                        .window
                        .oldest()
                        .map(|m| EntryKey::Message(m.name.clone()));
                    self.has_older_messages = page.is_full(limit);
                    let added = self.window.extend(page.messages);
                    self.error = None;
                    if let Some(ref key) = anchor {
                        self.following = false;
                        self.scroll_request = Some(ScrollRequest::Anchor(key.clone()));
                    }
                    FetchOutcome::PrependedOlder { anchor, added }
                }
                FetchKind::Newer => {
                    self.loading.newer = false;
                    self.has_new_messages = page.is_full(limit);
                    let added = self.window.extend(page.messages);
                    self.error = None;
                    FetchOutcome::AppendedNewer { added }
                }
                FetchKind::Around(message_id) => {
                    self.loading.window = false;
                    self.has_older_messages = page.has_older;
                    self.has_new_messages = page.has_newer;
                    self.window = MessageWindow::from_messages(page.messages);
                    if self.window.contains(&message_id) {
                        self.error = None;
                        self.reveal(&message_id, now);
                        FetchOutcome::Centered { message_id }
                    } else {
                        let err = StreamError::MessageNotFound(message_id);
                        self.error = Some(err.clone());
                        FetchOutcome::Failed(err)
                    }
                }
            },
        };

        self.refresh_entries();
        self.replay_queued();
        outcome
    }

    /// Apply a realtime event, or queue it behind a pending newer/window fetch.
    pub fn apply_event(&mut self, event: ChannelEvent) -> EventOutcome {
        if self.channel_id.as_deref() != Some(event.channel_id.as_str()) {
            tracing::debug!("Ignoring event for inactive channel {}", event.channel_id);
            return EventOutcome::Ignored;
        }
        if self.blocks_events() {
            self.queued.push_back(event);
            return EventOutcome::Queued;
        }
        let outcome = self.reduce_event(event);
        if matches!(
            outcome,
            EventOutcome::Appended | EventOutcome::Updated | EventOutcome::Removed
        ) {
            self.refresh_entries();
        }
        outcome
    }

    /// Drop the highlight once its time is up. Returns whether it changed.
    pub fn expire_highlight(&mut self, now: Instant) -> bool {
        match self.highlight {
            Some(ref h) if h.until <= now => {
                self.highlight = None;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            channel_id: self.channel_id.clone(),
            entries: Arc::clone(&self.entries),
            has_older_messages: self.has_older_messages,
            has_new_messages: self.has_new_messages,
            is_loading: self.loading.window,
            loading_older: self.loading.older,
            loading_newer: self.loading.newer,
            highlighted: self.highlighted().map(String::from),
            error: self.error.clone(),
            subscription_error: self.subscription_error.clone(),
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.entries = Arc::new(Vec::new());
        self.has_older_messages = false;
        self.has_new_messages = false;
        self.loading = Loading::default();
        self.highlight = None;
        self.scroll_request = None;
        self.following = true;
        self.error = None;
        self.subscription_error = None;
        self.queued.clear();
    }

    fn start_window_fetch(&mut self, kind: FetchKind, cursor: Cursor) -> FetchTicket {
        self.epoch += 1;
        self.loading = Loading {
            window: true,
            older: false,
            newer: false,
        };
        self.queued.clear();
        FetchTicket {
            channel_id: self.channel_id.clone().unwrap_or_default(),
            epoch: self.epoch,
            kind,
            query: PageQuery {
                cursor,
                limit: self.settings.page_limit,
            },
        }
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        if ticket.epoch != self.epoch || self.channel_id.as_deref() != Some(&ticket.channel_id) {
            return false;
        }
        match ticket.kind {
            FetchKind::Older => self.loading.older,
            FetchKind::Newer => self.loading.newer,
            FetchKind::Initial | FetchKind::Around(_) => self.loading.window,
        }
    }

    fn fail(&mut self, kind: &FetchKind, err: StreamError) -> FetchOutcome {
        tracing::warn!("{:?} fetch failed: {}", kind, err);
        match kind {
            FetchKind::Older => self.loading.older = false,
            FetchKind::Newer => self.loading.newer = false,
            FetchKind::Initial => {
                self.loading.window = false;
                // The retry reloads the live edge, which already holds these.
                self.queued.clear();
            }
            FetchKind::Around(_) => self.loading.window = false,
        }
        self.error = Some(err.clone());
        FetchOutcome::Failed(err)
    }

    fn blocks_events(&self) -> bool {
        self.loading.window || self.loading.newer
    }

    fn at_live_edge(&self) -> bool {
        !self.has_new_messages && self.following
    }

    fn reveal(&mut self, message_id: &str, now: Instant) {
        self.highlight = Some(Highlight {
            message_id: message_id.to_string(),
            until: now + self.settings.highlight_duration(),
        });
        // The view leaves the bottom to show the message.
        self.following = false;
        self.scroll_request = Some(ScrollRequest::Reveal(message_id.to_string()));
    }

    fn reduce_event(&mut self, event: ChannelEvent) -> EventOutcome {
        match event.kind {
            ChannelEventKind::NewMessage(msg) => {
                if self.window.contains(&msg.name) {
                    self.window.insert(msg);
                    EventOutcome::Updated
                } else if self.at_live_edge() {
                    self.window.insert(msg);
                    self.scroll_request = Some(ScrollRequest::Bottom);
                    EventOutcome::Appended
                } else {
                    self.has_new_messages = true;
                    EventOutcome::FlaggedNew
                }
            }
            ChannelEventKind::UpdateMessage(msg) => {
                if self.window.replace_if_loaded(msg) {
                    EventOutcome::Updated
                } else {
                    EventOutcome::Ignored
                }
            }
            ChannelEventKind::DeleteMessage { name } => {
                if self.window.remove(&name).is_none() {
                    return EventOutcome::Ignored;
                }
                if self.highlighted() == Some(name.as_str()) {
                    self.highlight = None;
                }
                EventOutcome::Removed
            }
            ChannelEventKind::Resumed => {
                if self.window.is_empty() {
                    return EventOutcome::Ignored;
                }
                self.has_new_messages = true;
                EventOutcome::FlaggedNew
            }
            ChannelEventKind::Reactions { name, reactions } => {
                if self
                    .window
                    .modify(&name, |m| m.message_reactions = Some(reactions))
                {
                    EventOutcome::Updated
                } else {
                    EventOutcome::Ignored
                }
            }
        }
    }

    fn replay_queued(&mut self) {
        let mut changed = false;
        while !self.blocks_events() {
            let Some(event) = self.queued.pop_front() else {
                break;
            };
            let outcome = self.reduce_event(event);
            changed |= matches!(
                outcome,
                EventOutcome::Appended | EventOutcome::Updated | EventOutcome::Removed
            );
        }
        if changed {
            self.refresh_entries();
        }
    }

    fn refresh_entries(&mut self) {
        self.entries = Arc::new(self.window.entries());
    }
}
