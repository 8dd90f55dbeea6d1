//! Stream actor: one task owns the stream state and applies commands,
//! realtime events, and fetch completions one at a time.
//!
//! Fetches run concurrently (one per direction at most, enforced by the
//! state), but their results are merged back on this task, so a merge is
//! never interleaved with an event. The view talks to the task through a
//! [`StreamHandle`].

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::error::StreamError;
use super::source::{
    ChannelEvent, ChannelEventKind, EventSource, MessageSource, Page, Subscription,
};
use super::state::{
    FetchOutcome, FetchTicket, ScrollRequest, ScrollStart, StreamSettings, StreamSnapshot,
    StreamState,
};
use crate::models::ChannelMembers;

/// Commands sent from the view to the stream task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    Open(String),
    LoadOlder,
    LoadNewer,
    ScrollTo(String),
    GoToLatest,
    /// Viewer is (or is no longer) at the bottom of the window.
    SetFollowing(bool),
    Close,
}

/// One-shot notifications for the view.
#[derive(Debug, Clone)]
pub enum StreamNotice {
    Scroll(ScrollRequest),
    Error(StreamError),
    Members {
        channel_id: String,
        members: ChannelMembers,
    },
}

/// Handle for interacting with the stream task from the view side.
pub struct StreamHandle {
    cmd_tx: mpsc::UnboundedSender<StreamCommand>,
    snapshots: watch::Receiver<StreamSnapshot>,
    notices: mpsc::UnboundedReceiver<StreamNotice>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Send a command to the stream task (non-blocking).
    pub fn send(&self, cmd: StreamCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Stream task closed -- command dropped");
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait until a new snapshot is published.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.snapshots.changed().await
    }

    /// Next pending notice, if any.
    pub fn try_notice(&mut self) -> Option<StreamNotice> {
        self.notices.try_recv().ok()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a stream task.
pub fn spawn<S, E>(source: Arc<S>, events: Arc<E>, settings: StreamSettings) -> StreamHandle
where
    S: MessageSource,
    E: EventSource,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(StreamSnapshot::default());

    let driver = Driver {
        source,
        events,
        state: StreamState::new(settings),
        pending: FuturesUnordered::new(),
        subscription: None,
        notices: notice_tx,
        snapshots: snapshot_tx,
    };
    let task = tokio::spawn(driver.run(cmd_rx));

    StreamHandle {
        cmd_tx,
        snapshots: snapshot_rx,
        notices: notice_rx,
        task,
    }
}

/// Background work whose result is applied on the stream task.
enum Completion {
    Fetch(FetchTicket, Result<Page, StreamError>),
    Attached(String, Result<Subscription, StreamError>),
    Members(String, Result<ChannelMembers, StreamError>),
}

enum Step {
    Command(Option<StreamCommand>),
    Completed(Completion),
    Event(Option<ChannelEvent>),
    HighlightExpired,
}

struct Driver<S, E> {
    source: Arc<S>,
    events: Arc<E>,
    state: StreamState,
    pending: FuturesUnordered<BoxFuture<'static, Completion>>,
    subscription: Option<Subscription>,
    notices: mpsc::UnboundedSender<StreamNotice>,
    snapshots: watch::Sender<StreamSnapshot>,
}

impl<S: MessageSource, E: EventSource> Driver<S, E> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<StreamCommand>) {
        loop {
            let deadline = self.state.highlight_deadline();
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                Some(done) = self.pending.next(), if !self.pending.is_empty() => Step::Completed(done),
                event = next_event(&mut self.subscription) => Step::Event(event),
                _ = sleep_until(deadline) => Step::HighlightExpired,
            };

            match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd),
                Step::Command(None) => break,
                Step::Completed(done) => self.complete(done),
                Step::Event(Some(event)) if event.kind == ChannelEventKind::Resumed => {
                    tracing::info!("Live updates resumed; fetching missed messages");
                    self.catch_up();
                }
                Step::Event(Some(event)) => {
                    let outcome = self.state.apply_event(event);
                    tracing::trace!("Realtime event: {:?}", outcome);
                }
                Step::Event(None) => {
                    tracing::warn!("Realtime subscription closed");
                    self.subscription = None;
                    self.state.record_subscription_error(StreamError::Subscription(
                        "connection closed".into(),
                    ));
                }
                Step::HighlightExpired => {
                    self.state.expire_highlight(Instant::now());
                }
            }

            if let Some(req) = self.state.take_scroll_request() {
                self.notify(StreamNotice::Scroll(req));
            }
            self.snapshots.send_replace(self.state.snapshot());
        }
        tracing::debug!("Stream task exiting");
    }

    fn handle_command(&mut self, cmd: StreamCommand) {
        tracing::debug!("Stream command: {:?}", cmd);
        match cmd {
            StreamCommand::Open(channel_id) => {
                // Release the previous channel's feed before anything else.
                self.subscription = None;
                let ticket = self.state.open(&channel_id);
                self.spawn_fetch(ticket);
                if self.state.settings().realtime {
                    self.spawn_attach(channel_id.clone());
                }
                self.spawn_members(channel_id);
            }
            StreamCommand::LoadOlder => {
                if let Some(ticket) = self.state.begin_older() {
                    self.spawn_fetch(ticket);
                }
            }
            StreamCommand::LoadNewer => {
                if let Some(ticket) = self.state.begin_newer() {
                    self.spawn_fetch(ticket);
                }
            }
            StreamCommand::ScrollTo(message_id) => {
                match self.state.begin_scroll_to(&message_id, Instant::now()) {
                    Ok(ScrollStart::Loaded) => {}
                    Ok(ScrollStart::Fetch(ticket)) => self.spawn_fetch(ticket),
                    Err(err) => self.notify(StreamNotice::Error(err)),
                }
            }
            StreamCommand::GoToLatest => match self.state.go_to_latest() {
                Ok(ticket) => self.spawn_fetch(ticket),
                Err(err) => self.notify(StreamNotice::Error(err)),
            },
            StreamCommand::SetFollowing(following) => self.state.set_following(following),
            StreamCommand::Close => {
                self.subscription = None;
                self.state.close();
            }
        }
    }

    fn complete(&mut self, done: Completion) {
        match done {
            Completion::Fetch(ticket, result) => {
                match self.state.apply_fetch(ticket, result, Instant::now()) {
                    FetchOutcome::Failed(err) => self.notify(StreamNotice::Error(err)),
                    outcome => tracing::debug!("Fetch applied: {:?}", outcome),
                }
            }
            Completion::Attached(channel_id, result) => {
                if self.state.channel_id() != Some(channel_id.as_str()) {
                    // Dropping the stale subscription releases it.
                    return;
                }
                match result {
                    Ok(sub) => {
                        tracing::info!("Live updates attached for {}", channel_id);
                        self.state.clear_subscription_error();
                        self.subscription = Some(sub);
                        self.catch_up();
                    }
                    Err(err) => {
                        self.state.record_subscription_error(err.clone());
                        self.notify(StreamNotice::Error(err));
                    }
                }
            }
            Completion::Members(channel_id, result) => {
                if self.state.channel_id() != Some(channel_id.as_str()) {
                    return;
                }
                match result {
                    Ok(members) => self.notify(StreamNotice::Members {
                        channel_id,
                        members,
                    }),
                    Err(err) => tracing::warn!("Could not load members: {}", err),
                }
            }
        }
    }

    /// Messages posted before the feed attached never arrive as events.
    fn catch_up(&mut self) {
        if let Some(ticket) = self.state.begin_catch_up() {
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        let source = Arc::clone(&self.source);
        self.pending.push(Box::pin(async move {
            let result = source
                .fetch_messages(&ticket.channel_id, &ticket.query)
                .await;
            Completion::Fetch(ticket, result)
        }));
    }

    fn spawn_attach(&mut self, channel_id: String) {
        let events = Arc::clone(&self.events);
        self.pending.push(Box::pin(async move {
            let result = events.subscribe(&channel_id).await;
            Completion::Attached(channel_id, result)
        }));
    }

    fn spawn_members(&mut self, channel_id: String) {
        let source = Arc::clone(&self.source);
        self.pending.push(Box::pin(async move {
            let result = source.fetch_channel_members(&channel_id).await;
            Completion::Members(channel_id, result)
        }));
    }

    fn notify(&self, notice: StreamNotice) {
        // The view may have gone away; nothing to do then.
        let _ = self.notices.send(notice);
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}
