//! TUI application state and main event loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::{FutureExt, StreamExt};
use ratatui::DefaultTerminal;

use super::messages::MessagesView;
use super::ui;
use crate::api::client::RavenClient;
use crate::api::{self, HttpMessageSource};
use crate::config::Config;
use crate::models::ChannelMembers;
use crate::realtime::SocketEventSource;
use crate::stream::{
    self, StreamCommand, StreamError, StreamHandle, StreamNotice, StreamSnapshot,
};

/// Application state
pub struct App {
    /// Whether the app should exit
    pub should_exit: bool,
    pub channel_id: String,
    /// Header label (`#name` or DM peer)
    pub channel_label: String,
    pub user_name: String,
    /// Live updates requested for this session
    pub realtime: bool,
    /// Last published stream state
    pub snapshot: StreamSnapshot,
    pub members: ChannelMembers,
    pub view: MessagesView,
    pub status_message: Option<String>,
    pub status_is_error: bool,
    /// Last fetch-issuing command, replayed by `r`.
    last_fetch: Option<StreamCommand>,
}

impl App {
    pub fn new(
        channel_id: String,
        channel_label: String,
        user_name: String,
        realtime: bool,
    ) -> Self {
        Self {
            should_exit: false,
            channel_id,
            channel_label,
            user_name,
            realtime,
            snapshot: StreamSnapshot::default(),
            members: ChannelMembers::new(),
            view: MessagesView::new(),
            status_message: None,
            status_is_error: false,
            last_fetch: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.realtime && self.snapshot.subscription_error.is_none()
    }

    /// Send a command, remembering it if it starts a fetch.
    fn issue(&mut self, handle: &StreamHandle, cmd: StreamCommand) {
        if matches!(
            cmd,
            StreamCommand::Open(_)
                | StreamCommand::LoadOlder
                | StreamCommand::LoadNewer
                | StreamCommand::ScrollTo(_)
                | StreamCommand::GoToLatest
        ) {
            self.last_fetch = Some(cmd.clone());
        }
        handle.send(cmd);
    }

    /// Handle a key press
    pub fn handle_key(&mut self, key: KeyEvent, handle: &StreamHandle) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        self.status_message = None;
        let entries = Arc::clone(&self.snapshot.entries);

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_exit = true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_exit = true;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                let was_following = self.view.follow;
                let at_top = self.view.select_previous(&entries);
                if was_following && !self.view.follow {
                    handle.send(StreamCommand::SetFollowing(false));
                }
                if at_top && self.snapshot.has_older_messages && !self.snapshot.loading_older {
                    self.issue(handle, StreamCommand::LoadOlder);
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let at_bottom = self.view.select_next(&entries);
                if at_bottom {
                    handle.send(StreamCommand::SetFollowing(true));
                    if self.snapshot.has_new_messages && !self.snapshot.loading_newer {
                        self.issue(handle, StreamCommand::LoadNewer);
                    }
                }
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.view.select_first(&entries);
                handle.send(StreamCommand::SetFollowing(false));
                if self.snapshot.has_older_messages && !self.snapshot.loading_older {
                    self.issue(handle, StreamCommand::LoadOlder);
                }
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.view.follow = true;
                self.issue(handle, StreamCommand::GoToLatest);
            }
            KeyCode::Enter => {
                let linked = self
                    .view
                    .selected_message(&entries)
                    .filter(|m| m.is_reply)
                    .and_then(|m| m.linked_message.clone());
                match linked {
                    Some(message_id) => {
                        self.set_status(format!("Jumping to {}...", message_id), false);
                        self.issue(handle, StreamCommand::ScrollTo(message_id));
                    }
                    None => self.set_status("Selected message is not a reply", false),
                }
            }
            KeyCode::Char('r') => {
                let cmd = self
                    .last_fetch
                    .clone()
                    .filter(|_| !self.snapshot.entries.is_empty())
                    .unwrap_or_else(|| StreamCommand::Open(self.channel_id.clone()));
                self.set_status("Retrying...", false);
                self.issue(handle, cmd);
            }
            _ => {}
        }
    }

    /// Apply a notice from the stream task
    pub fn handle_notice(&mut self, notice: StreamNotice) {
        match notice {
            StreamNotice::Scroll(request) => self.view.apply(request),
            StreamNotice::Members {
                channel_id,
                members,
            } if channel_id == self.channel_id => self.members = members,
            StreamNotice::Members { .. } => {}
            StreamNotice::Error(StreamError::Subscription(e)) => {
                self.set_status(format!("Live updates unavailable: {}", e), true);
            }
            StreamNotice::Error(err) => self.set_status(err.to_string(), true),
        }
    }

    /// Take the latest published snapshot
    pub fn update_snapshot(&mut self, snapshot: StreamSnapshot) {
        self.view.sync(&snapshot.entries);
        self.snapshot = snapshot;
    }

    /// Apply queued notices, then the current snapshot.
    ///
    /// A step's notices are queued before its snapshot is published, so a
    /// notice that races past the drain is applied on the next wake-up.
    pub fn pump(&mut self, handle: &mut StreamHandle) {
        while let Some(notice) = handle.try_notice() {
            self.handle_notice(notice);
        }
        self.update_snapshot(handle.snapshot());
    }

    fn set_status(&mut self, msg: impl Into<String>, is_error: bool) {
        self.status_message = Some(msg.into());
        self.status_is_error = is_error;
    }

    /// Render the UI
    pub fn render(&mut self, frame: &mut ratatui::Frame) {
        ui::render(frame, self);
    }
}

/// Open `channel` in the terminal UI.
pub async fn run(channel: &str) -> Result<()> {
    let config = Config::load()?;
    let client = RavenClient::from_config(&config)?;

    let list = api::list_channels_data(&client, true).await?;
    let (channel_id, channel_label) = match api::resolve_channel(&list, channel) {
        Some(found) => (found.name.clone(), found.label()),
        None => {
            let id = channel.trim_start_matches('#').to_string();
            (id.clone(), id)
        }
    };
    let user_name = config
        .current_user
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    let site = client.site().to_string();
    let source = Arc::new(HttpMessageSource::new(client.clone()));
    let events = Arc::new(SocketEventSource::new(&site, client.credentials().clone())?);
    let handle = stream::spawn(source, events, config.stream);

    let app = App::new(channel_id, channel_label, user_name, config.stream.realtime);

    let mut terminal = ratatui::init();
    let result = AssertUnwindSafe(run_app(&mut terminal, app, handle))
        .catch_unwind()
        .await;
    ratatui::restore();

    match result {
        Ok(r) => r,
        Err(e) => std::panic::resume_unwind(e),
    }
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    mut app: App,
    mut handle: StreamHandle,
) -> Result<()> {
    let mut input = EventStream::new();
    app.issue(&handle, StreamCommand::Open(app.channel_id.clone()));

    while !app.should_exit {
        terminal.draw(|frame| app.render(frame))?;

        tokio::select! {
            maybe_event = input.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => app.handle_key(key, &handle),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => app.should_exit = true,
            },
            changed = handle.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Stream task stopped");
                }
                app.pump(&mut handle);
            }
        }
    }

    handle.send(StreamCommand::Close);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::{day_messages, MemoryEvents, MemorySource};
    use crate::stream::{EntryKey, ScrollRequest, StreamSettings};
    use std::time::Duration;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn loaded_app(count: usize) -> (App, StreamHandle, Arc<MemorySource>) {
        let source = Arc::new(
            MemorySource::new().with_channel("general", day_messages("m", "2024-03-05", count)),
        );
        let settings = StreamSettings {
            page_limit: 10,
            highlight_ms: 200,
            realtime: false,
        };
        let mut handle = stream::spawn(source.clone(), Arc::new(MemoryEvents::new()), settings);
        let mut app = App::new("general".into(), "#general".into(), "tester".into(), false);
        app.issue(&handle, StreamCommand::Open("general".into()));
        settle(&mut app, &mut handle, opened).await;
        (app, handle, source)
    }

    fn opened(app: &App) -> bool {
        !app.snapshot.is_loading && !app.snapshot.entries.is_empty()
    }

    async fn settle(app: &mut App, handle: &mut StreamHandle, done: impl Fn(&App) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                app.pump(handle);
                if done(app) {
                    break;
                }
                let _ = handle.changed().await;
            }
        })
        .await
        .expect("stream did not settle");
    }

    #[tokio::test]
    async fn test_up_at_top_loads_older_and_keeps_anchor() {
        let (mut app, mut handle, _source) = loaded_app(25).await;
        assert_eq!(app.view.selected_message(&app.snapshot.entries).unwrap().name, "m-024");

        // Separator plus ten messages: eleven presses reach the top.
        for _ in 0..11 {
            app.handle_key(key(KeyCode::Up), &handle);
        }
        let anchor = Some(EntryKey::Message("m-015".into()));
        settle(&mut app, &mut handle, |a| {
            a.snapshot.entries.len() == 21 && a.view.selected == anchor
        })
        .await;
        assert!(!app.snapshot.loading_older);
        assert!(!app.view.follow);
    }

    #[tokio::test]
    async fn test_enter_on_reply_jumps_to_linked_message() {
        let source = Arc::new(MemorySource::new());
        let mut history = day_messages("m", "2024-03-05", 30);
        history[29].is_reply = true;
        history[29].linked_message = Some("m-002".into());
        for msg in history {
            source.push("general", msg);
        }
        let settings = StreamSettings {
            page_limit: 10,
            highlight_ms: 5_000,
            realtime: false,
        };
        let mut handle = stream::spawn(source, Arc::new(MemoryEvents::new()), settings);
        let mut app = App::new("general".into(), "#general".into(), "tester".into(), false);
        app.issue(&handle, StreamCommand::Open("general".into()));
        settle(&mut app, &mut handle, opened).await;

        app.handle_key(key(KeyCode::Enter), &handle);
        let target = Some(EntryKey::Message("m-002".into()));
        settle(&mut app, &mut handle, |a| {
            a.snapshot.highlighted.as_deref() == Some("m-002") && a.view.selected == target
        })
        .await;
        assert!(app.snapshot.has_new_messages);
        assert!(!app.snapshot.has_older_messages);
    }

    #[tokio::test]
    async fn test_retry_reissues_failed_fetch() {
        let (mut app, mut handle, source) = loaded_app(25).await;
        source.fail_next(1);
        app.handle_key(key(KeyCode::Home), &handle);
        settle(&mut app, &mut handle, |a| {
            a.snapshot.error.is_some() && a.status_is_error
        })
        .await;
        assert_eq!(app.snapshot.entries.len(), 11);

        app.handle_key(key(KeyCode::Char('r')), &handle);
        settle(&mut app, &mut handle, |a| {
            a.snapshot.error.is_none() && a.snapshot.entries.len() == 21
        })
        .await;
    }

    #[test]
    fn test_scroll_notice_reaches_view() {
        let mut app = App::new("general".into(), "#general".into(), "tester".into(), true);
        app.handle_notice(StreamNotice::Scroll(ScrollRequest::Reveal("m1".into())));
        assert_eq!(app.view.selected, Some(EntryKey::Message("m1".into())));
        assert!(!app.view.follow);
    }

    #[test]
    fn test_live_indicator_and_error_status() {
        let mut app = App::new("general".into(), "#general".into(), "tester".into(), true);
        assert!(app.is_live());
        app.snapshot.subscription_error = Some(StreamError::Subscription("down".into()));
        assert!(!app.is_live());

        app.handle_notice(StreamNotice::Error(StreamError::Fetch("boom".into())));
        assert!(app.status_is_error);
        assert_eq!(
            app.status_message.as_deref(),
            Some("failed to load messages: boom")
        );
    }
}
