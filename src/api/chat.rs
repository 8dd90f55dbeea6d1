//! Channel reading commands: page through history, list members, follow live.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

use super::channels;
use super::client::RavenClient;
use super::messages::HttpMessageSource;
use crate::config::Config;
use crate::models::{display_name, ChannelMembers, Message};
use crate::realtime::SocketEventSource;
use crate::stream::{
    self, ChatStream, MessageSource, StreamCommand, StreamEntry, StreamError, StreamNotice,
    StreamSettings, StreamSnapshot,
};

/// Separator line for a calendar day, e.g. `---- Tue, 5 Mar 2024 ----`.
pub fn format_day(day: NaiveDate) -> String {
    format!("---- {} ----", day.format("%a, %-d %b %Y"))
}

/// One message as printable lines: header line plus indented continuation.
pub fn format_message(msg: &Message, members: &ChannelMembers, highlighted: bool) -> String {
    let marker = if highlighted { ">" } else { " " };
    let sender = display_name(members, &msg.owner);
    let mut header = format!("{}[{}] {}", marker, msg.creation.format("%H:%M"), sender);
    if msg.is_reply {
        if let Some(ref linked) = msg.linked_message {
            header.push_str(&format!(" (reply to {})", linked));
        }
    }
    if msg.is_edited {
        header.push_str(" (edited)");
    }

    let text = msg.plain_text();
    let mut lines = text.lines();
    let mut out = format!("{}: {}", header, lines.next().unwrap_or(""));
    for line in lines {
        out.push_str("\n        ");
        out.push_str(line);
    }
    if let Some(reactions) = msg.reaction_summary() {
        out.push_str("\n        ");
        out.push_str(&reactions);
    }
    out
}

/// Render stream entries the way `read` prints them.
pub fn format_entries(
    entries: &[StreamEntry],
    members: &ChannelMembers,
    highlighted: Option<&str>,
) -> Vec<String> {
    entries
        .iter()
        .map(|entry| match entry {
            StreamEntry::DateSeparator(day) => format_day(*day),
            StreamEntry::Message(msg) => {
                format_message(msg, members, highlighted == Some(msg.name.as_str()))
            }
        })
        .collect()
}

async fn members_or_empty<S: MessageSource>(stream: &mut ChatStream<S>) -> ChannelMembers {
    match stream.channel_members().await {
        Ok(members) => members.clone(),
        Err(e) => {
            tracing::warn!("Could not load channel members: {}", e);
            ChannelMembers::new()
        }
    }
}

/// Print a page of a channel (and optionally older pages or a window
/// centered on one message).
pub async fn read_messages(
    channel: &str,
    limit: Option<usize>,
    older_pages: usize,
    around: Option<&str>,
) -> Result<()> {
    let config = Config::load()?;
    let client = RavenClient::from_config(&config)?;
    let channel_id = channels::channel_id(&client, channel).await?;

    let settings = StreamSettings {
        page_limit: limit.unwrap_or(config.stream.page_limit),
        ..config.stream
    };
    ensure!(settings.page_limit > 0, "--limit must be at least 1");
    let source = Arc::new(HttpMessageSource::new(client));
    let mut stream = ChatStream::new(source, settings);

    stream
        .open(&channel_id)
        .await
        .with_context(|| format!("Failed to open {}", channel_id))?;

    for _ in 0..older_pages {
        if !stream.state().has_older_messages() {
            break;
        }
        stream.load_older_messages().await?;
    }

    if let Some(message_id) = around {
        stream.scroll_to_message(message_id).await?;
    }

    let members = members_or_empty(&mut stream).await;
    let state = stream.state();

    if state.window().is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    if state.has_older_messages() {
        println!("(older messages available -- use --older N)");
    } else {
        println!("(beginning of channel)");
    }
    for line in format_entries(state.entries(), &members, state.highlighted()) {
        println!("{}", line);
    }
    if state.has_new_messages() {
        println!("(newer messages available)");
    }

    Ok(())
}

/// List members of a channel (prints to stdout).
pub async fn list_members(channel: &str) -> Result<()> {
    let client = RavenClient::new()?;
    let channel_id = channels::channel_id(&client, channel).await?;
    let source = HttpMessageSource::new(client);
    let members = source
        .fetch_channel_members(&channel_id)
        .await
        .with_context(|| format!("Failed to load members of {}", channel_id))?;

    let mut sorted: Vec<_> = members.values().collect();
    sorted.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.name.cmp(&b.name)));

    println!("\nMembers of {} ({}):", channel_id, sorted.len());
    println!("{:-<60}", "");
    for member in sorted {
        let admin = if member.is_admin == Some(1) { " (admin)" } else { "" };
        println!("{:<30} {}{}", member.full_name, member.name, admin);
    }
    Ok(())
}

/// What a printed line reflects: edits bump `modified`, reactions do not.
type PrintedVersion = (NaiveDateTime, Option<String>);

/// Tracks what has been printed so each snapshot prints only changes.
#[derive(Default)]
struct Printed {
    seen: HashMap<String, PrintedVersion>,
    last_day: Option<NaiveDate>,
}

impl Printed {
    fn lines(&mut self, snapshot: &StreamSnapshot, members: &ChannelMembers) -> Vec<String> {
        let mut out = Vec::new();
        let mut present = Vec::with_capacity(snapshot.entries.len());

        for msg in snapshot.entries.iter().filter_map(StreamEntry::as_message) {
            present.push(msg.name.as_str());
            let version = (msg.modified, msg.message_reactions.clone());
            match self.seen.get(&msg.name) {
                None => {
                    if self.last_day.map_or(true, |d| d < msg.day()) {
                        out.push(format_day(msg.day()));
                        self.last_day = Some(msg.day());
                    }
                    out.push(format_message(msg, members, false));
                }
                Some(printed) if *printed != version => {
                    out.push(format_message(msg, members, false));
                }
                Some(_) => continue,
            }
            self.seen.insert(msg.name.clone(), version);
        }

        let gone: Vec<String> = self
            .seen
            .keys()
            .filter(|name| !present.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            self.seen.remove(&name);
            out.push(format!(" (message {} deleted)", name));
        }
        out
    }
}

/// Follow a channel live until Ctrl+C.
pub async fn watch(channel: &str) -> Result<()> {
    let config = Config::load()?;
    let client = RavenClient::from_config(&config)?;
    let channel_id = channels::channel_id(&client, channel).await?;
    let site = client.site().to_string();
    let credentials = client.credentials().clone();

    let source = Arc::new(HttpMessageSource::new(client));
    let events = Arc::new(SocketEventSource::new(&site, credentials)?);
    let settings = StreamSettings {
        realtime: true,
        ..config.stream
    };
    let mut handle = stream::spawn(source, events, settings);
    handle.send(StreamCommand::Open(channel_id.clone()));

    println!("Watching {}... (Ctrl-C to stop)", channel_id);

    let mut members = ChannelMembers::new();
    let mut printed = Printed::default();
    let mut warned_offline = false;

    loop {
        tokio::select! {
            changed = handle.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Stream task stopped");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                handle.send(StreamCommand::Close);
                return Ok(());
            }
        }

        // Notices of a step are queued before its snapshot is published.
        while let Some(notice) = handle.try_notice() {
            match notice {
                StreamNotice::Members {
                    members: loaded, ..
                } => members = loaded,
                StreamNotice::Error(StreamError::Subscription(_)) => {}
                StreamNotice::Error(err) => eprintln!("error: {}", err),
                StreamNotice::Scroll(_) => {}
            }
        }

        let snapshot = handle.snapshot();
        if snapshot.is_loading {
            continue;
        }
        for line in printed.lines(&snapshot, &members) {
            println!("{}", line);
        }
        match (&snapshot.subscription_error, warned_offline) {
            (Some(err), false) => {
                eprintln!("warning: {}", err);
                warned_offline = true;
            }
            (None, true) => warned_offline = false,
            _ => {}
        }
        if snapshot.has_new_messages && !snapshot.loading_newer {
            handle.send(StreamCommand::LoadNewer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelMember;
    use crate::stream::testing::message;
    use crate::stream::MessageWindow;

    fn members() -> ChannelMembers {
        let mut members = ChannelMembers::new();
        members.insert(
            "tester@example.com".into(),
            ChannelMember {
                name: "tester@example.com".into(),
                full_name: "Test User".into(),
                user_image: None,
                is_admin: None,
            },
        );
        members
    }

    #[test]
    fn test_format_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(format_day(day), "---- Tue, 5 Mar 2024 ----");
    }

    #[test]
    fn test_format_message_uses_member_name() {
        let mut msg = message("m1", "2024-03-05 10:15:00");
        msg.text = Some("<p>first</p><p>second</p>".into());
        msg.is_edited = true;
        assert_eq!(
            format_message(&msg, &members(), true),
            ">[10:15] Test User (edited): first\n        second"
        );
        assert_eq!(
            format_message(&msg, &ChannelMembers::new(), false),
            " [10:15] tester@example.com (edited): first\n        second"
        );
    }

    #[test]
    fn test_format_entries_marks_highlight() {
        let window = MessageWindow::from_messages(vec![
            message("a", "2024-03-04 23:59:00"),
            message("b", "2024-03-05 00:01:00"),
        ]);
        let lines = format_entries(&window.entries(), &ChannelMembers::new(), Some("b"));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "---- Mon, 4 Mar 2024 ----");
        assert!(lines[3].starts_with(">[00:01]"));
    }

    fn snapshot(messages: Vec<Message>) -> StreamSnapshot {
        StreamSnapshot {
            entries: Arc::new(MessageWindow::from_messages(messages).entries()),
            ..Default::default()
        }
    }

    #[test]
    fn test_printed_reports_only_changes() {
        let mut printed = Printed::default();
        let members = ChannelMembers::new();
        let first = printed.lines(&snapshot(vec![message("a", "2024-03-05 10:00:00")]), &members);
        assert_eq!(first.len(), 2);

        let mut edited = message("a", "2024-03-05 10:00:00");
        edited.modified = edited.modified + chrono::Duration::minutes(1);
        let next = printed.lines(
            &snapshot(vec![edited.clone(), message("b", "2024-03-05 10:05:00")]),
            &members,
        );
        assert_eq!(next.len(), 2);
        assert!(next.iter().all(|l| !l.starts_with("----")));

        let last = printed.lines(&snapshot(vec![edited]), &members);
        assert_eq!(last, vec![" (message b deleted)".to_string()]);
    }

    #[test]
    fn test_printed_reprints_reaction_changes() {
        let mut printed = Printed::default();
        let members = ChannelMembers::new();
        let mut msg = message("a", "2024-03-05 10:00:00");
        printed.lines(&snapshot(vec![msg.clone()]), &members);

        msg.message_reactions = Some(r#"{"👍": {"count": 1}}"#.into());
        let lines = printed.lines(&snapshot(vec![msg.clone()]), &members);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("\n        👍 1"));

        assert!(printed.lines(&snapshot(vec![msg]), &members).is_empty());
    }
}
