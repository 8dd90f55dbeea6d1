//! Channel list

use anyhow::{Context, Result};

use super::client::RavenClient;
use crate::models::{Channel, ChannelList};

const GET_ALL_CHANNELS: &str = "raven.api.raven_channel.get_all_channels";

/// Channels and DMs visible to the user, most recently active first.
pub async fn list_channels_data(
    client: &RavenClient,
    include_archived: bool,
) -> Result<ChannelList> {
    let mut list: ChannelList = client
        .call_get(
            GET_ALL_CHANNELS,
            &[("hide_archived", (!include_archived).to_string())],
        )
        .await
        .context("Failed to fetch channel list")?;
    list.sort_by_activity();
    Ok(list)
}

/// Resolve a user-supplied channel reference to a channel id.
///
/// Accepts the channel id itself, the channel name with or without `#`, or
/// the peer user id of a DM. Unknown references are passed through as ids.
pub fn resolve_channel<'a>(list: &'a ChannelList, reference: &str) -> Option<&'a Channel> {
    let wanted = reference.trim().trim_start_matches('#');
    let all = || list.channels.iter().chain(list.dm_channels.iter());
    all()
        .find(|c| c.name == wanted)
        .or_else(|| all().find(|c| c.channel_name.eq_ignore_ascii_case(wanted)))
        .or_else(|| all().find(|c| c.peer_user_id.as_deref() == Some(wanted)))
}

/// Look up `reference` on the site, falling back to using it verbatim.
pub async fn channel_id(client: &RavenClient, reference: &str) -> Result<String> {
    let list = list_channels_data(client, true).await?;
    Ok(match resolve_channel(&list, reference) {
        Some(channel) => channel.name.clone(),
        None => {
            tracing::debug!("{} not in channel list, using it as an id", reference);
            reference.trim_start_matches('#').to_string()
        }
    })
}

/// List channels and direct messages (prints to stdout).
pub async fn list_channels(include_archived: bool) -> Result<()> {
    let client = RavenClient::new()?;
    let list = list_channels_data(&client, include_archived).await?;

    println!("\nChannels:");
    println!("{:-<60}", "");
    if list.channels.is_empty() {
        println!("  (no channels found)");
    }
    for channel in &list.channels {
        print_channel(channel);
    }

    println!("\nDirect Messages:");
    println!("{:-<60}", "");
    if list.dm_channels.is_empty() {
        println!("  (no direct messages)");
    }
    for channel in &list.dm_channels {
        print_channel(channel);
    }

    Ok(())
}

fn print_channel(channel: &Channel) {
    let archived = if channel.is_archived == 1 { " (archived)" } else { "" };
    println!("{:<30} {}{}", channel.label(), channel.name, archived);
    if let Some(ts) = channel.last_message_timestamp {
        println!("  Last: {}", ts.format("%Y-%m-%d %H:%M"));
    }
}
