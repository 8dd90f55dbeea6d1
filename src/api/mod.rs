//! API client module for Raven

mod channels;
mod chat;
pub mod client;
mod me;
pub mod messages;

use anyhow::Result;

pub use channels::{list_channels_data, resolve_channel};
pub use messages::HttpMessageSource;

/// List channels and direct messages
pub async fn list_channels(include_archived: bool) -> Result<()> {
    channels::list_channels(include_archived).await
}

/// Print messages of a channel
pub async fn read_messages(
    channel: &str,
    limit: Option<usize>,
    older_pages: usize,
    around: Option<&str>,
) -> Result<()> {
    chat::read_messages(channel, limit, older_pages, around).await
}

/// List members of a channel
pub async fn list_members(channel: &str) -> Result<()> {
    chat::list_members(channel).await
}

/// Follow a channel live
pub async fn watch(channel: &str) -> Result<()> {
    chat::watch(channel).await
}

/// Show current user info
pub async fn whoami() -> Result<()> {
    me::whoami().await
}
