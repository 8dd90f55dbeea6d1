//! Channel-related models

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use super::message::frappe_datetime;

/// Channel visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    Public,
    Private,
    Open,
    #[serde(other)]
    Other,
}

/// Channel entity (group channel, direct message, or self notes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub channel_description: Option<String>,
    #[serde(default)]
    pub is_direct_message: u8,
    #[serde(default)]
    pub is_self_message: u8,
    #[serde(default)]
    pub is_archived: u8,
    /// Set for direct messages: the other participant.
    #[serde(default)]
    pub peer_user_id: Option<String>,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub last_message_timestamp: Option<NaiveDateTime>,
}

impl Channel {
    pub fn is_dm(&self) -> bool {
        self.is_direct_message == 1 || self.is_self_message == 1
    }

    /// Display label: `#name` for channels, the peer for DMs.
    pub fn label(&self) -> String {
        if self.is_dm() {
            self.peer_user_id
                .clone()
                .unwrap_or_else(|| self.channel_name.clone())
        } else {
            format!("#{}", self.channel_name)
        }
    }
}

/// User mentioned in the channel list without a channel of their own yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraUser {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_image: Option<String>,
}

/// Channels and DMs visible to the current user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelList {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub dm_channels: Vec<Channel>,
    #[serde(default)]
    pub extra_users: Vec<ExtraUser>,
}

impl ChannelList {
    /// Order both lists by most recent activity.
    pub fn sort_by_activity(&mut self) {
        self.channels.sort_by(by_last_message);
        self.dm_channels.sort_by(by_last_message);
    }
}

/// Most recent `last_message_timestamp` first; channels without one go last.
pub fn by_last_message(a: &Channel, b: &Channel) -> Ordering {
    match (&a.last_message_timestamp, &b.last_message_timestamp) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn optional_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<NaiveDateTime>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => frappe_datetime::parse(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
