//! User-related models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Member profile within a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    /// User id (email-like)
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_image: Option<String>,
    #[serde(default)]
    pub is_admin: Option<u8>,
}

/// Channel members keyed by user id.
pub type ChannelMembers = HashMap<String, ChannelMember>;

/// Display name for a user id, falling back to the id itself.
pub fn display_name<'a>(members: &'a ChannelMembers, user_id: &'a str) -> &'a str {
    members
        .get(user_id)
        .map(|m| m.full_name.as_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(user_id)
}
