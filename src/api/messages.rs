//! Message paging over the chat stream API

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::client::RavenClient;
use crate::models::{frappe_datetime, ChannelMembers, Message};
use crate::stream::{Cursor, MessageSource, Page, PageQuery, StreamError};

const GET_MESSAGES: &str = "raven.api.chat_stream.get_messages";
const GET_OLDER_MESSAGES: &str = "raven.api.chat_stream.get_older_messages";
const GET_NEWER_MESSAGES: &str = "raven.api.chat_stream.get_newer_messages";
const GET_CHANNEL_MEMBERS: &str = "raven.api.chat.get_channel_members";

/// Shape shared by the three paging methods; each fills the flags it knows.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    has_old_messages: Option<bool>,
    #[serde(default)]
    has_new_messages: Option<bool>,
}

impl MessagesResponse {
    fn into_page(self, cursor: &Cursor) -> Page {
        // Directional methods only report the side they page towards.
        let (older_default, newer_default) = match cursor {
            Cursor::Latest => (false, false),
            Cursor::Before(_) => (false, true),
            Cursor::After(_) => (true, false),
            Cursor::Around(_) => (false, false),
        };
        Page {
            messages: self.messages,
            has_older: self.has_old_messages.unwrap_or(older_default),
            has_newer: self.has_new_messages.unwrap_or(newer_default),
        }
    }
}

/// Query parameters for one page request.
fn page_request(
    channel_id: &str,
    query: &PageQuery,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut params = vec![
        ("channel_id", channel_id.to_string()),
        ("limit", query.limit.to_string()),
    ];
    let method = match &query.cursor {
        Cursor::Latest => GET_MESSAGES,
        Cursor::Around(message_id) => {
            params.push(("base_message", message_id.clone()));
            GET_MESSAGES
        }
        Cursor::Before(anchor) => {
            params.push(("from_message", anchor.name.clone()));
            params.push(("from_timestamp", frappe_datetime::format(&anchor.creation)));
            GET_OLDER_MESSAGES
        }
        Cursor::After(anchor) => {
            params.push(("from_message", anchor.name.clone()));
            params.push(("from_timestamp", frappe_datetime::format(&anchor.creation)));
            GET_NEWER_MESSAGES
        }
    };
    (method, params)
}

/// [`MessageSource`] backed by the site's HTTP API.
#[derive(Clone)]
pub struct HttpMessageSource {
    client: RavenClient,
}

impl HttpMessageSource {
    pub fn new(client: RavenClient) -> Self {
        Self { client }
    }

    async fn get_page(&self, channel_id: &str, query: &PageQuery) -> Result<Page> {
        let (method, params) = page_request(channel_id, query);
        let response: MessagesResponse = self.client.call_get(method, &params).await?;
        tracing::debug!(
            "{} returned {} messages for {}",
            method,
            response.messages.len(),
            channel_id
        );
        Ok(response.into_page(&query.cursor))
    }
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn fetch_messages(
        &self,
        channel_id: &str,
        query: &PageQuery,
    ) -> Result<Page, StreamError> {
        self.get_page(channel_id, query)
            .await
            .map_err(|e| StreamError::fetch(format!("{:#}", e)))
    }

    async fn fetch_channel_members(&self, channel_id: &str) -> Result<ChannelMembers, StreamError> {
        self.client
            .call_get(GET_CHANNEL_MEMBERS, &[("channel_id", channel_id.to_string())])
            .await
            .map_err(|e| StreamError::fetch(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Anchor;

    const RESPONSE: &str = r#"{
        "messages": [
            {
                "name": "m2",
                "channel_id": "general",
                "creation": "2024-03-05 10:15:00.000000",
                "modified": "2024-03-05 10:15:00.000000",
                "message_type": "Text",
                "text": "<p>second</p>",
                "owner": "jane@example.com",
                "is_reply": 1,
                "linked_message": "m1",
                "is_edited": 0,
                "is_bot_message": 0
            },
            {
                "name": "m1",
                "channel_id": "general",
                "creation": "2024-03-05 10:00:00",
                "modified": "2024-03-05 10:01:00",
                "message_type": "Image",
                "file": "/files/cat.png",
                "owner": "joe@example.com"
            }
        ],
        "has_old_messages": true
    }"#;

    fn anchor() -> Anchor {
        Anchor {
            name: "m9".into(),
            creation: frappe_datetime::parse("2024-03-05 11:00:00").unwrap(),
        }
    }

    #[test]
    fn test_parse_page() {
        let response: MessagesResponse = serde_json::from_str(RESPONSE).unwrap();
        let page = response.into_page(&Cursor::Latest);
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_older);
        assert!(!page.has_newer);
        assert!(page.messages[0].is_reply);
        assert_eq!(page.messages[0].linked_message.as_deref(), Some("m1"));
        assert_eq!(page.messages[1].plain_text(), "[image] cat.png");
    }

    #[test]
    fn test_older_page_assumes_newer_content() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"messages": [], "has_old_messages": false}"#).unwrap();
        let page = response.into_page(&Cursor::Before(anchor()));
        assert!(!page.has_older);
        assert!(page.has_newer);
    }

    #[test]
    fn test_page_request_methods() {
        let latest = PageQuery {
            cursor: Cursor::Latest,
            limit: 50,
        };
        let (method, params) = page_request("general", &latest);
        assert_eq!(method, GET_MESSAGES);
        assert_eq!(
            params,
            vec![("channel_id", "general".into()), ("limit", "50".into())]
        );

        let around = PageQuery {
            cursor: Cursor::Around("m1".into()),
            limit: 20,
        };
        let (method, params) = page_request("general", &around);
        assert_eq!(method, GET_MESSAGES);
        assert!(params.contains(&("base_message", "m1".into())));

        let older = PageQuery {
            cursor: Cursor::Before(anchor()),
            limit: 20,
        };
        let (method, params) = page_request("general", &older);
        assert_eq!(method, GET_OLDER_MESSAGES);
        assert!(params.contains(&("from_message", "m9".into())));

        let newer = PageQuery {
            cursor: Cursor::After(anchor()),
            limit: 20,
        };
        assert_eq!(page_request("general", &newer).0, GET_NEWER_MESSAGES);
    }
}
