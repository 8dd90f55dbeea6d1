//! Message-related models

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Image,
    File,
    Poll,
    System,
    #[serde(other)]
    Other,
}

/// Chat message as returned by the Raven backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique document name (opaque message id).
    pub name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(with = "frappe_datetime")]
    pub creation: NaiveDateTime,
    #[serde(with = "frappe_datetime")]
    pub modified: NaiveDateTime,
    pub message_type: MessageType,
    /// HTML body for text messages.
    #[serde(default)]
    pub text: Option<String>,
    /// File URL for image/file messages.
    #[serde(default)]
    pub file: Option<String>,
    /// Sender user id.
    #[serde(default)]
    pub owner: String,
    #[serde(default, with = "frappe_check")]
    pub is_reply: bool,
    #[serde(default)]
    pub linked_message: Option<String>,
    /// Raw reaction JSON (emoji -> count/users), kept opaque.
    #[serde(default)]
    pub message_reactions: Option<String>,
    #[serde(default, with = "frappe_check")]
    pub is_edited: bool,
}

impl Message {
    /// Calendar day the message was created on.
    pub fn day(&self) -> NaiveDate {
        self.creation.date()
    }

    /// Text content with HTML stripped, or a placeholder for non-text kinds.
    pub fn plain_text(&self) -> String {
        match self.message_type {
            MessageType::Image | MessageType::File => {
                let file = self.file.as_deref().unwrap_or("");
                let label = file.rsplit('/').next().unwrap_or(file);
                let kind = if self.message_type == MessageType::Image {
                    "image"
                } else {
                    "file"
                };
                format!("[{}] {}", kind, label)
            }
            MessageType::Poll => "[poll]".to_string(),
            _ => strip_html(self.text.as_deref().unwrap_or("")).trim().to_string(),
        }
    }

    /// Compact reaction line such as `👍 2  🎉 1`, if any reactions parse.
    pub fn reaction_summary(&self) -> Option<String> {
        let raw = self.message_reactions.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let parts: Vec<String> = value
            .as_object()?
            .iter()
            .filter_map(|(key, entry)| {
                let count = entry.get("count").and_then(|c| c.as_u64())?;
                let emoji = entry
                    .get("reaction")
                    .and_then(|r| r.as_str())
                    .unwrap_or(key);
                (count > 0).then(|| format!("{} {}", emoji, count))
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("  "))
    }
}

/// Strip HTML tags from content for terminal display.
///
/// Block-level closing tags become newlines so paragraphs stay separated.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let t = tag.trim().to_ascii_lowercase();
                if t == "/p" || t.starts_with("br") || t == "/li" || t == "/blockquote" {
                    result.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => result.push(ch),
        }
    }
    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Frappe datetime strings: `YYYY-MM-DD HH:MM:SS[.ffffff]`.
pub mod frappe_datetime {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn parse(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s.trim(), FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f"))
    }

    pub fn format(dt: &NaiveDateTime) -> String {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(de::Error::custom)
    }
}

/// Frappe check fields arrive as `0`/`1` (sometimes as booleans).
mod frappe_check {
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = bool;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("0/1 or bool")
            }
            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
                Ok(v != 0)
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
                Ok(v != 0)
            }
            fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
                Ok(false)
            }
        }
        d.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_summary() {
        let mut msg: Message = serde_json::from_str(
            r#"{"name": "m", "creation": "2024-03-05 09:00:00", "modified": "2024-03-05 09:00:00",
                "message_type": "Text"}"#,
        )
        .unwrap();
        assert_eq!(msg.reaction_summary(), None);

        msg.message_reactions =
            Some(r#"{"👍": {"reaction": "👍", "users": ["a", "b"], "count": 2}, "x": {"count": 0}}"#.into());
        assert_eq!(msg.reaction_summary().as_deref(), Some("👍 2"));

        msg.message_reactions = Some("not json".into());
        assert_eq!(msg.reaction_summary(), None);
    }

    #[test]
    fn test_deserialize_backend_message() {
        let json = r#"{
            "name": "a1b2c3",
            "channel_id": "general",
            "creation": "2024-03-05 09:15:02.123456",
            "modified": "2024-03-05 09:16:00",
            "message_type": "Text",
            "text": "<p>Hello &amp; welcome</p>",
            "owner": "sarah@example.com",
            "is_reply": 1,
            "linked_message": "zz99",
            "is_edited": 0
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.name, "a1b2c3");
        assert!(msg.is_reply);
        assert!(!msg.is_edited);
        assert_eq!(msg.linked_message.as_deref(), Some("zz99"));
        assert_eq!(msg.day(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(msg.plain_text(), "Hello & welcome");
    }

    #[test]
    fn test_unknown_message_type() {
        let json = r#"{"name":"x","creation":"2024-01-01 00:00:00","modified":"2024-01-01 00:00:00","message_type":"Sticker"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, MessageType::Other);
        assert!(!msg.is_reply);
    }

    #[test]
    fn test_strip_html_paragraphs() {
        let text = strip_html("<p>one</p><p>two<br>three</p>");
        assert_eq!(text.trim(), "one\ntwo\nthree");
    }

    #[test]
    fn test_file_placeholder() {
        let json = r#"{"name":"f","creation":"2024-01-01 00:00:00","modified":"2024-01-01 00:00:00","message_type":"File","file":"/private/files/report.pdf"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.plain_text(), "[file] report.pdf");
    }
}
