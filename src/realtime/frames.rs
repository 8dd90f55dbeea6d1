//! Engine.IO v4 / Socket.IO v4 text frames and the Raven events carried in them.
//!
//! Engine.IO prefixes every text frame with a packet type digit:
//! `0` open, `1` close, `2` ping, `3` pong, `4` message, `6` noop. A `4`
//! frame carries a Socket.IO packet: `0` connect, `1` disconnect, `2` event,
//! `4` connect error, followed by an optional `/namespace,`, an optional ack
//! id, and a JSON payload.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::Message;
use crate::stream::{ChannelEvent, ChannelEventKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Engine.IO open packet payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    /// Milliseconds between server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
    /// Acks and binary packets are not used here.
    Other {
        namespace: String,
        kind: char,
    },
}

/// Parse one text frame.
pub fn parse(frame: &str) -> Result<Packet, FrameError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => serde_json::from_str(rest)
            .map(Packet::Open)
            .map_err(|e| FrameError::Payload(e.to_string())),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping(rest.to_string())),
        '3' => Ok(Packet::Pong(rest.to_string())),
        '4' => parse_socket_packet(rest).map(Packet::Message),
        '6' => Ok(Packet::Noop),
        other => Err(FrameError::UnknownType(other)),
    }
}

fn parse_socket_packet(body: &str) -> Result<SocketPacket, FrameError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let mut rest = chars.as_str();

    let mut namespace = "/".to_string();
    if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        namespace = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or("");
    }

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let ack_id = rest[..digits].parse().ok();
    rest = &rest[digits..];

    let data = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest).map_err(|e| FrameError::Payload(e.to_string()))?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace, data }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let Some(Value::Array(mut items)) = data else {
                return Err(FrameError::Payload("event payload is not an array".into()));
            };
            if items.is_empty() {
                return Err(FrameError::Payload("event without a name".into()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => return Err(FrameError::Payload(format!("event name {}", other))),
            };
            Ok(SocketPacket::Event {
                namespace,
                ack_id,
                name,
                args: items,
            })
        }
        '4' => Ok(SocketPacket::ConnectError { namespace, data }),
        other => Ok(SocketPacket::Other {
            namespace,
            kind: other,
        }),
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == "/" || namespace.is_empty() {
        String::new()
    } else {
        format!("{},", namespace)
    }
}

/// Join a namespace.
pub fn connect_frame(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

/// Emit an event on a namespace.
pub fn event_frame(namespace: &str, name: &str, args: &[Value]) -> String {
    let mut payload = Vec::with_capacity(args.len() + 1);
    payload.push(Value::String(name.to_string()));
    payload.extend(args.iter().cloned());
    format!(
        "42{}{}",
        namespace_prefix(namespace),
        Value::Array(payload)
    )
}

/// Reply to a server ping.
pub fn pong_frame(payload: &str) -> String {
    format!("3{}", payload)
}

/// Raven broadcast payload. Every message event names the channel and message.
#[derive(Debug, Deserialize)]
struct RavenPayload {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    message_details: Option<Value>,
    #[serde(default)]
    reactions: Option<Value>,
}

/// Map a Socket.IO event to a channel event for `channel_id`.
///
/// Events for other channels and event names that carry no message change
/// return `None`.
pub fn channel_event(name: &str, args: &[Value], channel_id: &str) -> Option<ChannelEvent> {
    let payload: RavenPayload = serde_json::from_value(args.first()?.clone()).ok()?;
    if payload
        .channel_id
        .as_deref()
        .map_or(false, |id| id != channel_id)
    {
        return None;
    }

    let kind = match name {
        "message_created" => ChannelEventKind::NewMessage(message_from(&payload, channel_id)?),
        "message_edited" => ChannelEventKind::UpdateMessage(message_from(&payload, channel_id)?),
        "message_deleted" => ChannelEventKind::DeleteMessage {
            name: payload.message_id?,
        },
        "message_reacted" => {
            let reactions = match payload.reactions? {
                Value::String(raw) => raw,
                other => other.to_string(),
            };
            ChannelEventKind::Reactions {
                name: payload.message_id?,
                reactions,
            }
        }
        _ => return None,
    };
    Some(ChannelEvent {
        channel_id: channel_id.to_string(),
        kind,
    })
}

fn message_from(payload: &RavenPayload, channel_id: &str) -> Option<Message> {
    let mut details = payload.message_details.clone()?;
    if let (Value::Object(map), Some(id)) = (&mut details, &payload.message_id) {
        map.entry("name").or_insert_with(|| Value::String(id.clone()));
    }
    match serde_json::from_value::<Message>(details) {
        Ok(mut msg) => {
            if msg.channel_id.is_empty() {
                msg.channel_id = channel_id.to_string();
            }
            Some(msg)
        }
        Err(e) => {
            tracing::warn!("Unparseable realtime message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_open() {
        let packet =
            parse(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#)
                .unwrap();
        assert_eq!(
            packet,
            Packet::Open(Handshake {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 5000,
            })
        );
    }

    #[test]
    fn test_parse_ping_and_noop() {
        assert_eq!(parse("2").unwrap(), Packet::Ping(String::new()));
        assert_eq!(parse("6").unwrap(), Packet::Noop);
        assert_eq!(parse("").unwrap_err(), FrameError::Empty);
        assert_eq!(parse("9").unwrap_err(), FrameError::UnknownType('9'));
    }

    #[test]
    fn test_parse_namespaced_connect() {
        let packet = parse(r#"40/chat.example.com,{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            packet,
            Packet::Message(SocketPacket::Connect {
                namespace: "/chat.example.com".into(),
                data: Some(json!({"sid": "xyz"})),
            })
        );
    }

    #[test]
    fn test_parse_event_with_ack() {
        let packet = parse(r#"42/site,7["message_deleted",{"message_id":"m1"}]"#).unwrap();
        let Packet::Message(SocketPacket::Event {
            namespace,
            ack_id,
            name,
            args,
        }) = packet
        else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/site");
        assert_eq!(ack_id, Some(7));
        assert_eq!(name, "message_deleted");
        assert_eq!(args, vec![json!({"message_id": "m1"})]);
    }

    #[test]
    fn test_parse_root_namespace_event() {
        let packet = parse(r#"42["ping_check"]"#).unwrap();
        assert!(matches!(
            packet,
            Packet::Message(SocketPacket::Event { ref namespace, ref name, .. })
                if namespace == "/" && name == "ping_check"
        ));
    }

    #[test]
    fn test_encode_frames() {
        assert_eq!(connect_frame("/site"), "40/site,");
        assert_eq!(connect_frame("/"), "40");
        assert_eq!(
            event_frame("/site", "doc_subscribe", &[json!("Raven Channel"), json!("general")]),
            r#"42/site,["doc_subscribe","Raven Channel","general"]"#
        );
        assert_eq!(pong_frame(""), "3");
    }

    fn details(name: &str) -> Value {
        json!({
            "name": name,
            "channel_id": "general",
            "creation": "2024-03-05 10:15:00.000000",
            "modified": "2024-03-05 10:15:00.000000",
            "message_type": "Text",
            "text": "<p>hi</p>",
            "owner": "jane@example.com"
        })
    }

    #[test]
    fn test_message_created_maps_to_new_message() {
        let args = vec![json!({
            "channel_id": "general",
            "sender": "jane@example.com",
            "message_id": "m1",
            "message_details": details("m1"),
        })];
        let event = channel_event("message_created", &args, "general").unwrap();
        match event.kind {
            ChannelEventKind::NewMessage(msg) => {
                assert_eq!(msg.name, "m1");
                assert_eq!(msg.plain_text(), "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_message_name_filled_from_message_id() {
        let mut body = details("ignored");
        body.as_object_mut().unwrap().remove("name");
        let args = vec![json!({"channel_id": "general", "message_id": "m7", "message_details": body})];
        let event = channel_event("message_edited", &args, "general").unwrap();
        assert!(matches!(event.kind, ChannelEventKind::UpdateMessage(ref m) if m.name == "m7"));
    }

    #[test]
    fn test_other_channel_is_ignored() {
        let args = vec![json!({"channel_id": "random", "message_id": "m1"})];
        assert!(channel_event("message_deleted", &args, "general").is_none());
    }

    #[test]
    fn test_delete_and_reactions() {
        let args = vec![json!({"channel_id": "general", "message_id": "m1"})];
        assert_eq!(
            channel_event("message_deleted", &args, "general").unwrap().kind,
            ChannelEventKind::DeleteMessage { name: "m1".into() }
        );

        let args = vec![json!({
            "channel_id": "general",
            "message_id": "m1",
            "reactions": "{\"👍\": {\"count\": 1}}",
        })];
        assert_eq!(
            channel_event("message_reacted", &args, "general").unwrap().kind,
            ChannelEventKind::Reactions {
                name: "m1".into(),
                reactions: "{\"👍\": {\"count\": 1}}".into(),
            }
        );
    }

    #[test]
    fn test_unrelated_event_is_ignored() {
        let args = vec![json!({"channel_id": "general"})];
        assert!(channel_event("typing", &args, "general").is_none());
        assert!(channel_event("message_created", &[], "general").is_none());
    }
}
