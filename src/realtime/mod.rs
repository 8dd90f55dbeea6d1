//! Realtime channel events over the site's Socket.IO endpoint
//!
//! The site broadcasts message changes to a per-document room. A
//! subscription joins the site namespace, subscribes to the channel's room,
//! and forwards the channel's message events until it is dropped.

pub mod frames;
pub mod websocket;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::ApiCredentials;
use crate::stream::{ChannelEvent, ChannelEventKind, EventSource, StreamError, Subscription};
use frames::{Packet, SocketPacket};
use websocket::RealtimeSocket;

const CHANNEL_DOCTYPE: &str = "Raven Channel";

/// Connection lifetime after which a drop is treated as fresh (backoff resets).
const STABLE_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SECS: u64 = 64;

/// Where and how to reach the Socket.IO server of a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEndpoint {
    /// `ws(s)://host[:port]/socket.io/?EIO=4&transport=websocket`
    pub url: String,
    /// Socket.IO namespace: `/` followed by the site name.
    pub namespace: String,
    /// Site origin sent with the upgrade request.
    pub origin: String,
}

impl SocketEndpoint {
    pub fn from_site(site_url: &str) -> Result<Self> {
        let site = url::Url::parse(site_url).context("Invalid site URL")?;
        let host = site.host_str().context("Site URL has no host")?;
        let scheme = match site.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => bail!("Unsupported site scheme: {}", other),
        };
        let authority = match site.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self {
            url: format!(
                "{}://{}/socket.io/?EIO=4&transport=websocket",
                scheme, authority
            ),
            namespace: format!("/{}", host),
            origin: format!("{}://{}", site.scheme(), authority),
        })
    }
}

/// Reason a session's event loop exited.
enum DisconnectReason {
    /// Subscriber went away. Do not reconnect.
    Released,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// One connected, subscribed socket.
struct Session {
    socket: RealtimeSocket,
    namespace: String,
    /// Silence longer than this means the server is gone.
    idle_timeout: Duration,
}

impl Session {
    /// Connect, join the namespace, and subscribe to the channel room.
    async fn open(
        endpoint: &SocketEndpoint,
        credentials: &ApiCredentials,
        channel_id: &str,
    ) -> Result<Self> {
        let mut socket = RealtimeSocket::connect(&endpoint.url, &endpoint.origin, credentials).await?;

        let frame = socket
            .recv_frame()
            .await?
            .context("Connection closed before handshake")?;
        let handshake = match frames::parse(&frame) {
            Ok(Packet::Open(handshake)) => handshake,
            Ok(other) => bail!("Expected Engine.IO open packet, got {:?}", other),
            Err(e) => bail!("Bad handshake frame: {}", e),
        };
        tracing::debug!(
            "Engine.IO session {} (ping every {}ms)",
            handshake.sid,
            handshake.ping_interval
        );

        socket
            .send_text(&frames::connect_frame(&endpoint.namespace))
            .await?;
        loop {
            let frame = socket
                .recv_frame()
                .await?
                .context("Connection closed while joining namespace")?;
            match frames::parse(&frame) {
                Ok(Packet::Message(SocketPacket::Connect { namespace, .. }))
                    if namespace == endpoint.namespace =>
                {
                    break;
                }
                Ok(Packet::Message(SocketPacket::ConnectError { data, .. })) => {
                    bail!(
                        "Server refused namespace {}: {}",
                        endpoint.namespace,
                        data.map(|d| d.to_string()).unwrap_or_default()
                    );
                }
                Ok(_) => continue,
                Err(e) => tracing::debug!("Skipping frame while joining: {}", e),
            }
        }

        socket
            .send_text(&frames::event_frame(
                &endpoint.namespace,
                "doc_subscribe",
                &[json!(CHANNEL_DOCTYPE), json!(channel_id)],
            ))
            .await?;
        tracing::info!("Subscribed to live events for {}", channel_id);

        Ok(Self {
            socket,
            namespace: endpoint.namespace.clone(),
            idle_timeout: Duration::from_millis(handshake.ping_interval + handshake.ping_timeout),
        })
    }

    /// Forward channel events until the connection drops or the receiver closes.
    async fn run(
        &mut self,
        channel_id: &str,
        events: &mpsc::UnboundedSender<ChannelEvent>,
    ) -> DisconnectReason {
        loop {
            tokio::select! {
                frame = time::timeout(self.idle_timeout, self.socket.recv_frame()) => {
                    let text = match frame {
                        Ok(Ok(Some(text))) => text,
                        Ok(Ok(None)) => {
                            return DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                        }
                        Ok(Err(e)) => {
                            return DisconnectReason::Error(e.context("WebSocket recv error"));
                        }
                        Err(_) => {
                            return DisconnectReason::Error(anyhow::anyhow!("No ping from server"));
                        }
                    };
                    if let Some(reason) = self.handle_frame(&text, channel_id, events) {
                        return reason;
                    }
                }
                _ = events.closed() => {
                    self.socket.close().await;
                    return DisconnectReason::Released;
                }
            }
        }
    }

    fn handle_frame(
        &self,
        text: &str,
        channel_id: &str,
        events: &mpsc::UnboundedSender<ChannelEvent>,
    ) -> Option<DisconnectReason> {
        let packet = match frames::parse(text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Ignoring frame {:?}: {}", text, e);
                return None;
            }
        };
        match packet {
            Packet::Close => Some(DisconnectReason::Error(anyhow::anyhow!(
                "Server closed the session"
            ))),
            Packet::Message(SocketPacket::Disconnect { namespace }) if namespace == self.namespace => {
                Some(DisconnectReason::Error(anyhow::anyhow!(
                    "Server left namespace {}",
                    namespace
                )))
            }
            Packet::Message(SocketPacket::Event { name, args, .. }) => {
                let event = frames::channel_event(&name, &args, channel_id)?;
                tracing::debug!("Live {} for {}", name, channel_id);
                if events.send(event).is_err() {
                    return Some(DisconnectReason::Released);
                }
                None
            }
            _ => None,
        }
    }
}

/// Keep a channel subscription alive, reconnecting with exponential backoff
/// (1s, 2s, 4s, ... capped at 64s).
async fn keep_subscribed(
    endpoint: SocketEndpoint,
    credentials: ApiCredentials,
    channel_id: String,
    mut session: Session,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut backoff = 1u64;

    loop {
        let connected_at = Instant::now();
        match session.run(&channel_id, &events).await {
            DisconnectReason::Released => {
                tracing::debug!("Live events for {} released", channel_id);
                return;
            }
            DisconnectReason::Error(e) => {
                if connected_at.elapsed() >= STABLE_AFTER {
                    backoff = 1;
                }
                tracing::warn!(
                    "Realtime disconnected: {:#}. Reconnecting in {}s...",
                    e,
                    backoff
                );
            }
        }

        session = loop {
            tokio::select! {
                _ = time::sleep(Duration::from_secs(backoff)) => {}
                _ = events.closed() => return,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            match Session::open(&endpoint, &credentials, &channel_id).await {
                Ok(session) => {
                    let resumed = ChannelEvent {
                        channel_id: channel_id.clone(),
                        kind: ChannelEventKind::Resumed,
                    };
                    if events.send(resumed).is_err() {
                        return;
                    }
                    break session;
                }
                Err(e) => tracing::warn!(
                    "Realtime reconnect failed: {:#}. Retrying in {}s...",
                    e,
                    backoff
                ),
            }
        };
    }
}

/// [`EventSource`] backed by the site's Socket.IO server.
#[derive(Debug, Clone)]
pub struct SocketEventSource {
    endpoint: SocketEndpoint,
    credentials: ApiCredentials,
}

impl SocketEventSource {
    pub fn new(site_url: &str, credentials: ApiCredentials) -> Result<Self> {
        Ok(Self {
            endpoint: SocketEndpoint::from_site(site_url)?,
            credentials,
        })
    }
}

#[async_trait]
impl EventSource for SocketEventSource {
    async fn subscribe(&self, channel_id: &str) -> Result<Subscription, StreamError> {
        let session = Session::open(&self.endpoint, &self.credentials, channel_id)
            .await
            .map_err(|e| StreamError::subscription(format!("{:#}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(keep_subscribed(
            self.endpoint.clone(),
            self.credentials.clone(),
            channel_id.to_string(),
            session,
            tx,
        ));
        Ok(Subscription::new(channel_id, rx, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_https_site() {
        let endpoint = SocketEndpoint::from_site("https://chat.example.com").unwrap();
        assert_eq!(
            endpoint.url,
            "wss://chat.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(endpoint.namespace, "/chat.example.com");
        assert_eq!(endpoint.origin, "https://chat.example.com");
    }

    #[test]
    fn test_endpoint_keeps_port() {
        let endpoint = SocketEndpoint::from_site("http://localhost:8000/").unwrap();
        assert_eq!(
            endpoint.url,
            "ws://localhost:8000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(endpoint.namespace, "/localhost");
    }

    #[test]
    fn test_endpoint_rejects_other_schemes() {
        assert!(SocketEndpoint::from_site("ftp://chat.example.com").is_err());
    }

    #[tokio::test]
    async fn test_subscribe_to_unreachable_site_fails() {
        let source =
            SocketEventSource::new("http://127.0.0.1:9", ApiCredentials::new("k", "s")).unwrap();
        let err = source.subscribe("general").await.unwrap_err();
        assert!(matches!(err, StreamError::Subscription(_)));
    }
}
