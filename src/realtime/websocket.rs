//! Socket.IO WebSocket connection and frame handling

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::frames;
use crate::auth::ApiCredentials;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct RealtimeSocket {
    stream: WsStream,
}

impl RealtimeSocket {
    /// Connect to the site's Socket.IO endpoint.
    ///
    /// The API key pair goes in the `Authorization` header of the upgrade
    /// request; the server checks it before accepting namespace joins.
    pub async fn connect(url: &str, origin: &str, credentials: &ApiCredentials) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .context("Invalid realtime URL")?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&credentials.header_value())
                .context("API credentials are not a valid header value")?,
        );
        headers.insert(
            "Origin",
            HeaderValue::from_str(origin).context("Invalid origin")?,
        );

        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(request)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame.
    ///
    /// Engine.IO pings (`2`) are answered with a pong before the frame is
    /// returned; the server drops the connection if a pong is late.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);

                    if let Some(payload) = text.strip_prefix('2') {
                        let pong = frames::pong_frame(payload);
                        if let Err(e) = self.stream.send(Message::Text(pong)).await {
                            tracing::warn!("Failed to send Engine.IO pong: {:#}", e);
                        }
                    }

                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}
