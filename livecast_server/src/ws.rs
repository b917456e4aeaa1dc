//! WebSocket transport for live viewers.

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use livecast_env::{EnvError, ViewerTransport};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::debug;

/// The only path viewers may upgrade on.
pub const LIVE_PATH: &str = "/live/monitor";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// One upgraded viewer connection.
///
/// Outbound messages go through the sink half; a reader task drains the
/// inbound half (answering pings along the way) and flips `closed` when the
/// peer goes away.
pub struct WsTransport {
    peer: SocketAddr,
    sink: Mutex<WsSink>,
    closed: watch::Receiver<bool>,
}

impl WsTransport {
    /// Performs the WebSocket handshake, rejecting any path but [`LIVE_PATH`].
    pub async fn accept(stream: TcpStream, peer: SocketAddr) -> Result<Self, tungstenite::Error> {
        let ws = accept_hdr_async(stream, check_path).await?;
        let (sink, mut source) = ws.split();
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            peer,
            sink: Mutex::new(sink),
            closed: closed_rx,
        })
    }

    /// Sends a close frame; errors mean the peer is already gone.
    pub async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == LIVE_PATH {
        return Ok(response);
    }

    let mut error = ErrorResponse::new(Some(format!(
        "no live broadcast at {}",
        request.uri().path()
    )));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}

#[async_trait]
impl ViewerTransport for WsTransport {
    async fn send_json(&self, message: &Value) -> Result<(), EnvError> {
        let text = serde_json::to_string(message)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| EnvError::disconnected(e.to_string()))
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        // A dropped sender means the reader task is gone too
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}
