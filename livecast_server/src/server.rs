//! Accept loop: one viewer session per upgraded connection.

use crate::ws::{WsTransport, LIVE_PATH};

use livecast_core::{Broadcaster, SessionEnd, ViewerSession};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves viewers on `listener` until the listener fails.
pub async fn serve(listener: TcpListener, broadcaster: Arc<Broadcaster>) -> anyhow::Result<()> {
    info!("Live broadcast on ws://{}{}", listener.local_addr()?, LIVE_PATH);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Transient (e.g. fd exhaustion); back off and keep serving
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let broadcaster = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            handle_connection(stream, peer, broadcaster).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broadcaster: Arc<Broadcaster>) {
    let transport = match WsTransport::accept(stream, peer).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            warn!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };

    let report = ViewerSession::new(broadcaster, Arc::clone(&transport)).run().await;
    if report.end == SessionEnd::BroadcastFinished {
        transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use livecast_core::{BroadcastConfig, StaticMetadata, Trace};
    use livecast_env::TokioContext;
    use serde_json::{json, Value};
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    async fn start(steps: usize, interval_ms: u64) -> (SocketAddr, Arc<Broadcaster>) {
        let metadata = StaticMetadata::from_value(json!({"steps": steps, "name": "demo"})).unwrap();
        let states = (0..steps).map(|i| json!({"step": i})).collect();
        let config = BroadcastConfig::default()
            .with_initial_delay(Duration::from_millis(10))
            .with_step_interval(Duration::from_millis(interval_ms));
        let broadcaster = Arc::new(Broadcaster::new(Trace::new(metadata, states).unwrap(), config).unwrap());
        broadcaster.spawn(TokioContext::shared());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&broadcaster)));
        (addr, broadcaster)
    }

    #[tokio::test]
    async fn test_websocket_viewer_receives_whole_broadcast() {
        let (addr, _broadcaster) = start(3, 10).await;
        let (mut ws, _) = connect_async(format!("ws://{}{}", addr, LIVE_PATH)).await.unwrap();

        let mut messages = Vec::new();
        while let Some(frame) = timeout(Duration::from_secs(5), ws.next()).await.unwrap() {
            match frame.unwrap() {
                Message::Text(text) => messages.push(serde_json::from_str::<Value>(&text).unwrap()),
                Message::Close(_) => break,
                _ => {}
            }
        }

        assert_eq!(
            messages,
            vec![
                json!({"steps": 3, "name": "demo"}),
                json!({"step": 0}),
                json!({"step": 1}),
                json!({"step": 2}),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() {
        let (addr, broadcaster) = start(3, 10).await;
        let result = connect_async(format!("ws://{}/elsewhere", addr)).await;

        assert!(result.is_err());
        assert_eq!(broadcaster.total_registrations(), 0);
    }

    #[tokio::test]
    async fn test_closed_socket_leaves_session_set() {
        let (addr, broadcaster) = start(100, 1_000).await;
        let (mut ws, _) = connect_async(format!("ws://{}{}", addr, LIVE_PATH)).await.unwrap();

        // metadata + snapshot
        for _ in 0..2 {
            timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        }
        assert_eq!(broadcaster.viewer_count(), 1);

        ws.close(None).await.unwrap();
        drop(ws);

        timeout(Duration::from_secs(5), async {
            while broadcaster.viewer_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(broadcaster.total_registrations(), 1);
    }
}
