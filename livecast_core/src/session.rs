//! Viewer session - the per-connection push protocol.
//!
//! ```text
//! connect ─► register ─► send metadata ─► send current step ─┐
//!                                                            ▼
//!                              ┌──── await step change ◄─────┤
//!                              │                             │
//!                              ├─ Step(i)  ─► send state[i] ─┘
//!                              ├─ Finished ─► end (BroadcastFinished)
//!                              └─ peer gone / send failed ─► end (Disconnected)
//! ```
//!
//! A session never replays earlier steps: the snapshot covers "now" and the
//! loop only covers advances signalled afterwards.

use crate::broadcaster::{Broadcaster, StepEvent, ViewerHandle};

use livecast_env::{EnvError, SessionId, ViewerTransport};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The broadcast reached its last step and the viewer has it.
    BroadcastFinished,
    /// The peer went away or a send failed.
    Disconnected(String),
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    /// Messages delivered, metadata included
    pub messages_sent: usize,
    pub end: SessionEnd,
}

/// One connected viewer.
pub struct ViewerSession<T: ViewerTransport> {
    broadcaster: Arc<Broadcaster>,
    transport: T,
}

impl<T: ViewerTransport> ViewerSession<T> {
    pub fn new(broadcaster: Arc<Broadcaster>, transport: T) -> Self {
        Self {
            broadcaster,
            transport,
        }
    }

    /// Runs the session until the broadcast ends or the peer leaves.
    ///
    /// Disconnects are the normal way for a session to end and are reported,
    /// not returned as errors.
    pub async fn run(self) -> SessionReport {
        let mut viewer = self.broadcaster.register_viewer();
        let id = viewer.id();
        let peer = self.transport.peer();
        info!("Viewer {} connected from {}", id, peer);

        let mut messages_sent = 0;
        let end = match self.stream(&mut viewer, &mut messages_sent).await {
            Ok(()) => {
                info!("Viewer {} ({}) saw the broadcast finish", id, peer);
                SessionEnd::BroadcastFinished
            }
            Err(err) => {
                if err.is_disconnect() {
                    info!("Viewer {} ({}) disconnected: {}", id, peer, err);
                } else {
                    warn!("Viewer {} ({}) dropped after send failure: {}", id, peer, err);
                }
                SessionEnd::Disconnected(err.to_string())
            }
        };

        SessionReport {
            id,
            messages_sent,
            end,
        }
    }

    async fn stream(
        &self,
        viewer: &mut ViewerHandle,
        messages_sent: &mut usize,
    ) -> Result<(), EnvError> {
        self.transport
            .send_json(self.broadcaster.metadata().as_value())
            .await?;
        *messages_sent += 1;

        let (index, state) = viewer.snapshot();
        self.transport.send_json(state).await?;
        *messages_sent += 1;
        debug!("Viewer {} snapshot at step {}", viewer.id(), index);

        loop {
            let event = tokio::select! {
                event = viewer.await_step_change() => event,
                _ = self.transport.closed() => {
                    return Err(EnvError::disconnected("peer closed the connection"));
                }
            };

            match event {
                StepEvent::Step(step) => {
                    self.transport.send_json(self.broadcaster.state_at(step)).await?;
                    *messages_sent += 1;
                    debug!("Viewer {} <- step {}", viewer.id(), step);
                }
                StepEvent::Finished => return Ok(()),
            }
        }
    }
}
