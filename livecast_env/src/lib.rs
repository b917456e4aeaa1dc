//! LiveCast Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams the broadcast core runs against:
//! - Time (`now()`, `sleep()`) and task spawning via [`LiveContext`]
//! - Delivery to a connected viewer via [`ViewerTransport`]
//!
//! The core never touches sockets or the tokio clock directly, so the same
//! pacing loop and session protocol run against a WebSocket in production
//! and against in-memory channels in tests.
//!
//! # Example
//!
//! ```ignore
//! use livecast_env::{LiveContext, ViewerTransport};
//!
//! async fn push_loop<Ctx: LiveContext, T: ViewerTransport>(ctx: &Ctx, peer: &T) {
//!     loop {
//!         tokio::select! {
//!             _ = peer.closed() => break,
//!             _ = ctx.sleep(Duration::from_millis(500)) => {
//!                 if peer.send_json(&frame()).await.is_err() { break; }
//!             }
//!         }
//!     }
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::LiveContext;
pub use transport::{ChannelTransport, ViewerTransport};
pub use types::SessionId;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
