//! LiveCast server - WebSocket front end for the live broadcast.
//!
//! Viewers connect to `ws://<bind>:<port>/live/monitor` and receive the
//! static metadata, the current step, and then every following step as JSON
//! text frames.

pub mod ws;
pub mod server;

pub use server::serve;
pub use ws::{WsTransport, LIVE_PATH};
