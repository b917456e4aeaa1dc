//! LiveCast Core - lock-step live replay of recorded contest traces
//!
//! A recorded trace (static metadata plus one state per step) is replayed to
//! any number of viewers:
//! 1. **Trace**: the whole replay loaded into memory, random access by step
//! 2. **Broadcaster**: the single pacing loop that owns the current step and
//!    wakes every waiting viewer once per advance
//! 3. **Session**: the per-viewer protocol (metadata, snapshot, then follow)

pub mod trace;
pub mod config;
pub mod broadcaster;
pub mod session;

// Re-export key types for convenience
pub use trace::{load_trace, DirTraceStore, LoadError, StaticMetadata, StepState, Trace, TraceStore};
pub use config::{BroadcastConfig, ConfigError};
pub use broadcaster::{Broadcaster, Phase, StepEvent, ViewerHandle};
pub use session::{SessionEnd, SessionReport, ViewerSession};
