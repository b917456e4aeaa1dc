//! Core environment context trait for LiveCast tasks.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for clock and task interaction.
///
/// This trait abstracts the runtime so that the pacing loop can be driven
/// by the real tokio clock in production and by tokio's paused test clock
/// in unit tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
#[async_trait]
pub trait LiveContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// Used for progress logging and timing assertions.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a named background task.
    ///
    /// The name is attached to the task's tracing span.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
