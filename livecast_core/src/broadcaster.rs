//! Broadcaster - the single authority over the current step.
//!
//! The broadcaster is a monitor: one lock guards the current step, a version
//! counter and the live session set, and two `Notify` primitives carry the
//! wake-ups.
//!
//! ```text
//!   AwaitingFirstViewer ──first register──► InitialDelay ──delay──► Advancing
//!                                                                     │  ▲
//!                                                     sleep(interval) └──┘ step += 1, notify all
//!                                                                     │
//!                                                       step == last  ▼
//!                                                                  Finished (final notify)
//! ```
//!
//! # Wake-up protocol
//!
//! Every advance bumps `version` and records it as `step_version`; reaching
//! the end bumps `version` once more. A waiter remembers the last version it
//! observed, and under the lock either sees a newer version or registers
//! itself with `step_changed` before releasing the lock. An advance that
//! happens after the check therefore always finds the waiter registered, so
//! no wake-up is lost. Signals are not queued: a waiter that falls behind
//! wakes once and reads the newest step.

use crate::config::{BroadcastConfig, ConfigError};
use crate::trace::{StaticMetadata, StepState, Trace};

use livecast_env::{LiveContext, SessionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

static NULL_STATE: StepState = StepState::Null;

/// Lifecycle of the pacing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No viewer has connected yet; the step is frozen at the start step.
    AwaitingFirstViewer,
    /// First viewer seen; sleeping before the first advance.
    InitialDelay,
    /// Advancing one step per interval.
    Advancing,
    /// Terminal step reached; no further step signals.
    Finished,
}

/// What a waiting viewer woke up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// The current step is now this index.
    Step(usize),
    /// The broadcast is over; the last step has already been delivered.
    Finished,
}

#[derive(Debug)]
struct Monitor {
    current_step: usize,
    /// Bumped on every signal (advance or finish)
    version: u64,
    /// Version of the most recent advance
    step_version: u64,
    phase: Phase,
    first_viewer_fired: bool,
    pacing_started: bool,
    registrations: u64,
    sessions: HashSet<SessionId>,
}

/// Owns the current step and paces the replay.
pub struct Broadcaster {
    trace: Arc<Trace>,
    config: BroadcastConfig,
    monitor: Mutex<Monitor>,
    first_viewer: Notify,
    step_changed: Notify,
}

impl Broadcaster {
    /// Creates a broadcaster positioned at `config.start_step`.
    pub fn new(trace: impl Into<Arc<Trace>>, config: BroadcastConfig) -> Result<Self, ConfigError> {
        let trace = trace.into();
        config.validate(trace.total_steps())?;

        Ok(Self {
            monitor: Mutex::new(Monitor {
                current_step: config.start_step,
                version: 0,
                step_version: 0,
                phase: Phase::AwaitingFirstViewer,
                first_viewer_fired: false,
                pacing_started: false,
                registrations: 0,
                sessions: HashSet::new(),
            }),
            trace,
            config,
            first_viewer: Notify::new(),
            step_changed: Notify::new(),
        })
    }

    fn monitor(&self) -> MutexGuard<'_, Monitor> {
        self.monitor.lock().expect("broadcaster monitor poisoned")
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn metadata(&self) -> &StaticMetadata {
        self.trace.metadata()
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn total_steps(&self) -> usize {
        self.trace.total_steps()
    }

    pub fn phase(&self) -> Phase {
        self.monitor().phase
    }

    /// Sessions currently registered and not yet dropped.
    pub fn viewer_count(&self) -> usize {
        self.monitor().sessions.len()
    }

    /// Registrations since construction, including departed viewers.
    pub fn total_registrations(&self) -> u64 {
        self.monitor().registrations
    }

    /// Snapshot of the current step index.
    pub fn current_step_index(&self) -> usize {
        self.monitor().current_step
    }

    /// Snapshot of the current step index together with its state.
    pub fn current_state(&self) -> (usize, &StepState) {
        let index = self.current_step_index();
        (index, self.state_at(index))
    }

    pub(crate) fn state_at(&self, index: usize) -> &StepState {
        // current_step never leaves 0..total_steps
        self.trace.step(index).unwrap_or(&NULL_STATE)
    }

    /// Registers a new viewer.
    ///
    /// The first registration ever releases the pacing loop; later ones only
    /// join the live session set. The returned handle leaves the set when
    /// dropped.
    pub fn register_viewer(self: &Arc<Self>) -> ViewerHandle {
        let id = SessionId::new();
        let (first, seen) = {
            let mut monitor = self.monitor();
            monitor.registrations += 1;
            monitor.sessions.insert(id);
            let first = !monitor.first_viewer_fired;
            monitor.first_viewer_fired = true;
            (first, monitor.step_version)
        };

        if first {
            info!("First viewer connected ({})", id);
            self.first_viewer.notify_one();
        } else {
            debug!("Viewer {} registered", id);
        }

        ViewerHandle {
            broadcaster: Arc::clone(self),
            id,
            seen,
            first,
        }
    }

    /// Blocks until the next step signal after this call.
    ///
    /// Returns immediately with [`StepEvent::Finished`] once the broadcast
    /// is over.
    pub async fn await_step_change(&self) -> StepEvent {
        let seen = self.monitor().step_version;
        self.wait_past(seen).await.1
    }

    /// Waits for a signal newer than `seen`, returning the version consumed
    /// and the event.
    async fn wait_past(&self, seen: u64) -> (u64, StepEvent) {
        loop {
            let notified = self.step_changed.notified();
            tokio::pin!(notified);

            {
                let monitor = self.monitor();
                if monitor.step_version > seen {
                    return (monitor.step_version, StepEvent::Step(monitor.current_step));
                }
                if monitor.phase == Phase::Finished {
                    return (monitor.version, StepEvent::Finished);
                }
                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    /// Blocks until some viewer has registered.
    pub async fn wait_for_first_viewer(&self) {
        loop {
            let notified = self.first_viewer.notified();
            tokio::pin!(notified);

            {
                let monitor = self.monitor();
                if monitor.first_viewer_fired {
                    return;
                }
                notified.as_mut().enable();
            }

            notified.await;
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.monitor().phase = phase;
    }

    fn advance(&self) -> usize {
        let step = {
            let mut monitor = self.monitor();
            monitor.current_step += 1;
            monitor.version += 1;
            monitor.step_version = monitor.version;
            monitor.current_step
        };
        self.step_changed.notify_waiters();
        step
    }

    fn finish(&self) {
        {
            let mut monitor = self.monitor();
            monitor.phase = Phase::Finished;
            monitor.version += 1;
        }
        self.step_changed.notify_waiters();
    }

    /// The pacing loop. Returns once the terminal step has been signalled.
    ///
    /// Only the first call drives the broadcast; any further call returns
    /// immediately.
    pub async fn run<C: LiveContext>(&self, ctx: &C) {
        {
            let mut monitor = self.monitor();
            if monitor.pacing_started {
                warn!("Pacing loop already running");
                return;
            }
            monitor.pacing_started = true;
        }

        let last = self.trace.last_step();

        info!("Waiting for first viewer ...");
        self.wait_for_first_viewer().await;

        self.set_phase(Phase::InitialDelay);
        info!("Waiting for delay ({:?}) ...", self.config.initial_delay);
        ctx.sleep(self.config.initial_delay).await;

        self.set_phase(Phase::Advancing);
        info!("Broadcasting with {:?} per step ...", self.config.step_interval);

        while self.current_step_index() < last {
            ctx.sleep(self.config.step_interval).await;
            let step = self.advance();
            info!("Step {} / {} ({} viewers)", step, last, self.viewer_count());
        }

        self.finish();
        info!("Broadcast finished at step {} after {:?}", last, ctx.now());
    }

    /// Spawns the pacing loop on the context's runtime.
    pub fn spawn<C: LiveContext>(self: &Arc<Self>, ctx: Arc<C>) {
        let broadcaster = Arc::clone(self);
        let runner = Arc::clone(&ctx);
        ctx.spawn("pacing", async move {
            broadcaster.run(runner.as_ref()).await;
        });
    }
}

/// One registered viewer's view of the broadcast.
///
/// Tracks the last version the viewer has seen so it is woken once per
/// newer step and never handed the same step twice.
pub struct ViewerHandle {
    broadcaster: Arc<Broadcaster>,
    id: SessionId,
    seen: u64,
    first: bool,
}

impl ViewerHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// True for the registration that released the pacing loop.
    pub fn is_first_viewer(&self) -> bool {
        self.first
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Reads the current step and marks it as seen.
    pub fn snapshot(&mut self) -> (usize, &StepState) {
        let index = {
            let monitor = self.broadcaster.monitor();
            self.seen = self.seen.max(monitor.step_version);
            monitor.current_step
        };
        (index, self.broadcaster.state_at(index))
    }

    /// Blocks until a step newer than the last one seen is current.
    pub async fn await_step_change(&mut self) -> StepEvent {
        let (seen, event) = self.broadcaster.wait_past(self.seen).await;
        self.seen = seen;
        event
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        let remaining = {
            let mut monitor = self.broadcaster.monitor();
            monitor.sessions.remove(&self.id);
            monitor.sessions.len()
        };
        debug!("Viewer {} left ({} remaining)", self.id, remaining);
    }
}
