//! Consensus engine seam.
//!
//! The Paxos protocol itself (acceptors, proposers, leader election) lives in
//! an external engine. The lifecycle manager only needs three things from it:
//! bind a learner to a reactor, optionally move its starting instance, and
//! hand out decided values in order. Releasing the learner is `Drop`.
//!
//! | Engine operation | Trait method |
//! |------------------|--------------|
//! | `learner_init(config, reactor)` | [`ConsensusEngine::learner_init`] |
//! | `learner_set_start_position(handle, iid)` | [`EngineLearner::set_start_position`] |
//! | deliver callback | [`EngineLearner::next_decision`] |
//! | `learner_release(handle)` | `Drop for Learner` |
//!
//! [`InMemoryEngine`] is a scripted engine for tests and local demos.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::PaxosConfig;
use crate::error::EngineError;
use crate::reactor::Reactor;
use crate::types::{Decision, InstanceId};

/// A learner instance owned by the lifecycle manager.
///
/// Dropping the learner releases it in the engine.
#[async_trait(?Send)]
pub trait EngineLearner {
    /// Resume learning from `position` instead of the engine's default start.
    ///
    /// Called at most once, before the loop starts.
    fn set_start_position(&mut self, position: InstanceId);

    /// Wait for the next decided value, in instance order.
    ///
    /// Returns `None` when the engine will never decide another value. The
    /// future must be cancel-safe: the loop drops it when a stop wins the race,
    /// and no decision may be lost when that happens.
    async fn next_decision(&mut self) -> Option<Decision>;
}

/// Factory for learners bound to a reactor.
pub trait ConsensusEngine {
    /// The learner type this engine produces.
    type Learner: EngineLearner;

    /// Create a learner bound to `reactor`.
    ///
    /// Called inside the reactor's runtime context, before the loop runs.
    /// Engine tasks may be attached with [`Reactor::spawn_local`].
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the configuration cannot be used.
    fn learner_init(
        &self,
        config: &PaxosConfig,
        reactor: &Reactor,
    ) -> Result<Self::Learner, EngineError>;
}

/// Lifecycle events recorded by [`InMemoryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A learner was created.
    LearnerInit,
    /// The learner's starting instance was moved.
    StartPosition(InstanceId),
    /// A decision was handed to the lifecycle manager.
    Delivered(InstanceId),
    /// The learner was released.
    LearnerReleased,
}

#[derive(Debug, Default)]
struct EngineState {
    log: Vec<Vec<u8>>,
    closed: bool,
    bound: bool,
    events: Vec<EngineEvent>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<EngineState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process engine with a scripted decision log.
///
/// Values passed to [`InMemoryEngine::decide`] are decided at consecutive
/// instances starting from [`InstanceId::FIRST`]. Clones share the same log,
/// so one clone can feed values from another thread while the learner runs.
///
/// Learner init fails with `Unreachable` when the configuration has no
/// acceptors, and with `AlreadyBound` while a previous learner is still alive.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    shared: Arc<Shared>,
}

impl InMemoryEngine {
    /// Create an engine with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine whose log already holds `values`.
    pub fn with_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        let engine = Self::new();
        for value in values {
            engine.decide(value);
        }
        engine
    }

    /// Decide `value` at the next instance.
    pub fn decide(&self, value: impl Into<Vec<u8>>) -> InstanceId {
        let iid = {
            let mut state = self.shared.lock();
            state.log.push(value.into());
            InstanceId::new(state.log.len() as u64 - 1)
        };
        trace!(%iid, "value decided");
        self.shared.notify.notify_waiters();
        iid
    }

    /// Stop deciding. Learners return `None` once they drained the log.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_waiters();
    }

    /// Whether a learner is currently bound.
    pub fn is_bound(&self) -> bool {
        self.shared.lock().bound
    }

    /// Snapshot of the recorded lifecycle events.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.shared.lock().events.clone()
    }
}

impl ConsensusEngine for InMemoryEngine {
    type Learner = InMemoryLearner;

    fn learner_init(
        &self,
        config: &PaxosConfig,
        _reactor: &Reactor,
    ) -> Result<InMemoryLearner, EngineError> {
        if config.acceptors.is_empty() {
            return Err(EngineError::Unreachable(
                "no acceptors configured".to_string(),
            ));
        }

        let mut state = self.shared.lock();
        if state.bound {
            return Err(EngineError::AlreadyBound);
        }
        state.bound = true;
        state.events.push(EngineEvent::LearnerInit);
        debug!(acceptors = config.acceptors.len(), "in-memory learner bound");

        Ok(InMemoryLearner {
            shared: self.shared.clone(),
            next: InstanceId::FIRST,
        })
    }
}

/// Learner handed out by [`InMemoryEngine`].
#[derive(Debug)]
pub struct InMemoryLearner {
    shared: Arc<Shared>,
    next: InstanceId,
}

enum LogRead {
    Ready(Decision),
    Pending,
    Closed,
}

impl InMemoryLearner {
    fn read_log(&mut self) -> LogRead {
        let mut state = self.shared.lock();
        // A position past the addressable log is simply not decided yet.
        let value = usize::try_from(self.next.0)
            .ok()
            .and_then(|index| state.log.get(index))
            .cloned();
        if let Some(value) = value {
            let decision = Decision::new(self.next, value);
            state.events.push(EngineEvent::Delivered(self.next));
            self.next = self.next.next();
            return LogRead::Ready(decision);
        }
        if state.closed {
            LogRead::Closed
        } else {
            LogRead::Pending
        }
    }
}

#[async_trait(?Send)]
impl EngineLearner for InMemoryLearner {
    fn set_start_position(&mut self, position: InstanceId) {
        self.next = position;
        self.shared
            .lock()
            .events
            .push(EngineEvent::StartPosition(position));
    }

    async fn next_decision(&mut self) -> Option<Decision> {
        let shared = self.shared.clone();
        loop {
            // Register before reading so a decide() in between is not missed.
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.read_log() {
                LogRead::Ready(decision) => return Some(decision),
                LogRead::Pending => notified.await,
                LogRead::Closed => return None,
            }
        }
    }
}

impl Drop for InMemoryLearner {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.bound = false;
        state.events.push(EngineEvent::LearnerReleased);
        debug!(next = %self.next, "in-memory learner released");
    }
}
