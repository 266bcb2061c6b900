//! Learner lifecycle manager.
//!
//! A lifecycle run owns one [`Reactor`], one engine learner and one armed
//! termination signal, runs the loop until a stop is requested, and releases
//! everything before returning.
//!
//! ```text
//! Uninitialized ─► ReactorCreated ─► LearnerBound ─► SignalArmed ─► Running ─► Stopping ─► Released
//!        │                │                │                                                ▲
//!        └────────────────┴────────────────┴──────────── startup failure ─────────────────────┘
//! ```
//!
//! The loop is a biased select over, in priority order:
//!
//! 1. the stop handle (external stop, or a stop requested by 2 or 3),
//! 2. the termination signal, which only requests a stop,
//! 3. the next engine decision, delivered synchronously to the callback.
//!
//! Deliveries are never interrupted: a stop is observed between two callback
//! invocations. An engine that runs out of decisions requests the stop itself.
//!
//! Resources are released signal first, then learner, then reactor, on every
//! exit path.

use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{LearnerOptions, PaxosConfig};
use crate::engine::{ConsensusEngine, EngineLearner};
use crate::error::LearnerError;
use crate::reactor::{Reactor, StopHandle};
use crate::signal::{BrokenPipeGuard, Interrupt, SignalSource, TerminationSignal};
use crate::types::{DecidedValue, Decision, InstanceId};

/// States of a lifecycle run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Nothing acquired yet.
    Uninitialized,
    /// The reactor exists.
    ReactorCreated,
    /// The engine learner is bound to the reactor.
    LearnerBound,
    /// The termination signal is registered.
    SignalArmed,
    /// The loop is dispatching.
    Running,
    /// The loop exited and resources are being released.
    Stopping,
    /// Everything has been released.
    Released,
}

/// Why the loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The termination signal was received.
    Signal,
    /// A [`StopHandle`] was triggered from outside the loop.
    External,
    /// The engine will not decide any more values.
    EngineClosed,
}

/// Summary of a completed lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Number of delivery callback invocations.
    pub deliveries: u64,
    /// Last instance handed to the callback.
    pub last_delivered: Option<InstanceId>,
    /// What ended the run.
    pub stop_reason: StopReason,
}

struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "learner lifecycle");
        self.state = next;
    }
}

/// Run a learner with the process interrupt as termination signal.
///
/// Blocks the calling thread until the loop is stopped by `SIGINT`, by the
/// engine closing, or from elsewhere in the reactor. `on_deliver` is called
/// once per decided value, in decision order, on this thread, with `context`
/// passed through. When `starting_position` is set the learner resumes from
/// that instance.
///
/// Broken-pipe signals are ignored process-wide for the duration of the call.
///
/// # Errors
///
/// Returns a `LearnerError` if startup fails. Nothing acquired before the
/// failure is leaked and the callback is never invoked.
pub fn start_learner<E, C, F>(
    engine: &E,
    config: &PaxosConfig,
    on_deliver: F,
    context: &mut C,
    starting_position: Option<InstanceId>,
) -> Result<RunReport, LearnerError>
where
    E: ConsensusEngine,
    F: FnMut(DecidedValue<'_>, &mut C),
{
    let options = LearnerOptions {
        starting_position,
        ..LearnerOptions::default()
    };
    run_learner(engine, config, options, Interrupt, on_deliver, context)
}

/// Run a learner with explicit options and termination signal.
///
/// This is the general form of [`start_learner`]. The signal source is armed
/// only after the learner exists, so it cannot fire before there is anything
/// to stop.
///
/// # Errors
///
/// Returns a `LearnerError` if the reactor, the learner or the signal cannot
/// be set up.
pub fn run_learner<E, S, C, F>(
    engine: &E,
    config: &PaxosConfig,
    options: LearnerOptions,
    signal: S,
    mut on_deliver: F,
    context: &mut C,
) -> Result<RunReport, LearnerError>
where
    E: ConsensusEngine,
    S: SignalSource,
    F: FnMut(DecidedValue<'_>, &mut C),
{
    let LearnerOptions {
        starting_position,
        ignore_broken_pipe,
        stop,
    } = options;
    let mut lifecycle = Lifecycle::new();

    // Declaration order is the acquisition order; early returns drop in reverse.
    let reactor = match Reactor::new(stop.clone()) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!(error = %e, "Could not create the reactor");
            lifecycle.advance(LifecycleState::Released);
            return Err(LearnerError::Reactor(e));
        }
    };
    lifecycle.advance(LifecycleState::ReactorCreated);

    let init = {
        let _enter = reactor.enter();
        engine.learner_init(config, &reactor)
    };
    let mut learner = match init {
        Ok(learner) => learner,
        Err(e) => {
            error!(error = %e, "Could not start the learner");
            drop(reactor);
            lifecycle.advance(LifecycleState::Released);
            return Err(LearnerError::Startup(e));
        }
    };
    if let Some(position) = starting_position {
        learner.set_start_position(position);
        info!(%position, "learner resuming from instance");
    }
    lifecycle.advance(LifecycleState::LearnerBound);

    let armed = {
        let _enter = reactor.enter();
        signal.arm()
    };
    let mut signal = match armed {
        Ok(signal) => signal,
        Err(e) => {
            error!(error = %e, "Could not arm the termination signal");
            drop(learner);
            drop(reactor);
            lifecycle.advance(LifecycleState::Released);
            return Err(LearnerError::Signal(e));
        }
    };
    let broken_pipe = ignore_broken_pipe.then(BrokenPipeGuard::install);
    lifecycle.advance(LifecycleState::SignalArmed);

    info!("learner running");
    lifecycle.advance(LifecycleState::Running);
    let outcome = reactor.block_on(dispatch(
        &mut learner,
        &mut signal,
        &stop,
        &mut on_deliver,
        context,
    ));
    lifecycle.advance(LifecycleState::Stopping);

    drop(signal);
    drop(broken_pipe);
    drop(learner);
    drop(reactor);
    lifecycle.advance(LifecycleState::Released);
    info!(
        deliveries = outcome.deliveries,
        reason = ?outcome.stop_reason,
        "learner stopped"
    );

    Ok(RunReport {
        deliveries: outcome.deliveries,
        last_delivered: outcome.last_delivered,
        stop_reason: outcome.stop_reason,
    })
}

struct Outcome {
    deliveries: u64,
    last_delivered: Option<InstanceId>,
    stop_reason: StopReason,
}

async fn dispatch<L, T, C, F>(
    learner: &mut L,
    signal: &mut T,
    stop: &StopHandle,
    on_deliver: &mut F,
    context: &mut C,
) -> Outcome
where
    L: EngineLearner,
    T: TerminationSignal,
    F: FnMut(DecidedValue<'_>, &mut C),
{
    let mut deliveries = 0;
    let mut last_delivered = None;
    let mut stop_reason = None;
    let mut signal_open = true;

    loop {
        tokio::select! {
            biased;

            _ = stop.stopped() => break,

            received = signal.recv(), if signal_open => match received {
                Some(()) => {
                    info!("Caught termination signal");
                    if stop.request_stop() {
                        stop_reason = Some(StopReason::Signal);
                    }
                }
                None => {
                    debug!("termination signal source closed");
                    signal_open = false;
                }
            },

            decision = learner.next_decision() => match decision {
                Some(decision) => {
                    on_deliver(decision.as_decided(), context);
                    deliveries += 1;
                    last_delivered = Some(decision.iid);
                }
                None => {
                    info!("engine has no more decisions");
                    if stop.request_stop() {
                        stop_reason = Some(StopReason::EngineClosed);
                    }
                }
            },
        }
    }

    Outcome {
        deliveries,
        last_delivered,
        stop_reason: stop_reason.unwrap_or(StopReason::External),
    }
}

/// Decisions produced by a learner running on a background thread.
///
/// The stream ends once the learner thread has released the learner.
#[derive(Debug)]
pub struct DecisionStream {
    rx: mpsc::UnboundedReceiver<Decision>,
}

impl DecisionStream {
    /// Wait for the next decision.
    pub async fn recv(&mut self) -> Option<Decision> {
        self.rx.recv().await
    }

    /// Blocking variant of [`DecisionStream::recv`].
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_recv(&mut self) -> Option<Decision> {
        self.rx.blocking_recv()
    }

    /// Take a decision if one is already queued.
    pub fn try_recv(&mut self) -> Option<Decision> {
        self.rx.try_recv().ok()
    }
}

/// Controls a learner running on a background thread.
#[derive(Debug)]
pub struct LearnerHandle {
    thread: thread::JoinHandle<Result<RunReport, LearnerError>>,
    stop: StopHandle,
}

impl LearnerHandle {
    /// The stop handle of the background run.
    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// Whether the learner thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the learner and wait for it to release its resources.
    ///
    /// # Errors
    ///
    /// Returns the run's startup error, or `Panicked` if the thread panicked.
    pub fn stop(self) -> Result<RunReport, LearnerError> {
        self.stop.request_stop();
        self.join()
    }

    /// Wait for the learner to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns the run's startup error, or `Panicked` if the thread panicked.
    pub fn join(self) -> Result<RunReport, LearnerError> {
        self.thread.join().map_err(|_| LearnerError::Panicked)?
    }
}

/// Run a learner on a dedicated thread.
///
/// Every decided value is copied into the returned [`DecisionStream`]. The
/// run stops through the [`LearnerHandle`], the signal source, the engine
/// closing, or when the stream is dropped.
///
/// # Errors
///
/// Returns `Thread` if the thread cannot be spawned. Startup failures inside
/// the thread are reported by [`LearnerHandle::join`].
pub fn spawn_learner<E, S>(
    engine: E,
    config: PaxosConfig,
    options: LearnerOptions,
    signal: S,
) -> Result<(DecisionStream, LearnerHandle), LearnerError>
where
    E: ConsensusEngine + Send + 'static,
    S: SignalSource + Send + 'static,
{
    let stop = options.stop.clone();
    let (tx, rx) = mpsc::unbounded_channel();

    let thread = thread::Builder::new()
        .name("paxos-learner".to_string())
        .spawn(move || {
            let mut tx = tx;
            let stop = options.stop.clone();
            run_learner(
                &engine,
                &config,
                options,
                signal,
                |decided, tx: &mut mpsc::UnboundedSender<Decision>| {
                    if tx.send(decided.to_decision()).is_err() && stop.request_stop() {
                        warn!("decision stream dropped, stopping learner");
                    }
                },
                &mut tx,
            )
        })
        .map_err(LearnerError::Thread)?;

    Ok((DecisionStream { rx }, LearnerHandle { thread, stop }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Replica;
    use crate::engine::{EngineEvent, InMemoryEngine};
    use crate::signal::{ManualSignal, NoSignal};

    fn config() -> PaxosConfig {
        PaxosConfig::new().with_replica(Replica::new(0, "127.0.0.1", 8800))
    }

    fn options() -> LearnerOptions {
        LearnerOptions::default().with_ignore_broken_pipe(false)
    }

    #[test]
    fn test_lifecycle_states_are_ordered() {
        use LifecycleState::*;
        let states = [
            Uninitialized,
            ReactorCreated,
            LearnerBound,
            SignalArmed,
            Running,
            Stopping,
            Released,
        ];
        assert!(states.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_engine_close_stops_loop() {
        let engine = InMemoryEngine::with_values(["x", "y"]);
        engine.close();

        let mut seen = Vec::new();
        let report = run_learner(
            &engine,
            &config(),
            options(),
            NoSignal,
            |decided, seen: &mut Vec<Decision>| seen.push(decided.to_decision()),
            &mut seen,
        )
        .expect("run");

        assert_eq!(report.stop_reason, StopReason::EngineClosed);
        assert_eq!(report.deliveries, 2);
        assert_eq!(report.last_delivered, Some(InstanceId::new(1)));
        assert_eq!(seen.len(), 2);
        assert!(!engine.is_bound());
    }

    #[test]
    fn test_stop_requested_before_run_delivers_nothing() {
        let engine = InMemoryEngine::with_values(["never"]);
        let stop = StopHandle::new();
        stop.request_stop();

        let mut count = 0u32;
        let report = run_learner(
            &engine,
            &config(),
            options().with_stop_handle(stop),
            NoSignal,
            |_, count: &mut u32| *count += 1,
            &mut count,
        )
        .expect("run");

        assert_eq!(count, 0);
        assert_eq!(report.stop_reason, StopReason::External);
        assert_eq!(
            engine.events(),
            vec![EngineEvent::LearnerInit, EngineEvent::LearnerReleased]
        );
    }

    #[test]
    fn test_signal_raised_in_callback_stops_after_delivery() {
        let engine = InMemoryEngine::with_values(["first", "second", "third"]);
        let (signal, trigger) = ManualSignal::new();

        let mut seen = Vec::new();
        let report = run_learner(
            &engine,
            &config(),
            options(),
            signal,
            |decided, seen: &mut Vec<Vec<u8>>| {
                seen.push(decided.value.to_vec());
                trigger.raise();
                trigger.raise();
            },
            &mut seen,
        )
        .expect("run");

        assert_eq!(seen, vec![b"first".to_vec()]);
        assert_eq!(report.stop_reason, StopReason::Signal);
        assert_eq!(report.deliveries, 1);
    }

    #[test]
    fn test_arm_failure_releases_learner() {
        struct Busy;
        impl SignalSource for Busy {
            type Signal = NoSignal;
            fn arm(self) -> Result<NoSignal, crate::error::SignalError> {
                Err(crate::error::SignalError::AlreadySubscribed)
            }
        }

        let engine = InMemoryEngine::with_values(["unused"]);
        let mut count = 0u32;
        let result = run_learner(
            &engine,
            &config(),
            options(),
            Busy,
            |_, count: &mut u32| *count += 1,
            &mut count,
        );

        assert!(matches!(result, Err(LearnerError::Signal(_))));
        assert_eq!(count, 0);
        assert_eq!(
            engine.events(),
            vec![EngineEvent::LearnerInit, EngineEvent::LearnerReleased]
        );
    }
}
