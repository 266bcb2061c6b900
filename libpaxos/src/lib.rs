//! # libpaxos
//!
//! Integration boundary between a host application and a Paxos replication
//! engine. The engine (acceptors, proposers, leader election, the protocol
//! itself) is an external collaborator; this crate owns what surrounds it:
//!
//! - **Learner lifecycle**: run the reactor loop that receives decided values
//!   from the engine and hands them to the application, stop it cleanly on
//!   `SIGINT` or on request, and release everything on the way out.
//! - **Submission codec**: the byte-exact envelope a client sends to a
//!   proposer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐     ┌─────────────────────────┐
//! │           Host application             │     │     Host application    │
//! │  on_deliver(value, &mut ctx)           │     │  ProposerClient::submit │
//! └───────────────────▲────────────────────┘     └────────────┬────────────┘
//!                     │ decided values                         │ bytes
//! ┌───────────────────┴────────────────────┐     ┌────────────▼────────────┐
//! │        start_learner / run_learner      │     │   SubmitEncoder         │
//! │  Reactor ─ EngineLearner ─ Signal       │     │   [8, bin(value)]       │
//! └───────────────────▲────────────────────┘     └────────────┬────────────┘
//!                     │                                        │
//! ┌───────────────────┴────────────────────────────────────────▼────────────┐
//! │                     Consensus engine (external)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two halves share no state. The codec is pure and may be used from any
//! thread, including while a learner loop runs elsewhere.
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | `InstanceId`, `Decision`, `DecidedValue` |
//! | [`config`] | `PaxosConfig`, `Replica`, `LearnerOptions` |
//! | [`reactor`] | `Reactor` event loop and `StopHandle` |
//! | [`signal`] | Termination-signal sources and the broken-pipe guard |
//! | [`engine`] | `ConsensusEngine` / `EngineLearner` traits, `InMemoryEngine` |
//! | [`learner`] | `start_learner`, `run_learner`, `spawn_learner` |
//! | [`codec`] | `serialize_submit`, `SubmitEncoder`, `decode_submit` |
//! | [`proposer`] | `ProposerClient` |
//!
//! ## Example
//!
//! ```
//! use libpaxos::{InMemoryEngine, InstanceId, PaxosConfig, Replica, start_learner};
//!
//! let config = PaxosConfig::new().with_replica(Replica::new(0, "127.0.0.1", 8800));
//! let engine = InMemoryEngine::with_values(["a", "b", "c"]);
//! engine.close();
//!
//! let mut seen = Vec::new();
//! let report = start_learner(
//!     &engine,
//!     &config,
//!     |decided, seen: &mut Vec<Vec<u8>>| seen.push(decided.value.to_vec()),
//!     &mut seen,
//!     Some(InstanceId::new(1)),
//! )
//! .expect("learner");
//!
//! assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);
//! assert_eq!(report.deliveries, 2);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod learner;
pub mod proposer;
pub mod reactor;
pub mod signal;
pub mod types;

// Re-export key types at crate root for convenience
pub use codec::{
    BlobEncoding, MAX_VALUE_SIZE, SUBMIT_TAG, SubmitEncoder, SubmitMessage, decode_submit,
    serialize_submit, try_decode_submit,
};
pub use config::{LearnerOptions, PaxosConfig, Replica};
pub use engine::{ConsensusEngine, EngineEvent, EngineLearner, InMemoryEngine, InMemoryLearner};
pub use error::{CodecError, ConfigError, EngineError, LearnerError, ProposerError, SignalError};
pub use learner::{
    DecisionStream, LearnerHandle, LifecycleState, RunReport, StopReason, run_learner,
    spawn_learner, start_learner,
};
pub use proposer::ProposerClient;
pub use reactor::{Reactor, StopHandle};
pub use signal::{
    BrokenPipeGuard, Interrupt, InterruptSignal, ManualSignal, NoSignal, SignalSource,
    SignalTrigger, TerminationSignal,
};
pub use types::{DecidedValue, Decision, InstanceId};
