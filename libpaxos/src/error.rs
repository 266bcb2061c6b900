//! Error types for the learner lifecycle, the submission codec and the
//! proposer client.

use std::io;

use thiserror::Error;

/// Errors reported by a consensus engine while binding a learner.
#[derive(Debug, Error)]
pub enum EngineError {
    /// None of the configured acceptors could be reached.
    #[error("acceptors unreachable: {0}")]
    Unreachable(String),

    /// The engine rejected the configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine already has a learner bound and cannot create another.
    #[error("learner already bound to a reactor")]
    AlreadyBound,

    /// Any other engine-specific failure.
    #[error("engine failure: {0}")]
    Other(String),
}

/// Errors related to termination-signal registration.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Another lifecycle run in this process already owns the interrupt signal.
    #[error("process interrupt signal already subscribed")]
    AlreadySubscribed,

    /// Registering with the operating system failed.
    #[error("signal registration failed: {0}")]
    Register(#[source] io::Error),
}

/// Errors returned by a learner lifecycle run.
///
/// Startup failures and background-thread failures. Once the loop is running
/// the only way out is a stop, which is reported through a `RunReport`.
#[derive(Debug, Error)]
pub enum LearnerError {
    /// The reactor could not be created.
    #[error("could not create reactor: {0}")]
    Reactor(#[source] io::Error),

    /// The engine failed to initialize the learner.
    #[error("could not start the learner: {0}")]
    Startup(#[from] EngineError),

    /// The termination signal could not be armed.
    #[error("could not arm termination signal: {0}")]
    Signal(#[from] SignalError),

    /// The background learner thread could not be spawned.
    #[error("could not spawn learner thread: {0}")]
    Thread(#[source] io::Error),

    /// A background learner thread panicked.
    #[error("learner thread panicked")]
    Panicked,
}

/// Errors related to encoding and decoding submission messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The sink failed while the message was being written.
    ///
    /// Bytes written before the failure stay in the sink.
    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),

    /// The value cannot be framed with a 32-bit length prefix.
    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge {
        /// Size of the rejected value.
        size: usize,
        /// Largest encodable size.
        max: usize,
    },

    /// The buffer ended before the message was complete.
    #[error("truncated message: need {needed} bytes, have {have}")]
    Truncated {
        /// Minimum bytes required to continue parsing.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// A marker byte that cannot start the expected element.
    #[error("unexpected marker {marker:#04x} while reading {expected}")]
    UnexpectedMarker {
        /// The offending marker byte.
        marker: u8,
        /// What the decoder was looking for.
        expected: &'static str,
    },

    /// The envelope is an array of the wrong size.
    #[error("expected a 2-element array, found {0} elements")]
    UnexpectedArity(u32),

    /// The envelope carries a message type other than a client submission.
    #[error("unexpected message type {0}")]
    UnexpectedMessageType(i64),
}

impl From<rmp::encode::ValueWriteError<io::Error>> for CodecError {
    fn from(err: rmp::encode::ValueWriteError<io::Error>) -> Self {
        match err {
            rmp::encode::ValueWriteError::InvalidMarkerWrite(e)
            | rmp::encode::ValueWriteError::InvalidDataWrite(e) => CodecError::Sink(e),
        }
    }
}

/// Errors related to resolving addresses from a [`crate::PaxosConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No proposer with the requested id is configured.
    #[error("proposer {0} not found in configuration")]
    UnknownProposer(u32),

    /// A replica entry does not form a valid socket address.
    #[error("invalid address for replica {id}: {address}")]
    InvalidAddress {
        /// Replica id.
        id: u32,
        /// The address that failed to parse.
        address: String,
    },
}

/// Errors returned by [`crate::ProposerClient`].
#[derive(Debug, Error)]
pub enum ProposerError {
    /// The proposer could not be resolved from the configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting to the proposer failed.
    #[error("could not connect to proposer at {addr}: {source}")]
    Connect {
        /// Address we tried to reach.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Encoding the submission failed.
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),

    /// Writing to the proposer failed.
    #[error("proposer I/O error: {0}")]
    Io(#[source] io::Error),
}
