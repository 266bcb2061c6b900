//! Resolved replica configuration and learner run options.
//!
//! Parsing the engine's own configuration file belongs to the host
//! application. [`PaxosConfig`] is the already-resolved form, deserializable
//! with serde so the host can load it from whatever format it prefers.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reactor::StopHandle;
use crate::types::InstanceId;

/// A single replica endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica id, unique within its role.
    pub id: u32,

    /// Host address (IP literal).
    pub address: String,

    /// TCP port.
    pub port: u16,
}

impl Replica {
    /// Create a new replica entry.
    pub fn new(id: u32, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
        }
    }

    /// Parse this entry into a socket address.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` if `address:port` is not a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                id: self.id,
                address: self.address.clone(),
            })
    }
}

/// How to reach the replicas of a Paxos deployment.
///
/// A `replica` entry in the engine's config file plays every role, so it
/// appears in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosConfig {
    /// Acceptors the learner listens to.
    #[serde(default)]
    pub acceptors: Vec<Replica>,

    /// Proposers clients submit values to.
    #[serde(default)]
    pub proposers: Vec<Replica>,
}

impl PaxosConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replica acting as both acceptor and proposer.
    pub fn with_replica(mut self, replica: Replica) -> Self {
        self.acceptors.push(replica.clone());
        self.proposers.push(replica);
        self
    }

    /// Add an acceptor.
    pub fn with_acceptor(mut self, replica: Replica) -> Self {
        self.acceptors.push(replica);
        self
    }

    /// Add a proposer.
    pub fn with_proposer(mut self, replica: Replica) -> Self {
        self.proposers.push(replica);
        self
    }

    /// Look up a proposer by id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProposer` if no proposer has this id.
    pub fn proposer(&self, id: u32) -> Result<&Replica, ConfigError> {
        self.proposers
            .iter()
            .find(|p| p.id == id)
            .ok_or(ConfigError::UnknownProposer(id))
    }
}

/// Options for a single learner lifecycle run.
#[derive(Debug, Clone)]
pub struct LearnerOptions {
    /// Instance to resume learning from, instead of the engine's default start.
    pub starting_position: Option<InstanceId>,

    /// Ignore broken-pipe signals process-wide while the loop runs.
    pub ignore_broken_pipe: bool,

    /// Handle used to stop the run from outside the reactor.
    pub stop: StopHandle,
}

impl Default for LearnerOptions {
    fn default() -> Self {
        Self {
            starting_position: None,
            ignore_broken_pipe: true,
            stop: StopHandle::new(),
        }
    }
}

impl LearnerOptions {
    /// Resume learning at the given instance.
    pub fn with_starting_position(mut self, position: InstanceId) -> Self {
        self.starting_position = Some(position);
        self
    }

    /// Choose whether broken-pipe signals are ignored during the run.
    pub fn with_ignore_broken_pipe(mut self, ignore: bool) -> Self {
        self.ignore_broken_pipe = ignore;
        self
    }

    /// Use a stop handle created by the caller.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposer_lookup() {
        let config = PaxosConfig::new()
            .with_replica(Replica::new(0, "127.0.0.1", 8800))
            .with_proposer(Replica::new(3, "10.0.0.3", 5550));

        assert_eq!(
            config.proposer(3).expect("proposer 3").socket_addr(),
            Ok("10.0.0.3:5550".parse().expect("addr"))
        );
        assert_eq!(config.acceptors.len(), 1);
        assert_eq!(config.proposer(9), Err(ConfigError::UnknownProposer(9)));
    }

    #[test]
    fn test_invalid_address() {
        let replica = Replica::new(1, "not-an-ip", 80);
        assert!(matches!(
            replica.socket_addr(),
            Err(ConfigError::InvalidAddress { id: 1, .. })
        ));
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "acceptors": [{"id": 0, "address": "127.0.0.1", "port": 8800}],
            "proposers": [{"id": 0, "address": "127.0.0.1", "port": 5550}]
        }"#;
        let config: PaxosConfig = serde_json::from_str(json).expect("parse");

        assert_eq!(config.acceptors[0].port, 8800);
        assert_eq!(config.proposer(0).expect("proposer").port, 5550);

        let empty: PaxosConfig = serde_json::from_str("{}").expect("parse");
        assert!(empty.acceptors.is_empty());
    }

    #[test]
    fn test_learner_options_defaults() {
        let options = LearnerOptions::default();
        assert!(options.starting_position.is_none());
        assert!(options.ignore_broken_pipe);
        assert!(!options.stop.is_stop_requested());

        let options = options.with_starting_position(InstanceId::new(42));
        assert_eq!(options.starting_position, Some(InstanceId::new(42)));
    }
}
