//! Core types shared by the learner and proposer sides.
//!
//! - [`InstanceId`]: Position in the replicated log (one round of agreement)
//! - [`Decision`]: An owned decided value, safe to keep after delivery
//! - [`DecidedValue`]: A borrowed view of a decided value, valid only for the
//!   duration of a delivery callback

use serde::{Deserialize, Serialize};

/// Instance id: a position in the replicated log.
///
/// Each instance is a single round of agreement among the replicas and
/// decides at most one value. Instance ids increase monotonically, and a
/// learner delivers decisions in instance order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The first instance of a fresh log.
    pub const FIRST: Self = Self(0);

    /// Create a new instance id.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the next sequential instance.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "iid({})", self.0)
    }
}

/// A decided Paxos instance with its value copied out of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The instance that decided this value.
    pub iid: InstanceId,

    /// The decided value bytes.
    pub value: Vec<u8>,
}

impl Decision {
    /// Create a new decision.
    pub fn new(iid: InstanceId, value: impl Into<Vec<u8>>) -> Self {
        Self {
            iid,
            value: value.into(),
        }
    }

    /// Borrow this decision as the view handed to delivery callbacks.
    pub fn as_decided(&self) -> DecidedValue<'_> {
        DecidedValue {
            iid: self.iid,
            value: &self.value,
        }
    }
}

/// A decided value as seen by a delivery callback.
///
/// The bytes are only borrowed for the duration of the callback. Anything
/// that must outlive it has to be copied, e.g. with [`DecidedValue::to_decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecidedValue<'a> {
    /// The instance that decided this value.
    pub iid: InstanceId,

    /// The decided value bytes.
    pub value: &'a [u8],
}

impl DecidedValue<'_> {
    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the decided value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Copy this value into an owned [`Decision`].
    pub fn to_decision(&self) -> Decision {
        Decision::new(self.iid, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_ordering() {
        assert!(InstanceId::new(1) < InstanceId::new(2));
        assert_eq!(InstanceId::FIRST.next(), InstanceId::new(1));
        assert_eq!(InstanceId::new(7).to_string(), "iid(7)");
    }

    #[test]
    fn test_decided_value_copy_outlives_source() {
        let owned = {
            let bytes = b"transient".to_vec();
            let view = DecidedValue {
                iid: InstanceId::new(3),
                value: &bytes,
            };
            assert_eq!(view.len(), 9);
            view.to_decision()
        };

        assert_eq!(owned, Decision::new(InstanceId::new(3), b"transient".to_vec()));
        assert_eq!(owned.as_decided().value, b"transient");
    }
}
