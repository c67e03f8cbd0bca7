//! Peer identity and descriptor types

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Opaque network identity of a peer process.
///
/// The engine never interprets the contents; it only forwards identities to
/// the node-under-test's dial and ledger capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Identifier of a published payload, as produced by the node-under-test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl ContentId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        ContentId(s.to_string())
    }
}

/// Descriptor published by every process before any round starts.
///
/// Immutable once published; collected by every other process during
/// initialization and cached for the lifetime of the experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Network identity used for dialing and ledger operations
    pub id: PeerId,
    /// Role the peer was assigned
    pub role: Role,
    /// 0-based index of the peer within its role
    pub index: usize,
}
