//! Peer dialing: role-pairing dial sets and rate-limited connection
//!
//! Requesters dial Holders and Holders dial Requesters; same-role dialing is
//! intentionally excluded to model realistic topologies, and Observers dial
//! nobody. Dialing is bounded to a maximum connection rate so a large
//! population does not stampede the emulated network.

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::peer::{PeerDescriptor, PeerId};
use crate::role::Role;
use crate::traits::{ExchangeNode, NodeError};

/// Compute the peers this process should dial for a round.
pub fn dial_targets<'a>(
    role: Role,
    self_id: &PeerId,
    peers: &'a [PeerDescriptor],
) -> Vec<&'a PeerDescriptor> {
    let wanted = match role {
        Role::Requester => Role::Holder,
        Role::Holder => Role::Requester,
        Role::Observer => return Vec::new(),
    };

    peers
        .iter()
        .filter(|peer| peer.role == wanted && peer.id != *self_id)
        .collect()
}

/// Token-bucket limiter bounding connections per second.
///
/// A rate of 0 disables limiting entirely.
pub struct DialRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate: u32,
}

impl DialRateLimiter {
    /// Create a limiter allowing `max_per_second` connections per second.
    pub fn new(max_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(max_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            limiter,
            rate: max_per_second,
        }
    }

    /// Wait until the next connection is allowed.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether a rate limit is in effect.
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured connections-per-second limit (0 when unlimited).
    pub fn rate(&self) -> u32 {
        self.rate
    }
}

impl std::fmt::Debug for DialRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialRateLimiter")
            .field("rate", &self.rate)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Dial every target at the bounded rate. Returns the number of peers
/// dialed; the first dial failure aborts the round.
pub async fn dial_all(
    node: &dyn ExchangeNode,
    targets: &[&PeerDescriptor],
    limiter: &DialRateLimiter,
) -> Result<usize, NodeError> {
    for target in targets {
        limiter.acquire().await;
        node.connect(target).await?;
    }
    tracing::debug!(dialed = targets.len(), "dial set connected");
    Ok(targets.len())
}
