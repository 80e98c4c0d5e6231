use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::oracle::OracleError;

pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// External authority on whether two identities are friends.
#[async_trait]
pub trait FriendshipOracle: Send + Sync {
    /// Is `other` a friend of the user that `token` authenticates?
    async fn is_friend(&self, other: &str, token: &str) -> Result<bool, OracleError>;
}

/// Outcome of one friendship check. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipVerdict {
    Friends,
    NotFriends,
    /// The oracle failed, rejected the call or timed out.
    Unavailable,
}

impl FriendshipVerdict {
    /// Fail-closed: only a positive answer allows.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Friends)
    }
}

/// Capability check in front of the friendship oracle. Every failure mode
/// resolves to "not friends"; there are no retries.
#[derive(Clone)]
pub struct AuthorizationGateway {
    oracle: Arc<dyn FriendshipOracle>,
    timeout: Duration,
}

impl AuthorizationGateway {
    pub fn new(oracle: Arc<dyn FriendshipOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Ask the oracle, bounded by the configured timeout.
    pub async fn check(&self, requester: &str, other: &str, token: &str) -> FriendshipVerdict {
        match tokio::time::timeout(self.timeout, self.oracle.is_friend(other, token)).await {
            Ok(Ok(true)) => FriendshipVerdict::Friends,
            Ok(Ok(false)) => {
                debug!("{} and {} are not friends", requester, other);
                FriendshipVerdict::NotFriends
            }
            Ok(Err(e)) => {
                warn!("Friendship check {} -> {} failed: {}", requester, other, e);
                FriendshipVerdict::Unavailable
            }
            Err(_) => {
                warn!(
                    "Friendship check {} -> {} timed out after {:?}",
                    requester, other, self.timeout
                );
                FriendshipVerdict::Unavailable
            }
        }
    }

    pub async fn verify_friendship(&self, requester: &str, other: &str, token: &str) -> bool {
        self.check(requester, other, token).await.is_allowed()
    }
}
