//! The cooperative, timeout-bounded network mining lock (spec.md §4.E.5).
//!
//! State lives behind its own `tokio::sync::Mutex`, separate from the
//! chain lock and the peer socket table, per the concurrency model in
//! spec.md §5. The lock's timer is a `tokio::time::Instant` deadline
//! checked by a background task rather than a fresh `spawn`ed timer per
//! grant — simpler to reset and cheaper than cancelling/respawning a
//! one-shot task on every `MINING_START`.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Advisory lock is released automatically if its holder never sends
/// `MINING_FINISH` (e.g. it crashed mid-mine).
pub const MINING_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct LockState {
    holder: Option<String>,
    expiry: Option<Instant>,
}

pub struct MiningLock {
    state: Mutex<LockState>,
    self_peer_id: String,
}

impl MiningLock {
    pub fn new(self_peer_id: String) -> Self {
        MiningLock {
            state: Mutex::new(LockState { holder: None, expiry: None }),
            self_peer_id,
        }
    }

    /// `request_lock()` (local): grants the lock to this node if free,
    /// starting the release timer. Returns whether the grant succeeded.
    pub async fn request_local(&self) -> bool {
        let mut state = self.state.lock().await;
        self.expire_if_needed(&mut state);
        if state.holder.is_some() {
            return false;
        }
        state.holder = Some(self.self_peer_id.clone());
        state.expiry = Some(Instant::now() + MINING_LOCK_TIMEOUT);
        true
    }

    /// `release_lock()` (local): clears the lock if this node holds it.
    /// Returns `true` if a release actually happened (so the caller knows
    /// to broadcast `MINING_FINISH`).
    pub async fn release_local(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.holder.as_deref() == Some(self.self_peer_id.as_str()) {
            state.holder = None;
            state.expiry = None;
            true
        } else {
            false
        }
    }

    /// Handles an incoming `MINING_START` from `peer_id`: grants/refreshes
    /// the lock to that peer if it was free or already theirs; ignored if
    /// held by someone else.
    pub async fn on_mining_start(&self, peer_id: &str) {
        let mut state = self.state.lock().await;
        self.expire_if_needed(&mut state);
        match &state.holder {
            None => {
                state.holder = Some(peer_id.to_string());
                state.expiry = Some(Instant::now() + MINING_LOCK_TIMEOUT);
            }
            Some(holder) if holder == peer_id => {
                state.expiry = Some(Instant::now() + MINING_LOCK_TIMEOUT);
            }
            Some(_) => debug!(peer_id, "ignoring MINING_START: lock held by another peer"),
        }
    }

    /// Handles an incoming `MINING_FINISH` from `peer_id`: releases only
    /// if that peer was the holder.
    pub async fn on_mining_finish(&self, peer_id: &str) {
        let mut state = self.state.lock().await;
        if state.holder.as_deref() == Some(peer_id) {
            state.holder = None;
            state.expiry = None;
        }
    }

    pub async fn is_held(&self) -> bool {
        let mut state = self.state.lock().await;
        self.expire_if_needed(&mut state);
        state.holder.is_some()
    }

    fn expire_if_needed(&self, state: &mut LockState) {
        if let Some(expiry) = state.expiry {
            if Instant::now() >= expiry {
                debug!(holder = ?state.holder, "mining lock expired without MINING_FINISH");
                state.holder = None;
                state.expiry = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_request_then_release_round_trips() {
        let lock = MiningLock::new("self".into());
        assert!(lock.request_local().await);
        assert!(!lock.request_local().await, "already held locally");
        assert!(lock.release_local().await);
        assert!(lock.request_local().await, "free again after release");
    }

    #[tokio::test]
    async fn mining_start_from_other_peer_blocks_local_request() {
        let lock = MiningLock::new("self".into());
        lock.on_mining_start("peer-a").await;
        assert!(!lock.request_local().await);
    }

    #[tokio::test]
    async fn mining_finish_only_releases_its_own_holder() {
        let lock = MiningLock::new("self".into());
        lock.on_mining_start("peer-a").await;
        lock.on_mining_finish("peer-b").await;
        assert!(lock.is_held().await, "finish from non-holder must not release");
        lock.on_mining_finish("peer-a").await;
        assert!(!lock.is_held().await);
    }
}
