//! Interfaces that let `ledgerpdf-consensus` and `ledgerpdf-network`
//! cooperate with each other and with this crate's ledger without either
//! depending on the other (spec.md §4.D, §4.E.5).
//!
//! The mining worker needs to ask "is a sync running?" and "can I hold the
//! network mining lock?" without knowing anything about sockets; the P2P
//! node needs to pre-empt whatever PoW the worker is doing when a
//! competing head block arrives without knowing anything about document
//! queues. Both sides depend only on these traits, defined here in the
//! shared core crate, and the binary crate wires the concrete
//! implementations together.

use async_trait::async_trait;

/// The network-facing half of the cooperation: queried and driven by the
/// mining worker (spec.md §4.D steps 1 and 3, §4.E.5 `request_lock`/
/// `release_lock`).
#[async_trait]
pub trait MiningCoordinator: Send + Sync {
    /// True while a chain sync is in flight; the worker pauses rather than
    /// waste PoW on a tip that is about to move.
    async fn is_sync_in_progress(&self) -> bool;

    /// Attempts to acquire the network mining lock. Broadcasts
    /// `MINING_START` and returns `true` on success; returns `false`
    /// immediately if another peer already holds it.
    async fn request_lock(&self) -> bool;

    /// Releases a lock this node holds, broadcasting `MINING_FINISH`.
    /// A no-op if this node is not the current holder.
    async fn release_lock(&self);
}

/// The ledger-facing half: the P2P node calls this when a `NEW_BLOCK`
/// arrives for the height the worker is currently mining, so the in-flight
/// PoW attempt is cancelled before the node appends the peer's block
/// (spec.md §4.E.4 "signal the mining worker to interrupt").
pub trait MinerControl: Send + Sync {
    fn interrupt_current(&self);
}

/// A coordinator for single-node operation (tests, or a node started with
/// no peers): sync never runs and the lock is always free, so the worker
/// behaves as if it always holds an uncontested lock.
#[derive(Debug, Default)]
pub struct NullCoordinator;

#[async_trait]
impl MiningCoordinator for NullCoordinator {
    async fn is_sync_in_progress(&self) -> bool {
        false
    }

    async fn request_lock(&self) -> bool {
        true
    }

    async fn release_lock(&self) {}
}
