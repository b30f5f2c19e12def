//! The mining worker: spec.md component D.
//!
//! A single background task that owns a FIFO queue of document tasks,
//! cooperates with a [`ledgerpdf_core::MiningCoordinator`] (sync pause,
//! network mining lock) and exposes itself as a
//! [`ledgerpdf_core::MinerControl`] so the P2P node can pre-empt
//! in-progress PoW when a competing head block arrives.

pub mod worker;

pub use worker::{DocumentTask, MiningWorker, WorkerConfig};
