//! Ledger engine and page-digest core: spec.md components B and C.
//!
//! This crate owns the block model, the chained page digest, the
//! append-only ledger (PoW, validation, persistence, the derived document
//! index) and the small interfaces ([`coordinator::MiningCoordinator`],
//! [`text_matcher::TextMatcher`]) that let the consensus and network
//! crates cooperate with it without a circular dependency.

pub mod block;
pub mod cancel;
pub mod coordinator;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod text_matcher;

pub use block::{Block, BlockData, PageRecord, BLOCK_VERSION, GENESIS_MESSAGE, GENESIS_SIGNATURE};
pub use cancel::CancelToken;
pub use coordinator::{MinerControl, MiningCoordinator, NullCoordinator};
pub use digest::page_digest;
pub use error::LedgerError;
pub use ledger::{AppendRecord, Ledger, LedgerConfig};
pub use text_matcher::{MatchKind, TextMatch, TextMatcher};
