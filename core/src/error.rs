//! Ledger engine error taxonomy (spec.md §7), styled on the teacher's
//! `#[error(...)]` + `#[from]` conversion pattern (`node/src/chain.rs`'s
//! `ChainError`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("block failed validation: {0}")]
    Validation(String),

    #[error("chain file is corrupt and cannot be parsed: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("I/O error accessing ledger storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("key error: {0}")]
    Key(String),
}

impl From<ledgerpdf_crypto::KeyError> for LedgerError {
    fn from(e: ledgerpdf_crypto::KeyError) -> Self {
        LedgerError::Key(e.to_string())
    }
}
