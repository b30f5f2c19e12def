//! CLI configuration shared by every subcommand (spec.md §6 defaults),
//! modeled on the teacher's `NodeConfig` (`clap::Parser` + a `validate`
//! method the binary calls before doing anything with the arguments).

use std::path::PathBuf;

use clap::Args;

/// Ledger location and mining difficulty, flattened into every subcommand
/// that touches the chain.
#[derive(Args, Debug, Clone)]
pub struct LedgerArgs {
    /// Path to the persisted chain file.
    #[arg(long, default_value = "data/blockchain/chain.json")]
    pub chain_path: PathBuf,

    /// Proof-of-work difficulty: required leading hex-zero digits.
    #[arg(long, default_value_t = 3)]
    pub difficulty: usize,
}

impl LedgerArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.difficulty == 0 {
            anyhow::bail!("difficulty must be at least 1");
        }
        Ok(())
    }

    pub fn ledger_config(&self) -> ledgerpdf_core::LedgerConfig {
        ledgerpdf_core::LedgerConfig {
            path: self.chain_path.clone(),
            difficulty: self.difficulty,
        }
    }
}

/// Listen address and peer persistence for the networked `serve` subcommand.
#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// Host/interface to bind the P2P listener on.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// P2P listen port.
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Path to the durable peer endpoint list.
    #[arg(long, default_value = "data/network/peers.json")]
    pub peers_path: PathBuf,

    /// Peers to dial on startup in addition to the persisted peer set
    /// (`host:port`, repeatable).
    #[arg(long = "peer")]
    pub seed_peers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_difficulty_is_rejected() {
        let args = LedgerArgs { chain_path: "x".into(), difficulty: 0 };
        assert!(args.validate().is_err());
    }

    #[test]
    fn default_difficulty_is_accepted() {
        let args = LedgerArgs { chain_path: "x".into(), difficulty: 3 };
        assert!(args.validate().is_ok());
    }
}
