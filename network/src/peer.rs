//! Peer identity and the durable peer set (spec.md §3 "Peer set", §6
//! "Peers file").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

/// First 16 hex digits of SHA-256(`host:port`).
pub fn derive_peer_id(endpoint: &str) -> String {
    let digest = Sha256::digest(endpoint.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Durable `peer_id -> "host:port"` mapping, persisted as JSON
/// (`data/network/peers.json`). Loaded on startup; rewritten on shutdown
/// and after every successful handshake.
pub struct PeerSet {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl PeerSet {
    pub async fn load(path: PathBuf) -> Self {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "peers file is corrupt; starting with an empty peer set");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        PeerSet {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub async fn remember(&self, peer_id: &str, endpoint: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(peer_id.to_string(), endpoint.to_string());
    }

    pub async fn endpoints(&self) -> Vec<String> {
        self.entries.lock().await.values().cloned().collect()
    }

    pub async fn save(&self) -> std::io::Result<()> {
        let entries = self.entries.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&*entries)?;
        tokio::fs::write(&self.path, bytes).await
    }
}

pub fn endpoint(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_16_hex_digits_of_sha256() {
        let id = derive_peer_id("127.0.0.1:5000");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let expected = hex::encode(Sha256::digest(b"127.0.0.1:5000"));
        assert_eq!(id, expected[..16]);
    }

    #[tokio::test]
    async fn peer_set_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        {
            let set = PeerSet::load(path.clone()).await;
            set.remember("abc123", "10.0.0.1:5000").await;
            set.save().await.unwrap();
        }
        let reloaded = PeerSet::load(path).await;
        assert_eq!(reloaded.endpoints().await, vec!["10.0.0.1:5000".to_string()]);
    }
}
