//! Block model and canonical hashing (spec.md §3).

use sha2::{Digest, Sha256};

use crate::digest::page_digest;

/// Current block format version; part of the hash pre-image.
pub const BLOCK_VERSION: u32 = 1;

pub const GENESIS_SIGNATURE: &str = "N/A_GENESIS_SIGNATURE";
pub const GENESIS_MESSAGE: &str = "Genesis Block";

/// A page submitted for a document, plus the PEM public key that should
/// verify `signature` over `page_digest(content, title, page + 1)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PageRecord {
    pub title: String,
    pub page: u64,
    pub content: String,
    pub public_key: String,
}

/// Block payload: either the genesis sentinel or a page record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockData {
    Genesis,
    Page(PageRecord),
}

impl BlockData {
    /// `data_canonical`: a deterministic JSON serialization of the map
    /// (keys sorted ascending, no whitespace). Relies on `serde_json::Map`
    /// being BTreeMap-backed (the `preserve_order` feature is not enabled
    /// anywhere in this workspace) so object keys come out sorted, and on
    /// `serde_json::to_string` already omitting whitespace by default.
    fn canonical(&self) -> String {
        let value = self.to_value();
        serde_json::to_string(&value).expect("serializing a constructed Value cannot fail")
    }

    fn to_value(&self) -> serde_json::Value {
        match self {
            BlockData::Genesis => serde_json::json!({ "message": GENESIS_MESSAGE }),
            BlockData::Page(p) => serde_json::json!({
                "title": p.title,
                "page": p.page,
                "content": p.content,
                "public_key": p.public_key,
            }),
        }
    }

    pub fn as_page(&self) -> Option<&PageRecord> {
        match self {
            BlockData::Page(p) => Some(p),
            BlockData::Genesis => None,
        }
    }
}

impl serde::Serialize for BlockData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for BlockData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if let Some(obj) = value.as_object() {
            if obj.contains_key("message") && !obj.contains_key("title") {
                return Ok(BlockData::Genesis);
            }
        }
        let page: PageRecord = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
        Ok(BlockData::Page(page))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: i64,
    pub version: u32,
    pub data: BlockData,
    pub signature: String,
    pub nonce: i64,
    pub current_hash: String,
}

impl Block {
    /// Builds the canonical pre-image string: plain concatenation (no
    /// delimiter) of the stringified fields, in this order.
    fn preimage(&self) -> String {
        format!(
            "{}{}{}{}{}{}{}",
            self.index,
            self.previous_hash,
            self.timestamp,
            self.version,
            self.data.canonical(),
            self.signature,
            self.nonce
        )
    }

    /// Recomputes `current_hash`: hex SHA-256 of the raw SHA-256 digest
    /// bytes of the canonical pre-image (double hash).
    pub fn recompute_hash(&self) -> String {
        let first = Sha256::digest(self.preimage().as_bytes());
        let second = Sha256::digest(first);
        hex::encode(second)
    }

    /// Number of leading hex-zero digits in `current_hash`.
    pub fn leading_zero_hex_digits(&self) -> usize {
        self.current_hash.chars().take_while(|c| *c == '0').count()
    }

    /// Genesis block: index 0, previous_hash "0", timestamp 0, fixed
    /// sentinel data/signature, mined under the given difficulty.
    pub fn genesis(difficulty: usize) -> Block {
        let mut block = Block {
            index: 0,
            previous_hash: "0".to_string(),
            timestamp: 0,
            version: BLOCK_VERSION,
            data: BlockData::Genesis,
            signature: GENESIS_SIGNATURE.to_string(),
            nonce: 0,
            current_hash: String::new(),
        };
        let (nonce, hash) = mine(&block, difficulty, &crate::cancel::CancelToken::new())
            .expect("genesis mining is never cancelled");
        block.nonce = nonce;
        block.current_hash = hash;
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == "0"
    }

    /// Recomputes the page digest this block's signature should verify
    /// against, using the stored page record's `(content, title, page+1)`.
    pub fn expected_page_digest(&self) -> Option<String> {
        self.data
            .as_page()
            .map(|p| page_digest(&p.content, &p.title, p.page as i64 + 1))
    }
}

/// Mines `block` by trying nonces 0, 1, 2, … until `current_hash` has at
/// least `difficulty` leading hex-zero digits, or until `cancel` is
/// observed set. The cancellation flag is checked once per nonce attempt.
/// Returns `None` when cancelled (the caller treats this as the `-1`
/// sentinel from spec.md §4.C).
pub fn mine(block: &Block, difficulty: usize, cancel: &crate::cancel::CancelToken) -> Option<(i64, String)> {
    let mut candidate = block.clone();
    let mut nonce: i64 = 0;
    loop {
        if cancel.is_set() {
            return None;
        }
        candidate.nonce = nonce;
        let hash = candidate.recompute_hash();
        if hash.chars().take(difficulty).all(|c| c == '0') {
            return Some((nonce, hash));
        }
        nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_expected_fields() {
        let genesis = Block::genesis(1);
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.timestamp, 0);
        assert_eq!(genesis.signature, GENESIS_SIGNATURE);
        assert!(genesis.leading_zero_hex_digits() >= 1);
    }

    #[test]
    fn recompute_hash_matches_stored_hash_after_mining() {
        let genesis = Block::genesis(1);
        assert_eq!(genesis.current_hash, genesis.recompute_hash());
    }

    #[test]
    fn mutating_any_field_changes_the_recomputed_hash() {
        let genesis = Block::genesis(1);
        let mut mutated = genesis.clone();
        mutated.timestamp += 1;
        assert_ne!(mutated.recompute_hash(), genesis.current_hash);
    }

    #[test]
    fn data_canonical_sorts_keys_and_has_no_whitespace() {
        let page = BlockData::Page(PageRecord {
            title: "T".into(),
            page: 0,
            content: "hello".into(),
            public_key: "PEM".into(),
        });
        let canonical = page.canonical();
        assert!(!canonical.contains(' '));
        // object keys must appear in ascending sorted order
        let content_pos = canonical.find("\"content\"").unwrap();
        let page_pos = canonical.find("\"page\"").unwrap();
        let public_key_pos = canonical.find("\"public_key\"").unwrap();
        let title_pos = canonical.find("\"title\"").unwrap();
        assert!(content_pos < page_pos && page_pos < public_key_pos && public_key_pos < title_pos);
    }

    #[test]
    fn mining_cancellation_returns_none() {
        let genesis = Block::genesis(1);
        let mut candidate = genesis.clone();
        candidate.index = 1;
        candidate.previous_hash = genesis.current_hash.clone();
        let cancel = crate::cancel::CancelToken::new();
        cancel.set();
        assert!(mine(&candidate, 8, &cancel).is_none());
    }
}
