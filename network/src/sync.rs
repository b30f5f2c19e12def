//! Pure fork-resolution decision logic (spec.md §4.E.4), kept free of
//! sockets and locks so it can be unit-tested directly. `node.rs` calls
//! `classify` on every `BLOCKS` response and carries out whichever
//! side-effecting case it names.

use ledgerpdf_core::Block;

/// Blocks beyond this depth from the current tip are never rewound in a
/// single sync session, bounding the cost of a pathologically diverging
/// peer (spec.md §4.E.4).
pub const MAX_REWIND_DEPTH: u64 = 2000;

#[derive(Debug, PartialEq, Eq)]
pub enum Classification {
    /// `received[0].index == 0`: either our chain has nothing yet, or a
    /// fork rewind bottomed out at genesis and this is the full resync
    /// that followed. Either way, adopt `received` as the canonical chain.
    AcceptFreshChain,
    /// Local chain is empty and the peer's first block is *not* genesis:
    /// request a full resync instead of accepting a headless batch.
    RequestFull,
    /// `received[0]` continues directly on our tip: validate and append
    /// each block in order.
    SequentialAppend,
    /// A gap between our tip and the received batch.
    Gap { start: u64 },
    /// `received[0]` does not link to our tip: rewind one block and retry.
    Fork { new_height: i64 },
    /// The peer had nothing more to send.
    Empty,
}

pub fn classify(tip: Option<&Block>, received: &[Block]) -> Classification {
    let Some(first) = received.first() else {
        return Classification::Empty;
    };

    if first.index == 0 {
        return Classification::AcceptFreshChain;
    }

    match tip {
        None => Classification::RequestFull,
        Some(tip) => {
            if first.index == tip.index + 1 && first.previous_hash == tip.current_hash {
                Classification::SequentialAppend
            } else if first.index > tip.index + 1 {
                Classification::Gap { start: tip.index + 1 }
            } else {
                Classification::Fork {
                    new_height: tip.index as i64 - 1,
                }
            }
        }
    }
}

/// Whether our tip disagrees with a peer's advertised tip enough to
/// warrant starting a sync (spec.md §4.E.4 "Sync is initiated").
pub fn tips_diverge(our_height: u64, our_hash: &str, peer_height: u64, peer_hash: &str) -> bool {
    peer_height > our_height || (peer_height == our_height && peer_hash != our_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerpdf_core::{Block, BlockData, PageRecord};

    fn block(index: u64, previous_hash: &str) -> Block {
        Block {
            index,
            previous_hash: previous_hash.to_string(),
            timestamp: 0,
            version: 1,
            data: BlockData::Page(PageRecord {
                title: "T".into(),
                page: 0,
                content: "c".into(),
                public_key: "pk".into(),
            }),
            signature: "sig".into(),
            nonce: 0,
            current_hash: format!("hash-{index}"),
        }
    }

    #[test]
    fn sequential_append_when_batch_continues_tip() {
        let tip = block(5, "hash-4");
        let batch = vec![block(6, "hash-5"), block(7, "hash-6")];
        assert_eq!(classify(Some(&tip), &batch), Classification::SequentialAppend);
    }

    #[test]
    fn gap_when_batch_starts_beyond_tip_plus_one() {
        let tip = block(5, "hash-4");
        let batch = vec![block(9, "hash-8")];
        assert_eq!(classify(Some(&tip), &batch), Classification::Gap { start: 6 });
    }

    #[test]
    fn fork_when_batch_does_not_link_to_tip() {
        let tip = block(5, "hash-4");
        let batch = vec![block(5, "some-other-hash")];
        assert_eq!(classify(Some(&tip), &batch), Classification::Fork { new_height: 4 });
    }

    #[test]
    fn genesis_batch_is_always_accepted_fresh() {
        let tip = block(5, "hash-4");
        let batch = vec![block(0, "0")];
        assert_eq!(classify(Some(&tip), &batch), Classification::AcceptFreshChain);
        assert_eq!(classify(None, &batch), Classification::AcceptFreshChain);
    }

    #[test]
    fn empty_chain_with_non_genesis_first_block_requests_full() {
        let batch = vec![block(3, "hash-2")];
        assert_eq!(classify(None, &batch), Classification::RequestFull);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        assert_eq!(classify(Some(&block(5, "hash-4")), &[]), Classification::Empty);
    }

    #[test]
    fn tips_diverge_on_higher_peer_or_same_height_different_hash() {
        assert!(tips_diverge(5, "a", 6, "b"));
        assert!(tips_diverge(5, "a", 5, "b"));
        assert!(!tips_diverge(5, "a", 5, "a"));
        assert!(!tips_diverge(5, "a", 4, "z"));
    }
}
