//! Wire message types (spec.md §4.E.2). The dynamic-dispatch-by-`type`-field
//! pattern the source uses is replaced by a closed, tagged enum: unknown
//! tags fail to deserialize at the frame boundary instead of being routed
//! to a catch-all handler (spec.md §9 REDESIGN FLAGS).

use ledgerpdf_core::Block;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub peer_id: String,
    pub protocol_version: u32,
    pub chain_height: u64,
    pub latest_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub peer_id: String,
    pub chain_height: u64,
    pub latest_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipPayload {
    pub chain_height: u64,
    pub latest_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub start: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksPayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
}

/// Closed sum of every message type this protocol version understands.
/// Serializes to exactly `{"type": "...", "payload": {...}}`, matching
/// spec.md §4.A's frame payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Hello(HelloPayload),
    Welcome(WelcomePayload),
    Ping(TipPayload),
    Pong(TipPayload),
    GetBlocks(GetBlocksPayload),
    Blocks(BlocksPayload),
    NewBlock(NewBlockPayload),
    MiningStart(EmptyPayload),
    MiningFinish(EmptyPayload),
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Hello(_) => "HELLO",
            Message::Welcome(_) => "WELCOME",
            Message::Ping(_) => "PING",
            Message::Pong(_) => "PONG",
            Message::GetBlocks(_) => "GET_BLOCKS",
            Message::Blocks(_) => "BLOCKS",
            Message::NewBlock(_) => "NEW_BLOCK",
            Message::MiningStart(_) => "MINING_START",
            Message::MiningFinish(_) => "MINING_FINISH",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_type_and_payload_keys() {
        let msg = Message::Ping(TipPayload { chain_height: 3, latest_hash: "abc".into() });
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "PING");
        assert_eq!(value["payload"]["chain_height"], 3);
    }

    #[test]
    fn unknown_type_fails_to_deserialize() {
        let raw = r#"{"type": "EVIL_TYPE", "payload": {}}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }

    #[test]
    fn empty_payload_messages_still_carry_a_payload_object() {
        let msg = Message::MiningStart(EmptyPayload {});
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"], serde_json::json!({}));
    }
}
