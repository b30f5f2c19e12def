//! Framed transport: `MAGIC || LEN || PAYLOAD` over any async byte stream
//! (spec.md §4.A). Reads use "read exactly N" semantics throughout — short
//! reads loop inside `tokio::io::AsyncReadExt::read_exact` — so `receive`
//! never returns a partial frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::message::Message;

pub const MAGIC: &[u8; 17] = b"6022h@1nV@116@t0r";
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Serializes `message` and writes `MAGIC || LEN || PAYLOAD` in a single
/// `write_all` call so no partial frame is ever observable to a peer mid-send.
pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(message).expect("Message serialization cannot fail");
    let len = payload.len() as u32;

    let mut frame = Vec::with_capacity(MAGIC.len() + 4 + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);

    writer.write_all(&frame).await.map_err(classify_write_error)
}

fn classify_write_error(e: std::io::Error) -> TransportError {
    use std::io::ErrorKind::*;
    match e.kind() {
        BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}

async fn read_exact_n<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; n];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::ConnectionClosed),
        Err(e) => Err(classify_write_error(e)),
    }
}

/// Reads exactly one frame and parses its payload. Never returns a partial
/// frame: every field is read with "read exactly N" semantics first.
pub async fn receive<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, TransportError> {
    let magic = read_exact_n(reader, MAGIC.len()).await?;
    if magic != MAGIC {
        return Err(TransportError::Protocol);
    }

    let len_bytes = read_exact_n(reader, 4).await?;
    let len = u32::from_be_bytes(len_bytes.try_into().expect("read_exact_n(4) returns 4 bytes"));
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(len, MAX_FRAME_SIZE));
    }

    let payload = read_exact_n(reader, len as usize).await?;
    let text = std::str::from_utf8(&payload).map_err(|e| TransportError::MalformedPayload(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| TransportError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TipPayload;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_single_frame() {
        let (mut a, mut b) = duplex(4096);
        let msg = Message::Ping(TipPayload { chain_height: 7, latest_hash: "deadbeef".into() });
        send(&mut a, &msg).await.unwrap();
        let received = receive(&mut b).await.unwrap();
        assert_eq!(received.type_name(), "PING");
    }

    #[tokio::test]
    async fn concatenated_frames_decode_in_order() {
        let (mut a, mut b) = duplex(8192);
        let first = Message::MiningStart(crate::message::EmptyPayload {});
        let second = Message::MiningFinish(crate::message::EmptyPayload {});
        send(&mut a, &first).await.unwrap();
        send(&mut a, &second).await.unwrap();

        assert_eq!(receive(&mut b).await.unwrap().type_name(), "MINING_START");
        assert_eq!(receive(&mut b).await.unwrap().type_name(), "MINING_FINISH");
    }

    #[tokio::test]
    async fn garbage_before_magic_is_a_protocol_error() {
        let (mut a, mut b) = duplex(128);
        a.write_all(b"garbage-not-magic").await.unwrap();
        let err = receive(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_frame_too_large() {
        let (mut a, mut b) = duplex(128);
        a.write_all(MAGIC).await.unwrap();
        a.write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes()).await.unwrap();
        let err = receive(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge(_, _)));
    }

    #[tokio::test]
    async fn truncation_mid_payload_is_connection_closed() {
        let (mut a, mut b) = duplex(128);
        a.write_all(MAGIC).await.unwrap();
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        let err = receive(&mut b).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
