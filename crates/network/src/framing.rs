//! Message framing: `magic(4) command(12) length(4) checksum(4) payload`.

use crate::message::Message;
use crate::{NetworkError, NetworkResult, MAX_PAYLOAD_SIZE};
use appchain_core::hash256;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const COMMAND_SIZE: usize = 12;
pub const HEADER_SIZE: usize = 4 + COMMAND_SIZE + 4 + 4;

fn checksum(payload: &[u8]) -> u32 {
    let hash = hash256(payload);
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Encodes one frame.
pub fn encode_frame(magic: u32, message: &Message) -> Vec<u8> {
    let payload = message.encode();
    let mut command = [0u8; COMMAND_SIZE];
    let name = message.command().as_bytes();
    command[..name.len()].copy_from_slice(name);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&magic.to_le_bytes());
    frame.extend_from_slice(&command);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Reads and decodes one frame.
///
/// A wrong magic, oversize length, bad checksum or undecodable payload is
/// a protocol violation; socket errors surface as `Connection`.
pub async fn read_frame<R>(reader: &mut R, magic: u32) -> NetworkResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let frame_magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if frame_magic != magic {
        return Err(NetworkError::protocol_violation(
            "frame",
            format!("magic 0x{frame_magic:08x}, expected 0x{magic:08x}"),
        ));
    }
    let command_bytes = &header[4..4 + COMMAND_SIZE];
    let end = command_bytes
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(COMMAND_SIZE);
    let command = std::str::from_utf8(&command_bytes[..end])
        .map_err(|_| NetworkError::protocol_violation("frame", "command is not UTF-8"))?
        .to_string();
    let length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(NetworkError::PayloadTooLarge {
            size: length,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let expected = u32::from_le_bytes([header[20], header[21], header[22], header[23]]);

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    if checksum(&payload) != expected {
        return Err(NetworkError::protocol_violation(
            "frame",
            format!("checksum mismatch on {command}"),
        ));
    }
    Message::decode(&command, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::PingPayload;

    const MAGIC: u32 = 0x0074_6E41;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let message = Message::Ping(PingPayload::new(9, 3));
        let frame = encode_frame(MAGIC, &message);
        assert_eq!(frame.len(), HEADER_SIZE + 12);
        let decoded = read_frame(&mut frame.as_slice(), MAGIC).await.unwrap();
        assert_eq!(decoded, message);

        let verack = encode_frame(MAGIC, &Message::Verack);
        assert_eq!(read_frame(&mut verack.as_slice(), MAGIC).await.unwrap(), Message::Verack);
    }

    #[tokio::test]
    async fn test_wrong_magic_rejected() {
        let frame = encode_frame(MAGIC, &Message::Verack);
        let err = read_frame(&mut frame.as_slice(), MAGIC + 1).await.unwrap_err();
        assert!(matches!(err, NetworkError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_payload_rejected() {
        let mut frame = encode_frame(MAGIC, &Message::Ping(PingPayload::new(9, 3)));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = read_frame(&mut frame.as_slice(), MAGIC).await.unwrap_err();
        assert!(matches!(err, NetworkError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_oversize_length_rejected() {
        let mut frame = encode_frame(MAGIC, &Message::Verack);
        frame[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = read_frame(&mut frame.as_slice(), MAGIC).await.unwrap_err();
        assert!(matches!(err, NetworkError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_connection_error() {
        let frame = encode_frame(MAGIC, &Message::Verack);
        let err = read_frame(&mut &frame[..10], MAGIC).await.unwrap_err();
        assert!(matches!(err, NetworkError::Connection(_)));
    }
}
