//! Transfer metadata framing: 4-byte LE length prefix + bincode payload.
//! The file bytes that follow the frame are raw, terminated by connection
//! close.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

const LEN_SIZE: usize = 4;
/// A metadata frame only ever carries a name and a size; anything bigger is
/// garbage.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// First frame of every transfer: what the payload is and how long it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub file_name: String,
    pub size: u64,
}

/// Encode metadata into a single frame: 4 bytes LE length + bincode payload.
pub fn encode_frame(metadata: &TransferMetadata) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(metadata).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding metadata into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the metadata and the
/// number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(TransferMetadata, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let metadata: TransferMetadata =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((metadata, LEN_SIZE + len))
}

/// Read exactly one metadata frame off the stream. The receiver calls this
/// before touching the byte stream in any other way.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<TransferMetadata, FrameDecodeError> {
    let mut len_buf = [0u8; LEN_SIZE];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(FrameDecodeError::Truncated)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(FrameDecodeError::Truncated)?;
    bincode::deserialize(&payload).map_err(FrameDecodeError::Decode)
}

/// Error decoding a frame (short buffer, size limit, truncated stream, or
/// bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("stream ended inside the frame: {0}")]
    Truncated(#[source] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransferMetadata {
        TransferMetadata {
            file_name: "a.txt".into(),
            size: 5,
        }
    }

    #[test]
    fn roundtrip() {
        let metadata = sample();
        let frame = encode_frame(&metadata).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn partial_buffer_needs_more() {
        let frame = encode_frame(&sample()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut frame = encode_frame(&sample()).unwrap();
        frame[..LEN_SIZE].copy_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[tokio::test]
    async fn read_frame_from_stream_leaves_payload_bytes() {
        let metadata = sample();
        let mut bytes = encode_frame(&metadata).unwrap();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5]);
        let mut reader = std::io::Cursor::new(bytes);
        let decoded = read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded, metadata);
        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn read_frame_on_closed_stream_is_truncated() {
        let frame = encode_frame(&sample()).unwrap();
        let mut reader = std::io::Cursor::new(frame[..frame.len() - 1].to_vec());
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameDecodeError::Truncated(_))
        ));
    }
}
