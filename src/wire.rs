//! Frame codec: `token:u64-LE ‖ length:u32-LE ‖ payload[length]`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    error::{Error, Result},
    query::Token,
};

/// Maximum payload size for a single frame.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const HEADER_LEN: usize = 12;

/// Encodes a single frame: the 8-byte little-endian token, the 4-byte little-endian payload
/// length, then the payload itself. Fails with
/// [`crate::error::ErrorKind::FrameTooLarge`] when the payload exceeds [`MAX_FRAME_LEN`].
pub fn encode(token: Token, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| Error::frame_too_large(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::frame_too_large(len));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&token.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Writes a single frame to `writer`, serialized as one atomic `write_all` call so that the
/// header and payload can never be interleaved with another frame's bytes on the wire.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    token: Token,
    payload: &[u8],
) -> Result<()> {
    let frame = encode(token, payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads exactly one frame from `reader`: a full read of the 12-byte header, validated against
/// [`MAX_FRAME_LEN`], followed by a full read of the payload. Partial reads at either boundary
/// are handled transparently by `read_exact`; a short read surfaces as the underlying I/O error.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(Token, Vec<u8>)> {
    let mut header = [0_u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (token, len) = decode_header(&header)?;
    if len > MAX_FRAME_LEN {
        return Err(Error::frame_too_large(len));
    }
    let mut payload = vec![0_u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok((token, payload))
}

/// Decodes a 12-byte header into `(token, length)`.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(Token, u32)> {
    let token = Token::from_le_bytes(header[0..8].try_into().expect("8-byte slice"));
    let len = u32::from_le_bytes(header[8..12].try_into().expect("4-byte slice"));
    Ok((token, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_then_read_frame_round_trips() {
        let payload = br#"[1,[14,["test"]],{}]"#;
        let frame = encode(7, payload).unwrap();
        let (token, len) = decode_header(frame[..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(token, 7);
        assert_eq!(len as usize, payload.len());

        let mut cursor = std::io::Cursor::new(frame);
        let (token, read_payload) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(token, 7);
        assert_eq!(read_payload, payload);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let oversized = vec![0_u8; MAX_FRAME_LEN as usize + 1];
        let err = encode(1, &oversized).unwrap_err();
        assert!(matches!(
            *err.kind,
            crate::error::ErrorKind::FrameTooLarge { .. }
        ));
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_declared_length() {
        let mut header = Vec::new();
        header.extend_from_slice(&1_u64.to_le_bytes());
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let mut cursor = std::io::Cursor::new(header);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(
            *err.kind,
            crate::error::ErrorKind::FrameTooLarge { .. }
        ));
    }

    #[tokio::test]
    async fn read_frame_surfaces_io_error_on_short_header() {
        let mut cursor = std::io::Cursor::new(vec![0_u8; 4]);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}
