//! Length-prefixed frame codec.
//!
//! Frames carry opaque payloads; the codec knows nothing about the JSON
//! inside. Two faces: a pure streaming [`FrameDecoder`] for callers that
//! own their read loop, and [`read_frame`]/[`write_frame`] helpers that
//! operate directly on async stream halves.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ProtocolError;

/// Default cap on a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Encode one payload as a frame: 4-byte big-endian length, then payload.
pub fn encode_frame(payload: &[u8], max_frame_bytes: usize) -> Result<Bytes, ProtocolError> {
    if payload.len() > max_frame_bytes || payload.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: max_frame_bytes,
        });
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Streaming frame parser.
///
/// Bytes arrive in arbitrary chunks via [`feed`](Self::feed);
/// [`next_frame`](Self::next_frame) yields complete payloads exactly once,
/// in stream order. Single-threaded per connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    /// Create a decoder with the given payload cap.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
        }
    }

    /// Append raw bytes read from the stream.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame payload, if any.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A length prefix
    /// beyond the cap fails with [`ProtocolError::FrameTooLarge`] before
    /// the payload is buffered; the decoder is unusable afterwards and
    /// the connection must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        // Peek the length without consuming it.
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if len > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            });
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Read one frame payload from an async stream half.
///
/// Clean EOF on the length prefix maps to
/// [`ProtocolError::ConnectionClosed`]; EOF mid-frame is an IO error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Bytes, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_frame_bytes,
        });
    }

    let mut payload = BytesMut::with_capacity(len);
    payload.resize(len, 0);
    reader.read_exact(&mut payload).await?;
    Ok(payload.freeze())
}

/// Write one framed payload to an async stream half and flush.
///
/// Callers serialize concurrent writers on a send lock; this function
/// performs a single logical write so frames never interleave.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<(), ProtocolError> {
    let encoded = encode_frame(payload, max_frame_bytes)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_prefixes_length() {
        let frame = encode_frame(b"hello", DEFAULT_MAX_FRAME_BYTES).unwrap();
        assert_eq!(&frame[..4], &5u32.to_be_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let payload = vec![0u8; 9];
        let err = encode_frame(&payload, 8).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { size: 9, max: 8 }
        ));
    }

    #[test]
    fn test_decoder_roundtrip() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        let frame = encode_frame(b"payload", DEFAULT_MAX_FRAME_BYTES).unwrap();

        decoder.feed(&frame);
        let out = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&out[..], b"payload");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_empty_payload() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        decoder.feed(&encode_frame(b"", DEFAULT_MAX_FRAME_BYTES).unwrap());
        let out = decoder.next_frame().unwrap().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_decoder_split_across_three_reads() {
        // One frame fed as 1 byte, 3 bytes, then the remainder.
        let frame = encode_frame(b"split frame body", DEFAULT_MAX_FRAME_BYTES).unwrap();
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);

        decoder.feed(&frame[..1]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[1..4]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[4..]);

        let out = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&out[..], b"split frame body");
    }

    #[test]
    fn test_decoder_back_to_back_frames() {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&encode_frame(b"first", DEFAULT_MAX_FRAME_BYTES).unwrap());
        bytes.extend_from_slice(&encode_frame(b"second", DEFAULT_MAX_FRAME_BYTES).unwrap());

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
        decoder.feed(&bytes);

        assert_eq!(&decoder.next_frame().unwrap().unwrap()[..], b"first");
        assert_eq!(&decoder.next_frame().unwrap().unwrap()[..], b"second");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_rejects_oversized_before_payload_arrives() {
        let mut decoder = FrameDecoder::new(16);
        // Only the length prefix of a 1 MiB frame; payload never sent.
        decoder.feed(&(1024u32 * 1024).to_be_bytes());
        let err = decoder.next_frame().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_async_read_write_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"over the wire", DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        let payload = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        assert_eq!(&payload[..], b"over the wire");
    }

    #[tokio::test]
    async fn test_read_frame_reports_closed_on_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame(&mut server, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = encode_frame(&payload, DEFAULT_MAX_FRAME_BYTES).unwrap();
            let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
            decoder.feed(&frame);
            let out = decoder.next_frame().unwrap().unwrap();
            prop_assert_eq!(&out[..], &payload[..]);
        }

        #[test]
        fn prop_arbitrary_fragmentation_preserves_order(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..128), 1..8),
            chunk in 1usize..64,
        ) {
            let mut wire = Vec::new();
            for p in &payloads {
                wire.extend_from_slice(&encode_frame(p, DEFAULT_MAX_FRAME_BYTES).unwrap());
            }

            let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                decoder.feed(piece);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    decoded.push(frame.to_vec());
                }
            }

            prop_assert_eq!(decoded, payloads);
        }
    }
}
