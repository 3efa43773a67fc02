//! Packet framing over a byte stream
//!
//! Wire format of one frame:
//! ```text
//! [length: 3 bytes LE] [sequence: 1 byte] [payload: length bytes]
//! ```
//! A logical packet spans frames until one carries fewer than
//! [`MAX_FRAME_SIZE`] bytes, so a payload that is an exact multiple of the
//! maximum ends with an empty frame.

use crate::constants::{HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{ProtocolError, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub sequence: u8,
}

impl FrameHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let len = self.length as u32;
        [len as u8, (len >> 8) as u8, (len >> 16) as u8, self.sequence]
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as usize,
            sequence: bytes[3],
        }
    }
}

/// Sequence-numbered packet reader/writer owning its stream and buffer
#[derive(Debug)]
pub struct PacketStream<S> {
    stream: S,
    sequence: u8,
    buf: Vec<u8>,
}

impl<S> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
            buf: Vec::new(),
        }
    }

    /// Sequence number expected on the next frame read or written
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start a new exchange
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> PacketStream<S> {
    /// Read one logical packet. The returned payload borrows the internal buffer
    /// and stays valid until the next read.
    pub async fn read_packet(&mut self) -> Result<&[u8]> {
        self.buf.clear();
        let mut first = true;

        loop {
            let header = self.read_header(first).await?;
            first = false;

            if header.sequence != self.sequence {
                self.buf.clear();
                return Err(ProtocolError::SequenceMismatch {
                    expected: self.sequence,
                    actual: header.sequence,
                });
            }
            debug!(length = header.length, sequence = header.sequence, "Reading frame");

            let start = self.buf.len();
            self.buf
                .try_reserve(header.length)
                .map_err(|_| ProtocolError::BufferGrowth {
                    requested: header.length,
                })?;
            self.buf.resize(start + header.length, 0);
            self.stream.read_exact(&mut self.buf[start..]).await?;

            self.sequence = self.sequence.wrapping_add(1);

            if header.length < MAX_FRAME_SIZE {
                debug!("Read {} byte packet", self.buf.len());
                return Ok(&self.buf);
            }
        }
    }

    /// A stream ending before the first byte of a packet is a clean close;
    /// ending anywhere later is a short read.
    async fn read_header(&mut self, first: bool) -> Result<FrameHeader> {
        let mut header = [0u8; FrameHeader::SIZE];
        if self.stream.read(&mut header[..1]).await? == 0 {
            return Err(if first {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::Io(io::ErrorKind::UnexpectedEof.into())
            });
        }
        self.stream.read_exact(&mut header[1..]).await?;
        Ok(FrameHeader::from_bytes(header))
    }
}

impl<S: AsyncWrite + Unpin> PacketStream<S> {
    /// Write one logical packet, splitting it into frames as needed
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut chunks = payload.chunks(MAX_FRAME_SIZE);

        loop {
            let chunk = chunks.next().unwrap_or(&[]);
            let header = FrameHeader {
                length: chunk.len(),
                sequence: self.sequence,
            };

            self.stream.write_all(&header.to_bytes()).await?;
            self.stream.write_all(chunk).await?;
            debug!(length = chunk.len(), sequence = self.sequence, "Wrote frame");

            self.sequence = self.sequence.wrapping_add(1);

            if chunk.len() < MAX_FRAME_SIZE {
                break;
            }
        }

        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(size: usize) {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let mut writer = PacketStream::new(Vec::new());
        writer.write_packet(&payload).await.unwrap();
        let wire = writer.into_inner();

        let frames = size / MAX_FRAME_SIZE + 1;
        assert_eq!(wire.len(), size + frames * HEADER_SIZE, "size {size}");

        let mut reader = PacketStream::new(&wire[..]);
        let read = reader.read_packet().await.unwrap();
        assert!(read == &payload[..], "payload mismatch for size {size}");
        assert_eq!(reader.sequence() as usize, frames);
    }

    #[tokio::test]
    async fn test_split_and_reassemble() {
        for size in [0, 1, 16_777_214, 16_777_215, 16_777_216, 33_554_430] {
            roundtrip(size).await;
        }
    }

    #[tokio::test]
    async fn test_exact_boundary_emits_empty_frame() {
        let payload = vec![7u8; MAX_FRAME_SIZE];
        let mut writer = PacketStream::new(Vec::new());
        writer.write_packet(&payload).await.unwrap();
        let wire = writer.into_inner();

        assert_eq!(&wire[..4], &[0xff, 0xff, 0xff, 0x00]);
        let tail = &wire[4 + MAX_FRAME_SIZE..];
        assert_eq!(tail, &[0x00, 0x00, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn test_consecutive_frames_increment_sequence() {
        let payload = vec![1u8; MAX_FRAME_SIZE * 2 + 10];
        let mut writer = PacketStream::new(Vec::new());
        writer.write_packet(&payload).await.unwrap();
        let wire = writer.into_inner();

        let second = 4 + MAX_FRAME_SIZE;
        let third = second + 4 + MAX_FRAME_SIZE;
        assert_eq!(wire[3], 0);
        assert_eq!(wire[second + 3], 1);
        assert_eq!(wire[third + 3], 2);
        assert_eq!(&wire[third..third + 3], &[10, 0, 0]);
    }

    #[tokio::test]
    async fn test_sequence_wraps() {
        let mut writer = PacketStream::new(Vec::new());
        for _ in 0..255 {
            writer.write_packet(b"x").await.unwrap();
        }
        assert_eq!(writer.sequence(), 255);
        writer.write_packet(b"y").await.unwrap();
        assert_eq!(writer.sequence(), 0);
        let wire = writer.into_inner();
        assert_eq!(wire[wire.len() - 2], 255);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_rejected() {
        let wire = [0x03, 0x00, 0x00, 0x05, b'a', b'b', b'c'];
        let mut reader = PacketStream::new(&wire[..]);
        match reader.read_packet().await {
            Err(ProtocolError::SequenceMismatch { expected, actual }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mismatch_in_continuation_frame() {
        let mut wire = FrameHeader { length: MAX_FRAME_SIZE, sequence: 0 }.to_bytes().to_vec();
        wire.extend(std::iter::repeat(0u8).take(MAX_FRAME_SIZE));
        wire.extend_from_slice(&FrameHeader { length: 1, sequence: 3 }.to_bytes());
        wire.push(9);

        let mut reader = PacketStream::new(&wire[..]);
        assert!(matches!(
            reader.read_packet().await,
            Err(ProtocolError::SequenceMismatch { expected: 1, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_is_connection_closed() {
        let mut reader = PacketStream::new(&[0u8; 0][..]);
        assert!(matches!(
            reader.read_packet().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_short_body_is_io_error() {
        let wire = [0x05, 0x00, 0x00, 0x00, b'a', b'b'];
        let mut reader = PacketStream::new(&wire[..]);
        match reader.read_packet().await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_header_and_body() {
        for len in 1..HEADER_SIZE {
            let wire = [0x05, 0x00, 0x00];
            let mut reader = PacketStream::new(&wire[..len]);
            match reader.read_packet().await {
                Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
                other => panic!("unexpected result for {len} header bytes: {other:?}"),
            }
        }

        let mut wire = FrameHeader { length: MAX_FRAME_SIZE, sequence: 0 }.to_bytes().to_vec();
        wire.extend(std::iter::repeat(1u8).take(MAX_FRAME_SIZE));
        wire.extend_from_slice(&[0x01, 0x00]);
        let mut reader = PacketStream::new(&wire[..]);
        match reader.read_packet().await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_between_exchanges() {
        let mut writer = PacketStream::new(Vec::new());
        writer.write_packet(b"first").await.unwrap();
        writer.reset_sequence();
        writer.write_packet(b"second").await.unwrap();
        let wire = writer.into_inner();

        let mut reader = PacketStream::new(&wire[..]);
        assert_eq!(reader.read_packet().await.unwrap(), b"first");
        reader.reset_sequence();
        assert_eq!(reader.read_packet().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = PacketStream::new(client);
        let mut server = PacketStream::new(server);

        let payload = vec![0x5a; 1000];
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_packet(&payload).await.unwrap();
        });

        assert_eq!(server.read_packet().await.unwrap(), &expected[..]);
        writer.await.unwrap();
    }
}
