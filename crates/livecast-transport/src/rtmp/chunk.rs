//! RTMP chunk stream framing, outbound direction.
//!
//! ```text
//! +--------------+-----------------+--------------------+------------+
//! | Basic header | Message header  | Extended timestamp | Chunk data |
//! | 1-3 bytes    | 0, 3, 7, 11     | 0 or 4 bytes       | <= size    |
//! +--------------+-----------------+--------------------+------------+
//! ```
//!
//! A message longer than the negotiated chunk size goes out as one header
//! chunk followed by type-3 continuation chunks.

use bytes::{BufMut, Bytes, BytesMut};

use crate::payload::split_payload;

/// Chunk size both peers assume until a Set Chunk Size arrives.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Largest value a Set Chunk Size message may carry (31 bits).
pub const MAX_CHUNK_SIZE: usize = 0x7FFF_FFFF;

/// Timestamps at or above this value move to the extended field.
pub const EXTENDED_TIMESTAMP: u32 = 0x00FF_FFFF;

/// Message type ids used by a publisher.
pub mod message_type {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACKNOWLEDGEMENT: u8 = 3;
    pub const USER_CONTROL: u8 = 4;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;
}

/// Conventional chunk stream ids.
pub mod chunk_stream {
    pub const CONTROL: u32 = 2;
    pub const COMMAND: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const VIDEO: u32 = 6;
}

/// Message header format of the first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// Full 11-byte header.
    Zero,
    /// Same stream id: delta, length and type.
    One,
    /// Same stream id, length and type: delta only.
    Two,
    /// No message header.
    Three,
}

impl ChunkType {
    fn fmt_bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    fn message_header_len(self) -> usize {
        match self {
            Self::Zero => 11,
            Self::One => 7,
            Self::Two => 3,
            Self::Three => 0,
        }
    }
}

/// An application-level RTMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpMessage {
    pub message_type: u8,
    pub stream_id: u32,
    /// Absolute timestamp for type 0 chunks, delta otherwise.
    pub timestamp: u32,
    pub payload: Bytes,
}

impl RtmpMessage {
    pub fn new(message_type: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            message_type,
            stream_id,
            timestamp,
            payload,
        }
    }

    /// Protocol control message announcing our outbound chunk size.
    pub fn set_chunk_size(size: usize) -> Self {
        let size = size.clamp(1, MAX_CHUNK_SIZE) as u32;
        Self::new(
            message_type::SET_CHUNK_SIZE,
            0,
            0,
            Bytes::copy_from_slice(&size.to_be_bytes()),
        )
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A message bound to a chunk stream, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpChunk {
    pub chunk_type: ChunkType,
    pub chunk_stream_id: u32,
    pub message: RtmpMessage,
}

impl RtmpChunk {
    pub fn new(chunk_type: ChunkType, chunk_stream_id: u32, message: RtmpMessage) -> Self {
        Self {
            chunk_type,
            chunk_stream_id,
            message,
        }
    }

    fn has_extended_timestamp(&self) -> bool {
        self.chunk_type != ChunkType::Three && self.message.timestamp >= EXTENDED_TIMESTAMP
    }

    /// Header of the first chunk.
    pub fn header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 + self.chunk_type.message_header_len() + 4);
        write_basic_header(self.chunk_stream_id, self.chunk_type, &mut buf);

        let timestamp = self.message.timestamp.min(EXTENDED_TIMESTAMP);
        match self.chunk_type {
            ChunkType::Zero => {
                write_u24(timestamp, &mut buf);
                write_u24(self.message.len() as u32, &mut buf);
                buf.put_u8(self.message.message_type);
                buf.put_u32_le(self.message.stream_id);
            }
            ChunkType::One => {
                write_u24(timestamp, &mut buf);
                write_u24(self.message.len() as u32, &mut buf);
                buf.put_u8(self.message.message_type);
            }
            ChunkType::Two => write_u24(timestamp, &mut buf),
            ChunkType::Three => {}
        }

        if self.has_extended_timestamp() {
            buf.put_u32(self.message.timestamp);
        }

        buf.freeze()
    }

    /// Frame the message into wire chunks carrying at most `max_chunk_size`
    /// payload bytes each, in send order.
    pub fn split(&self, max_chunk_size: usize) -> Vec<Bytes> {
        let pieces = split_payload(&self.message.payload, max_chunk_size);
        let header = self.header();

        if pieces.is_empty() {
            return vec![header];
        }

        let mut continuation = BytesMut::with_capacity(7);
        write_basic_header(self.chunk_stream_id, ChunkType::Three, &mut continuation);
        if self.has_extended_timestamp() {
            continuation.put_u32(self.message.timestamp);
        }
        let continuation = continuation.freeze();

        pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| {
                let prefix = if index == 0 { &header } else { &continuation };
                let mut chunk = BytesMut::with_capacity(prefix.len() + piece.len());
                chunk.put_slice(prefix);
                chunk.put_slice(piece);
                chunk.freeze()
            })
            .collect()
    }
}

fn write_basic_header(csid: u32, chunk_type: ChunkType, buf: &mut BytesMut) {
    let fmt = chunk_type.fmt_bits() << 6;
    if csid >= 64 + 256 {
        let id = csid - 64;
        buf.put_u8(fmt | 1);
        buf.put_u8((id & 0xFF) as u8);
        buf.put_u8(((id >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8(fmt | csid as u8);
    }
}

fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(len: usize, timestamp: u32) -> RtmpChunk {
        let payload: Bytes = (0..len).map(|i| i as u8).collect::<Vec<_>>().into();
        RtmpChunk::new(
            ChunkType::Zero,
            chunk_stream::VIDEO,
            RtmpMessage::new(message_type::VIDEO, 1, timestamp, payload),
        )
    }

    /// Strip chunk headers knowing their sizes, returning the payload.
    fn strip(chunks: &[Bytes], header_len: usize, continuation_len: usize) -> Vec<u8> {
        chunks
            .iter()
            .enumerate()
            .flat_map(|(i, c)| {
                let skip = if i == 0 { header_len } else { continuation_len };
                c[skip..].to_vec()
            })
            .collect()
    }

    #[test]
    fn test_type0_header() {
        let chunk = video(300, 1000);
        let header = chunk.header();

        assert_eq!(header.len(), 12);
        assert_eq!(header[0], chunk_stream::VIDEO as u8);
        assert_eq!(&header[1..4], &[0x00, 0x03, 0xE8]);
        assert_eq!(&header[4..7], &[0x00, 0x01, 0x2C]);
        assert_eq!(header[7], message_type::VIDEO);
        assert_eq!(&header[8..12], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_split_large_message() {
        let chunk = video(300, 0);
        let chunks = chunk.split(128);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 12 + 128);
        assert_eq!(chunks[1].len(), 1 + 128);
        assert_eq!(chunks[2].len(), 1 + 44);
        assert_eq!(chunks[1][0], 0xC0 | chunk_stream::VIDEO as u8);
        assert_eq!(strip(&chunks, 12, 1), chunk.message.payload.to_vec());
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunks = video(256, 0).split(128);

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() >= 128));
    }

    #[test]
    fn test_split_empty_message_sends_header() {
        let chunks = video(0, 0).split(128);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 12);
    }

    #[test]
    fn test_extended_timestamp_repeated_on_continuations() {
        let chunk = video(200, 0x0100_0000);
        let chunks = chunk.split(128);

        assert_eq!(&chunks[0][1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(&chunks[0][12..16], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&chunks[1][1..5], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(strip(&chunks, 16, 5), chunk.message.payload.to_vec());
    }

    #[test]
    fn test_basic_header_two_and_three_bytes() {
        let mut buf = BytesMut::new();
        write_basic_header(100, ChunkType::Zero, &mut buf);
        assert_eq!(&buf[..], &[0x00, 36]);

        let mut buf = BytesMut::new();
        write_basic_header(400, ChunkType::Three, &mut buf);
        assert_eq!(&buf[..], &[0xC1, 0x50, 0x01]);
    }

    #[test]
    fn test_set_chunk_size_payload() {
        let message = RtmpMessage::set_chunk_size(4096);

        assert_eq!(message.message_type, message_type::SET_CHUNK_SIZE);
        assert_eq!(&message.payload[..], &[0x00, 0x00, 0x10, 0x00]);
    }
}
