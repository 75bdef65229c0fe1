//! # Peer Wire Messages
//!
//! Framing and parsing for the BitTorrent peer wire protocol. Every message
//! exchanged after the handshake uses the same layout:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length prefix**: 4 bytes (big-endian u32), counts ID + payload
//! - **Message ID**: 1 byte
//! - **Payload**: `length - 1` bytes of ID-specific data
//!
//! A length prefix of zero is a keep-alive: no ID, no payload. [`Message::read`]
//! surfaces keep-alives as `None` so callers can ignore them without a
//! sentinel ID.
//!
//! ## Message IDs
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index (u32) |
//! | 5 | BITFIELD | raw bitfield bytes |
//! | 6 | REQUEST | index, begin, length (u32 each) |
//! | 7 | PIECE | index, begin (u32 each), then block bytes |
//! | 8 | CANCEL | index, begin, length (u32 each) |

use std::io::{Cursor, Read};

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const CHOKE: u8 = 0;
pub const UNCHOKE: u8 = 1;
pub const INTERESTED: u8 = 2;
pub const NOT_INTERESTED: u8 = 3;
pub const HAVE: u8 = 4;
pub const BITFIELD: u8 = 5;
pub const REQUEST: u8 = 6;
pub const PIECE: u8 = 7;
pub const CANCEL: u8 = 8;

// Largest frame we accept. A 16 KiB block plus headers fits with a wide
// margin, anything past this is a broken or hostile peer.
const MAX_FRAME_LEN: usize = (1 << 20) + 9;

/// One framed peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: u8,
    /// Message payload data
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a payload-less message.
    pub fn new(id: u8) -> Message {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a message carrying a payload.
    pub fn with_payload(id: u8, payload: Vec<u8>) -> Message {
        Message { id, payload }
    }

    /// Build a HAVE message for a piece index.
    pub fn have(index: u32) -> Message {
        let mut payload = vec![];
        payload
            .write_u32::<BigEndian>(index)
            .expect("write to vec cannot fail");

        Message::with_payload(HAVE, payload)
    }

    /// Build a REQUEST message for a block within a piece.
    pub fn request(index: u32, begin: u32, length: u32) -> Message {
        let mut payload = vec![];
        payload
            .write_u32::<BigEndian>(index)
            .expect("write to vec cannot fail");
        payload
            .write_u32::<BigEndian>(begin)
            .expect("write to vec cannot fail");
        payload
            .write_u32::<BigEndian>(length)
            .expect("write to vec cannot fail");

        Message::with_payload(REQUEST, payload)
    }

    /// Serialize the message with its length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        let frame_len = 1 + self.payload.len();

        let mut serialized = Vec::with_capacity(4 + frame_len);
        serialized
            .write_u32::<BigEndian>(frame_len as u32)
            .expect("write to vec cannot fail");
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        serialized
    }

    /// Read one framed message from a stream.
    ///
    /// Returns `Ok(None)` for a keep-alive (zero length prefix). Fails if the
    /// stream closes mid-message or the announced length exceeds the frame
    /// cap.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Message>> {
        // Read length prefix
        let frame_len = reader.read_u32::<BigEndian>()? as usize;

        // A zero length is a keep-alive
        if frame_len == 0 {
            return Ok(None);
        }

        if frame_len > MAX_FRAME_LEN {
            return Err(anyhow!("message of {frame_len} bytes exceeds frame cap"));
        }

        // Read ID and payload
        let mut frame = vec![0; frame_len];
        reader.read_exact(&mut frame)?;

        let id = frame[0];
        let payload = frame[1..].to_vec();

        Ok(Some(Message { id, payload }))
    }

    /// Extract the piece index from a HAVE message.
    pub fn parse_have(&self) -> Result<u32> {
        if self.id != HAVE {
            return Err(anyhow!("expected HAVE, got message ID {}", self.id));
        }
        if self.payload.len() != 4 {
            return Err(anyhow!(
                "HAVE payload is {} bytes, expected 4",
                self.payload.len()
            ));
        }

        let index = Cursor::new(&self.payload).read_u32::<BigEndian>()?;

        Ok(index)
    }

    /// Copy the block carried by a PIECE message into `buf` at the offset the
    /// peer declared, returning the block length.
    ///
    /// Fails if the message is not a PIECE, the payload is truncated, the
    /// piece index does not match `expected_index`, or the block would land
    /// outside `buf`.
    pub fn parse_piece(&self, expected_index: u32, buf: &mut [u8]) -> Result<usize> {
        if self.id != PIECE {
            return Err(anyhow!("expected PIECE, got message ID {}", self.id));
        }
        if self.payload.len() < 8 {
            return Err(anyhow!(
                "PIECE payload is {} bytes, expected at least 8",
                self.payload.len()
            ));
        }

        let mut cursor = Cursor::new(&self.payload);
        let index = cursor.read_u32::<BigEndian>()?;
        if index != expected_index {
            return Err(anyhow!(
                "PIECE is for piece {index}, expected {expected_index}"
            ));
        }

        let begin = cursor.read_u32::<BigEndian>()? as usize;
        let block = &self.payload[8..];
        if begin + block.len() > buf.len() {
            return Err(anyhow!(
                "block [{}:{}] overruns piece of {} bytes",
                begin,
                begin + block.len(),
                buf.len()
            ));
        }

        buf[begin..begin + block.len()].copy_from_slice(block);

        Ok(block.len())
    }
}

/// The four-byte frame a keep-alive serializes to.
pub fn keep_alive_frame() -> [u8; 4] {
    [0; 4]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_without_payload() {
        let serialized = Message::new(CHOKE).serialize();

        assert_eq!(serialized, vec![0, 0, 0, 1, 0]);
    }

    #[test]
    fn serialize_with_payload() {
        let msg = Message::with_payload(HAVE, vec![0x12, 0x34, 0x56, 0x78]);

        assert_eq!(msg.serialize(), vec![0, 0, 0, 5, 4, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn serialize_request() {
        let serialized = Message::request(1, 16384, 2048).serialize();

        assert_eq!(serialized[0..4], [0, 0, 0, 13]);
        assert_eq!(serialized[4], REQUEST);
        assert_eq!(serialized[5..9], [0, 0, 0, 1]);
        assert_eq!(serialized[9..13], [0, 0, 64, 0]);
        assert_eq!(serialized[13..17], [0, 0, 8, 0]);
    }

    #[test]
    fn read_round_trips_every_message_kind() {
        let messages = vec![
            Message::new(CHOKE),
            Message::new(UNCHOKE),
            Message::new(INTERESTED),
            Message::new(NOT_INTERESTED),
            Message::have(42),
            Message::with_payload(BITFIELD, vec![0b1010_0000]),
            Message::request(0, 0, 16384),
            Message::with_payload(PIECE, vec![0, 0, 0, 0, 0, 0, 0, 0, 9, 9, 9]),
        ];

        for original in messages {
            let serialized = original.serialize();
            let read_back = Message::read(&mut serialized.as_slice()).unwrap();
            assert_eq!(read_back, Some(original));
        }
    }

    #[test]
    fn read_keep_alive() {
        let frame = keep_alive_frame();
        let msg = Message::read(&mut frame.as_slice()).unwrap();

        assert!(msg.is_none());
    }

    #[test]
    fn read_rejects_oversized_frame() {
        let frame = [0xFF, 0xFF, 0xFF, 0xFF];

        assert!(Message::read(&mut frame.as_slice()).is_err());
    }

    #[test]
    fn read_fails_on_truncated_stream() {
        // Announces 5 bytes but carries 2
        let frame = [0, 0, 0, 5, 7, 1];

        assert!(Message::read(&mut frame.as_slice()).is_err());
    }

    #[test]
    fn parse_have_extracts_index() {
        let msg = Message::have(1234);

        assert_eq!(msg.parse_have().unwrap(), 1234);
    }

    #[test]
    fn parse_have_rejects_wrong_id() {
        let msg = Message::new(UNCHOKE);

        assert!(msg.parse_have().is_err());
    }

    #[test]
    fn parse_have_rejects_short_payload() {
        let msg = Message::with_payload(HAVE, vec![0, 0, 1]);

        assert!(msg.parse_have().is_err());
    }

    #[test]
    fn parse_piece_copies_block_at_offset() {
        let mut payload = vec![];
        payload.extend_from_slice(&[0, 0, 0, 3]); // index 3
        payload.extend_from_slice(&[0, 0, 0, 2]); // begin 2
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let msg = Message::with_payload(PIECE, payload);

        let mut buf = [0u8; 8];
        let n = msg.parse_piece(3, &mut buf).unwrap();

        assert_eq!(n, 3);
        assert_eq!(buf, [0, 0, 0xAA, 0xBB, 0xCC, 0, 0, 0]);
    }

    #[test]
    fn parse_piece_rejects_wrong_index() {
        let mut payload = vec![0, 0, 0, 1, 0, 0, 0, 0];
        payload.push(0xAA);
        let msg = Message::with_payload(PIECE, payload);

        let mut buf = [0u8; 4];
        assert!(msg.parse_piece(0, &mut buf).is_err());
    }

    #[test]
    fn parse_piece_rejects_block_past_buffer() {
        let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 6];
        payload.extend_from_slice(&[1, 2, 3]);
        let msg = Message::with_payload(PIECE, payload);

        let mut buf = [0u8; 8];
        assert!(msg.parse_piece(0, &mut buf).is_err());
    }

    #[test]
    fn parse_piece_rejects_truncated_payload() {
        let msg = Message::with_payload(PIECE, vec![0, 0, 0, 0, 0]);

        let mut buf = [0u8; 4];
        assert!(msg.parse_piece(0, &mut buf).is_err());
    }
}
