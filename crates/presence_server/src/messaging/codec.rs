//! Fixed-layout encoding and decoding of relay frames.
//!
//! Byte layouts are the compatibility contract with browser clients:
//!
//! ```text
//! heartbeat  [1][identity][timestamp u64 BE x8]      10 bytes
//! nickname   [2][identity][utf-8 name ...]           >= 2 bytes
//! motion     [3][identity][application payload ...]  >= 2 bytes
//! ```
//!
//! The identity byte of client frames is never trusted; the relay overwrites
//! it with the sender's real identity.

use super::types::{ClientMessage, MessageTag};

/// Offset of the identity byte in every non-roster frame.
pub const IDENTITY_OFFSET: usize = 1;

/// Heartbeat frame: tag, identity, big-endian millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub identity: u8,
    pub timestamp: u64,
}

impl Heartbeat {
    pub const LEN: usize = 10;

    pub fn new(identity: u8, timestamp: u64) -> Self {
        Self { identity, timestamp }
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = MessageTag::Heartbeat.into();
        frame[IDENTITY_OFFSET] = self.identity;
        frame[2..10].copy_from_slice(&self.timestamp.to_be_bytes());
        frame
    }

    /// Parses a heartbeat frame; `None` if the tag or length is wrong.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < Self::LEN || frame[0] != MessageTag::Heartbeat as u8 {
            return None;
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&frame[2..10]);
        Some(Self {
            identity: frame[IDENTITY_OFFSET],
            timestamp: u64::from_be_bytes(timestamp),
        })
    }
}

/// Decodes a frame received from a client.
///
/// Unknown tags, frames shorter than their tag's minimum and roster frames
/// (which only the server emits) all decode to `None`.
pub fn decode_client_frame(frame: &[u8]) -> Option<ClientMessage<'_>> {
    let tag = MessageTag::from_byte(*frame.first()?)?;
    if frame.len() < tag.min_len() {
        return None;
    }

    match tag {
        MessageTag::Heartbeat => Heartbeat::decode(frame).map(|heartbeat| ClientMessage::Heartbeat {
            timestamp: heartbeat.timestamp,
        }),
        MessageTag::Nickname => Some(ClientMessage::Nickname(
            String::from_utf8_lossy(&frame[2..]).into_owned(),
        )),
        MessageTag::Motion => Some(ClientMessage::Motion(frame)),
        MessageTag::Roster => None,
    }
}

/// Overwrites the identity byte of a frame. Returns false if the frame is too
/// short to carry one.
pub fn stamp_identity(frame: &mut [u8], identity: u8) -> bool {
    match frame.get_mut(IDENTITY_OFFSET) {
        Some(byte) => {
            *byte = identity;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_layout() {
        let frame = Heartbeat::new(7, 0x0102_0304_0506_0708).encode();
        assert_eq!(frame, [1, 7, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_decode_heartbeat_echo() {
        let mut frame = Heartbeat::new(3, 1_700_000_000_000).encode().to_vec();
        // Clients may append bytes; only the fixed prefix matters
        frame.push(0xff);
        assert_eq!(
            decode_client_frame(&frame),
            Some(ClientMessage::Heartbeat {
                timestamp: 1_700_000_000_000
            })
        );
    }

    #[test]
    fn test_short_frames_are_ignored() {
        assert_eq!(decode_client_frame(&[]), None);
        assert_eq!(decode_client_frame(&[1, 0, 0, 0]), None);
        assert_eq!(decode_client_frame(&[2]), None);
        assert_eq!(decode_client_frame(&[3]), None);
    }

    #[test]
    fn test_unknown_and_roster_tags_are_ignored() {
        assert_eq!(decode_client_frame(&[9, 1, 2, 3]), None);
        assert_eq!(decode_client_frame(&[0, 1, 2, 3]), None);
    }

    #[test]
    fn test_decode_nickname() {
        assert_eq!(
            decode_client_frame(b"\x02\x05alice"),
            Some(ClientMessage::Nickname("alice".to_string()))
        );
        assert_eq!(
            decode_client_frame(&[2, 0]),
            Some(ClientMessage::Nickname(String::new()))
        );
        assert_eq!(
            decode_client_frame(&[2, 0, b'o', 0xff, b'k']),
            Some(ClientMessage::Nickname("o\u{fffd}k".to_string()))
        );
    }

    #[test]
    fn test_decode_motion_keeps_whole_frame() {
        let frame = [3, 42, 10, 20, 30];
        assert_eq!(decode_client_frame(&frame), Some(ClientMessage::Motion(&frame[..])));
    }

    #[test]
    fn test_stamp_identity() {
        let mut frame = vec![3, 200, 1, 1];
        assert!(stamp_identity(&mut frame, 4));
        assert_eq!(frame, vec![3, 4, 1, 1]);

        let mut tiny = vec![3];
        assert!(!stamp_identity(&mut tiny, 4));
        assert_eq!(tiny, vec![3]);
    }
}
