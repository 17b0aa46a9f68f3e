//! Message types for the binary relay protocol.

/// One-byte tag at offset 0 of every frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Server to clients: full membership snapshot
    Roster = 0,
    /// Both directions: timestamp echo used for latency
    Heartbeat = 1,
    /// Client to server: nickname update
    Nickname = 2,
    /// Client to server, relayed to peers: pointer/drawing event
    Motion = 3,
}

impl MessageTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Roster),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Nickname),
            3 => Some(Self::Motion),
            _ => None,
        }
    }

    /// Shortest frame that is valid for this tag.
    pub fn min_len(self) -> usize {
        match self {
            Self::Roster => 1,
            Self::Heartbeat => 10,
            Self::Nickname | Self::Motion => 2,
        }
    }
}

impl From<MessageTag> for u8 {
    fn from(tag: MessageTag) -> Self {
        tag as u8
    }
}

/// A decoded client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage<'a> {
    /// Echo of a server heartbeat
    Heartbeat { timestamp: u64 },
    /// Requested display name (lossily decoded UTF-8, not yet truncated)
    Nickname(String),
    /// Opaque motion payload; the whole frame is relayed after restamping
    Motion(&'a [u8]),
}
