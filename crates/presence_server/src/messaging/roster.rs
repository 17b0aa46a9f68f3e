//! Roster snapshot encoding.
//!
//! A roster frame is tag `0` followed by one fixed 17-byte record per live
//! connection, in registry order:
//!
//! ```text
//! offset  size  field
//!      0     1  identity (slot, pointer index, or the observer sentinel)
//!      1    10  nickname, raw UTF-8 truncated or zero-padded to 10 bytes
//!     11     4  IPv4 address, big-endian (0 when not representable)
//!     15     2  latency in milliseconds, big-endian
//! ```

use super::types::MessageTag;
use std::net::IpAddr;

/// Width of the nickname field.
pub const NICKNAME_FIELD_LEN: usize = 10;

/// Size of one roster record.
pub const RECORD_LEN: usize = 1 + NICKNAME_FIELD_LEN + 4 + 2;

/// One connection as it appears in a roster frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub identity: u8,
    pub nickname: String,
    pub remote_address: String,
    pub latency_ms: u16,
}

impl RosterEntry {
    fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.identity);

        let mut nickname = [0u8; NICKNAME_FIELD_LEN];
        let bytes = self.nickname.as_bytes();
        let len = bytes.len().min(NICKNAME_FIELD_LEN);
        nickname[..len].copy_from_slice(&bytes[..len]);
        buffer.extend_from_slice(&nickname);

        buffer.extend_from_slice(&pack_ipv4(&self.remote_address).to_be_bytes());
        buffer.extend_from_slice(&self.latency_ms.to_be_bytes());
    }
}

/// Encodes a roster frame, or `None` when there is nobody to describe.
pub fn encode_roster(entries: &[RosterEntry]) -> Option<Vec<u8>> {
    if entries.is_empty() {
        return None;
    }

    let mut buffer = Vec::with_capacity(1 + RECORD_LEN * entries.len());
    buffer.push(MessageTag::Roster.into());
    for entry in entries {
        entry.encode_into(&mut buffer);
    }
    Some(buffer)
}

/// Packs a stored address into the roster's 32-bit field.
///
/// Any `" (n)"` de-duplication suffix is ignored. IPv4-mapped IPv6 addresses
/// unwrap to their IPv4 form; every other address packs as 0.
pub fn pack_ipv4(address: &str) -> u32 {
    let base = address.split(" (").next().unwrap_or_default().trim();
    match base.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => u32::from(v4),
        Ok(IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(u32::from).unwrap_or(0),
        Err(_) => 0,
    }
}

/// A roster record as read back by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterRecord {
    pub identity: u8,
    pub nickname: [u8; NICKNAME_FIELD_LEN],
    pub address: u32,
    pub latency_ms: u16,
}

impl RosterRecord {
    /// Nickname with the zero padding stripped.
    pub fn nickname_lossy(&self) -> String {
        let end = self
            .nickname
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NICKNAME_FIELD_LEN);
        String::from_utf8_lossy(&self.nickname[..end]).into_owned()
    }
}

/// Parses a roster frame into its records. `None` if the frame is not a
/// well-formed roster.
pub fn decode_roster(frame: &[u8]) -> Option<Vec<RosterRecord>> {
    let (&tag, records) = frame.split_first()?;
    if tag != MessageTag::Roster as u8 || records.len() % RECORD_LEN != 0 {
        return None;
    }

    let parsed = records
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let mut nickname = [0u8; NICKNAME_FIELD_LEN];
            nickname.copy_from_slice(&record[1..11]);
            RosterRecord {
                identity: record[0],
                nickname,
                address: u32::from_be_bytes([record[11], record[12], record[13], record[14]]),
                latency_ms: u16::from_be_bytes([record[15], record[16]]),
            }
        })
        .collect();
    Some(parsed)
}
