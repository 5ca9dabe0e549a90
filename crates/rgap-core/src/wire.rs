//! RGAP wire format — the on-wire announcement record.
//!
//! Every field, every size is part of the protocol. All multi-byte integers
//! are big-endian on the wire, expressed here with zerocopy's byte-order
//! wrapper types so the struct stays safely (de)serializable without any
//! manual byte-swapping. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, I64, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Current wire format version.
pub const VERSION: u16 = 0x0100;

/// Domain-separation prefix mixed into the HMAC input. Never transmitted.
pub const SIGNATURE_PREFIX: &[u8] = b"RGAP announce";

/// Size of [`AnnouncementData`] on the wire, in bytes.
pub const ANNOUNCEMENT_DATA_SIZE: usize = 34;

/// Size of [`Announcement`] on the wire, in bytes.
pub const ANNOUNCEMENT_SIZE: usize = 66;

/// The signed payload of an announcement: who, when, at what address.
///
/// Wire size: 34 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct AnnouncementData {
    /// Wire format version. A listener seeing an unknown version drops the packet.
    pub version: U16<BigEndian>,
    /// Redundancy group identifier.
    pub redundancy_id: U64<BigEndian>,
    /// Sender's wall-clock timestamp, microseconds since the Unix epoch.
    pub timestamp: I64<BigEndian>,
    /// Announced address, 16 bytes in IPv6 / IPv4-mapped form.
    pub announced_address: [u8; 16],
}

assert_eq_size!(AnnouncementData, [u8; ANNOUNCEMENT_DATA_SIZE]);

/// A full announcement: the signed data plus its HMAC-SHA256 tag.
///
/// Wire size: 66 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Announcement {
    pub data: AnnouncementData,
    /// HMAC-SHA256 over `SIGNATURE_PREFIX || data`, keyed by the group PSK.
    pub signature: [u8; 32],
}

assert_eq_size!(Announcement, [u8; ANNOUNCEMENT_SIZE]);

impl AnnouncementData {
    pub fn new(version: u16, redundancy_id: u64, timestamp_micros: i64, announced_address: [u8; 16]) -> Self {
        Self {
            version: U16::new(version),
            redundancy_id: U64::new(redundancy_id),
            timestamp: I64::new(timestamp_micros),
            announced_address,
        }
    }

    pub fn version(&self) -> u16 {
        self.version.get()
    }

    pub fn redundancy_id(&self) -> u64 {
        self.redundancy_id.get()
    }

    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp.get()
    }
}

impl Announcement {
    /// Serialize to the canonical 66-byte wire form.
    pub fn marshal(&self) -> [u8; ANNOUNCEMENT_SIZE] {
        let mut out = [0u8; ANNOUNCEMENT_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Parse a 66-byte buffer. Fails if the length is not exactly right.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != ANNOUNCEMENT_SIZE {
            return Err(WireError::WrongLength(bytes.len()));
        }
        Self::read_from(bytes).ok_or(WireError::WrongLength(bytes.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("announcement has wrong length: {0} bytes, expected {ANNOUNCEMENT_SIZE}")]
    WrongLength(usize),
    #[error("unknown announcement version: 0x{0:04x}")]
    UnknownVersion(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Announcement {
        let data = AnnouncementData::new(
            VERSION,
            12345678901234567890u64,
            1_700_000_000_000_000,
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 127, 0, 0, 1],
        );
        Announcement {
            data,
            signature: [0x42; 32],
        }
    }

    #[test]
    fn sizes_are_exact() {
        assert_eq!(std::mem::size_of::<AnnouncementData>(), ANNOUNCEMENT_DATA_SIZE);
        assert_eq!(std::mem::size_of::<Announcement>(), ANNOUNCEMENT_SIZE);
    }

    #[test]
    fn round_trip() {
        let original = sample();
        let bytes = original.marshal();
        assert_eq!(bytes.len(), ANNOUNCEMENT_SIZE);
        let recovered = Announcement::unmarshal(&bytes).unwrap();
        assert_eq!(recovered, original);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = [0u8; 65];
        assert!(matches!(
            Announcement::unmarshal(&bytes),
            Err(WireError::WrongLength(65))
        ));
    }

    #[test]
    fn field_accessors_read_big_endian_values() {
        let a = sample();
        assert_eq!(a.data.version(), VERSION);
        assert_eq!(a.data.timestamp_micros(), 1_700_000_000_000_000);
    }
}
