//! Cryptographic envelope for RGAP announcements.
//!
//! Signing is HMAC-SHA256 over a fixed domain-separation prefix followed by
//! the serialized [`crate::wire::AnnouncementData`], keyed by a 32-byte
//! pre-shared key. Verification is constant-time via `hmac`'s `verify_slice`.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zerocopy::AsBytes;

use crate::wire::{Announcement, SIGNATURE_PREFIX};

type HmacSha256 = Hmac<Sha256>;

/// Size of a pre-shared key, in bytes.
pub const PSK_SIZE: usize = 32;

/// A 32-byte pre-shared key shared by every member of a redundancy group.
#[derive(Clone, PartialEq, Eq)]
pub struct Psk([u8; PSK_SIZE]);

impl Psk {
    pub fn from_bytes(bytes: [u8; PSK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh PSK from a cryptographically secure RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PSK_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a lowercase (or uppercase) hex string. Must be exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let decoded = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        let bytes: [u8; PSK_SIZE] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::WrongKeyLength(v.len()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PSK_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Psk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Psk(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("PSK is not valid hexadecimal")]
    InvalidHex,
    #[error("PSK has wrong length: {0} bytes, expected {PSK_SIZE}")]
    WrongKeyLength(usize),
    #[error("HMAC could not be computed with the given key length")]
    KeyRejected,
}

/// Compute the HMAC-SHA256 signature for an announcement's data, keyed by `psk`.
pub fn sign(data: &crate::wire::AnnouncementData, psk: &Psk) -> Result<[u8; 32], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(psk.as_bytes()).map_err(|_| CryptoError::KeyRejected)?;
    mac.update(SIGNATURE_PREFIX);
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// Build a fully signed announcement from its data and a PSK.
pub fn seal(data: crate::wire::AnnouncementData, psk: &Psk) -> Result<Announcement, CryptoError> {
    let signature = sign(&data, psk)?;
    Ok(Announcement { data, signature })
}

/// Verify an announcement's signature in constant time.
///
/// Returns `Ok(true)` / `Ok(false)` for a normal match/mismatch; `Err` only
/// if the HMAC itself could not be constructed (never happens for a 32-byte
/// PSK, but surfaced rather than panicking).
pub fn verify(announcement: &Announcement, psk: &Psk) -> Result<bool, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(psk.as_bytes()).map_err(|_| CryptoError::KeyRejected)?;
    mac.update(SIGNATURE_PREFIX);
    mac.update(announcement.data.as_bytes());
    Ok(mac.verify_slice(&announcement.signature).is_ok())
}
