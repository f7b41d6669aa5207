//! Member and group public keys.
//!
//! Both are 33 bytes on the wire: the X25519 type prefix `0x05` followed by
//! the 32-byte Montgomery point. A member's public key is also the key peers
//! wrap group key material for, so [`PublicKey::x25519_bytes`] feeds straight
//! into Diffie-Hellman.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::errors::{ProtocolError, Result};

/// Size of a serialized public key (prefix + X25519 point).
pub const KEY_SIZE: usize = 33;

/// Type prefix identifying an X25519 key.
pub const X25519_PREFIX: u8 = 0x05;

fn decode_key(bytes: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| ProtocolError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: bytes.len(),
    })?;
    if arr[0] != X25519_PREFIX {
        return Err(ProtocolError::InvalidKeyPrefix(arr[0]));
    }
    Ok(arr)
}

fn decode_hex_key(s: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;
    decode_key(&bytes)
}

fn with_prefix(point: [u8; 32]) -> [u8; KEY_SIZE] {
    let mut arr = [0u8; KEY_SIZE];
    arr[0] = X25519_PREFIX;
    arr[1..].copy_from_slice(&point);
    arr
}

/// Identity of a participant.
///
/// Ordering is bytewise so member sets iterate deterministically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// The all-zero key. Used as "no sender" and never a valid member.
    pub const ZERO: Self = Self([0u8; KEY_SIZE]);

    /// Build from a raw X25519 public point.
    #[must_use]
    pub fn from_x25519(point: [u8; 32]) -> Self {
        Self(with_prefix(point))
    }

    /// Wrap 33 raw bytes without validation.
    ///
    /// Header fields are taken verbatim from the wire; callers that need a
    /// usable key go through [`Self::from_slice`].
    #[must_use]
    pub const fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse and validate a serialized key.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidKeyLength` unless exactly 33 bytes
    /// - `ProtocolError::InvalidKeyPrefix` if the first byte is not `0x05`
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        decode_key(bytes).map(Self)
    }

    /// Parse the 66-character hex rendering.
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_key(s).map(Self)
    }

    /// Lowercase hex rendering (66 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Serialized bytes including the prefix.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Serialized bytes as an owned vector (payload form).
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// The X25519 point without the type prefix.
    #[must_use]
    pub fn x25519_bytes(&self) -> [u8; 32] {
        let mut point = [0u8; 32];
        point.copy_from_slice(&self.0[1..]);
        point
    }

    /// True for [`Self::ZERO`].
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars after the prefix are enough to tell members apart in logs
        write!(f, "PublicKey({}..)", &self.to_hex()[2..10])
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Public half of the throwaway key pair that names a group.
///
/// Generated once at creation, private half discarded. Never changes for the
/// lifetime of the group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupPublicKey([u8; KEY_SIZE]);

impl GroupPublicKey {
    /// Build from a raw X25519 public point.
    #[must_use]
    pub fn from_x25519(point: [u8; 32]) -> Self {
        Self(with_prefix(point))
    }

    /// Wrap 33 raw bytes without validation.
    #[must_use]
    pub const fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse and validate a serialized key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        decode_key(bytes).map(Self)
    }

    /// Parse the 66-character hex rendering.
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex_key(s).map(Self)
    }

    /// Lowercase hex rendering (66 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Serialized bytes including the prefix.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for GroupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupPublicKey({}..)", &self.to_hex()[2..10])
    }
}

impl Serialize for GroupPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for GroupPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_keeps_prefix() {
        let key = PublicKey::from_x25519([7u8; 32]);
        let rendered = key.to_hex();

        assert_eq!(rendered.len(), 66);
        assert!(rendered.starts_with("05"));
        assert_eq!(PublicKey::from_hex(&rendered).unwrap(), key);
        assert_eq!(key.x25519_bytes(), [7u8; 32]);
    }

    #[test]
    fn rejects_wrong_length_and_prefix() {
        assert_eq!(
            PublicKey::from_slice(&[0x05; 32]),
            Err(ProtocolError::InvalidKeyLength { expected: 33, actual: 32 })
        );

        let mut bytes = [1u8; 33];
        bytes[0] = 0x03;
        assert_eq!(PublicKey::from_slice(&bytes), Err(ProtocolError::InvalidKeyPrefix(0x03)));
        assert!(matches!(PublicKey::from_hex("zz"), Err(ProtocolError::InvalidHex(_))));
    }

    #[test]
    fn zero_key_is_empty() {
        assert!(PublicKey::ZERO.is_zero());
        assert!(!PublicKey::from_x25519([0u8; 32]).is_zero());
    }

    #[test]
    fn serde_uses_hex_string() {
        let key = GroupPublicKey::from_x25519([9u8; 32]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&key, &mut buf).unwrap();

        let decoded: String = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded, key.to_hex());

        let back: GroupPublicKey = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, key);
    }
}
