//! Envelope header with zero-copy parsing.
//!
//! The `EnvelopeHeader` is a fixed 86-byte structure serialized as raw binary
//! (Big Endian). Receivers read the kind, group and sender straight out of the
//! buffer, which lets them discard updates for unknown groups or from
//! themselves without parsing CBOR.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    GroupPublicKey, PublicKey, UpdateKind,
    errors::{ProtocolError, Result},
    keys::KEY_SIZE,
};

/// Fixed 86-byte envelope header (Big Endian network byte order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits means any 86-byte
/// pattern is a valid header value, so casting untrusted network bytes cannot
/// cause undefined behavior. Only magic, version and payload size are checked
/// here; the kind byte is checked when the payload is decoded, and sender and
/// group are authenticated by the transport, not by this header.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EnvelopeHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],          // 0x43475632 ("CGV2" in ASCII)
    version: u8,             // 0x01
    pub(crate) kind: u8,     // UpdateKind
    reserved: [u8; 2],       // zero
    // Payload metadata (12 bytes: 8-19)
    pub(crate) payload_size: [u8; 4], // u32 payload length
    sent_timestamp: [u8; 8],          // u64 unix millis at the sender

    // Routing (66 bytes: 20-85)
    group_public_key: [u8; KEY_SIZE],
    sender: [u8; KEY_SIZE],
}

impl EnvelopeHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 86;

    /// Magic number: "CGV2" in ASCII.
    pub const MAGIC: u32 = 0x4347_5632;

    /// Current envelope version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB). A `New` for a full group is a few KiB.
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a header for the given update kind with zeroed routing fields.
    #[must_use]
    pub fn new(kind: UpdateKind) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&Self::MAGIC.to_be_bytes());
        bytes[4] = Self::VERSION;
        bytes[5] = kind.to_u8();

        Self::read_from_bytes(&bytes)
            .unwrap_or_else(|_| unreachable!("buffer is exactly Self::SIZE bytes"))
    }

    /// Parse header from network bytes (zero-copy, safe).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if buffer is shorter than 86 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Envelope version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw kind byte.
    #[must_use]
    pub fn kind_byte(&self) -> u8 {
        self.kind
    }

    /// Update kind. `None` if unrecognized.
    #[must_use]
    pub fn kind(&self) -> Option<UpdateKind> {
        UpdateKind::from_u8(self.kind)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Sender's clock when the update was sent (unix millis).
    #[must_use]
    pub fn sent_timestamp(&self) -> u64 {
        u64::from_be_bytes(self.sent_timestamp)
    }

    /// Group the update targets, unvalidated.
    #[must_use]
    pub fn group_public_key(&self) -> GroupPublicKey {
        GroupPublicKey::from_array(self.group_public_key)
    }

    /// Sender identity, unvalidated. All zeros if unset.
    #[must_use]
    pub fn sender(&self) -> PublicKey {
        PublicKey::from_array(self.sender)
    }

    /// Set the sender's timestamp.
    pub fn set_sent_timestamp(&mut self, millis: u64) {
        self.sent_timestamp = millis.to_be_bytes();
    }

    /// Set the target group.
    pub fn set_group_public_key(&mut self, key: &GroupPublicKey) {
        self.group_public_key = *key.as_bytes();
    }

    /// Set the sender identity.
    pub fn set_sender(&mut self, sender: &PublicKey) {
        self.sender = *sender.as_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for EnvelopeHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeHeader")
            .field("version", &self.version())
            .field("kind", &format!("{:#04x}", self.kind_byte()))
            .field("payload_size", &self.payload_size())
            .field("sent_timestamp", &self.sent_timestamp())
            .field("group_public_key", &self.group_public_key())
            .field("sender", &self.sender())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for EnvelopeHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for EnvelopeHeader {}
