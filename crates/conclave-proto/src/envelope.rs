//! Envelope type combining header and payload.
//!
//! An `Envelope` is the transport unit handed to the dispatcher:
//! - 86-byte raw binary header (Big Endian)
//! - Variable-length CBOR payload bytes (already encoded)
//!
//! This is a pure data holder. For typed access see
//! [`crate::ClosedGroupUpdate::into_envelope`] and
//! [`crate::ClosedGroupUpdate::from_envelope`].

use bytes::{BufMut, Bytes};

use crate::{
    EnvelopeHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol envelope.
///
/// Layout on the wire:
/// `[EnvelopeHeader: 86 bytes, raw binary] + [payload: variable bytes]`
///
/// # Invariants
///
/// - Size Consistency: `payload.len()` MUST match `header.payload_size()`.
///   Enforced by [`Envelope::new`] and verified by [`Envelope::decode`].
/// - Size Limit: `payload.len()` MUST NOT exceed
///   [`EnvelopeHeader::MAX_PAYLOAD_SIZE`]. Checked on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope header
    pub header: EnvelopeHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Envelope {
    /// Create an envelope, setting `payload_size` from the payload.
    ///
    /// Payloads longer than `u32::MAX` saturate the size field; they are
    /// rejected by [`Envelope::encode`] regardless.
    #[must_use]
    pub fn new(mut header: EnvelopeHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Encode envelope into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds the maximum
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > EnvelopeHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: EnvelopeHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(EnvelopeHeader::SIZE + self.payload.len());
        self.encode(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Decode envelope from wire format.
    ///
    /// Does NOT deserialize the payload. Trailing bytes after the declared
    /// payload are ignored.
    ///
    /// # Errors
    ///
    /// - Header errors from [`EnvelopeHeader::from_bytes`]
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes than claimed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = EnvelopeHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = EnvelopeHeader::SIZE.saturating_add(payload_size);

        let payload = bytes.get(EnvelopeHeader::SIZE..total_size).ok_or(
            ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(EnvelopeHeader::SIZE),
            },
        )?;

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}
