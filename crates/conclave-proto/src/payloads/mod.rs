//! CBOR-encoded closed-group updates.
//!
//! The envelope header is raw binary; payloads use CBOR for type safety and
//! forward compatibility. [`ClosedGroupUpdate`] covers every message that
//! changes a group's membership, title or key material.
//!
//! # Invariants
//!
//! Each variant maps to exactly one [`UpdateKind`] (enforced by match
//! exhaustiveness). Decoding an encoded update with its own kind yields the
//! same value.

pub mod group;

use bytes::BufMut;

pub use self::group::{
    GroupUpdate, KeyPairData, KeyPairDistribution, KeyPairWrapper, MemberList, NameChange,
    NewGroup,
};
use crate::{
    Envelope, EnvelopeHeader, PublicKey, UpdateKind,
    errors::{ProtocolError, Result},
};

/// A closed-group protocol message.
///
/// The kind is determined by the envelope header, so only the inner struct is
/// serialized (no variant tag in CBOR).
///
/// Updates are transient: consumed once by the receiver, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosedGroupUpdate {
    /// Establishes or overwrites a group's full state
    New(NewGroup),
    /// General title and membership replace
    Update(GroupUpdate),
    /// Additive membership change
    MembersAdded(MemberList),
    /// Subtractive membership change
    MembersRemoved(MemberList),
    /// Title-only change
    NameChange(NameChange),
    /// Sender removes itself
    MemberLeft,
    /// Key rotation distribution
    EncryptionKeyPair(KeyPairDistribution),
}

fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl ClosedGroupUpdate {
    /// Kind corresponding to this variant.
    #[must_use]
    pub const fn kind(&self) -> UpdateKind {
        match self {
            Self::New(_) => UpdateKind::New,
            Self::Update(_) => UpdateKind::Update,
            Self::MembersAdded(_) => UpdateKind::MembersAdded,
            Self::MembersRemoved(_) => UpdateKind::MembersRemoved,
            Self::NameChange(_) => UpdateKind::NameChange,
            Self::MemberLeft => UpdateKind::MemberLeft,
            Self::EncryptionKeyPair(_) => UpdateKind::EncryptionKeyPair,
        }
    }

    /// Structural validity, checked before any state is consulted.
    ///
    /// - `New`: group key, name, both halves of the key pair, at least one
    ///   member and at least one admin are present
    /// - `MembersAdded` / `MembersRemoved`: the member list is non-empty
    /// - `MemberLeft`: the sender is set
    /// - `Update` / `NameChange`: the name is non-empty
    /// - `EncryptionKeyPair`: always valid (an empty distribution is a no-op)
    #[must_use]
    pub fn is_valid(&self, sender: &PublicKey) -> bool {
        match self {
            Self::New(new) => {
                !new.public_key.is_empty()
                    && !new.name.is_empty()
                    && !new.encryption_key_pair.public_key.is_empty()
                    && !new.encryption_key_pair.private_key.is_empty()
                    && !new.members.is_empty()
                    && !new.admins.is_empty()
            },
            Self::MembersAdded(list) | Self::MembersRemoved(list) => !list.members.is_empty(),
            Self::MemberLeft => !sender.is_zero(),
            Self::Update(update) => !update.name.is_empty(),
            Self::NameChange(change) => !change.name.is_empty(),
            Self::EncryptionKeyPair(_) => true,
        }
    }

    /// Encode the payload (no variant tag).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::New(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Update(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MembersAdded(inner) | Self::MembersRemoved(inner) => {
                ciborium::ser::into_writer(inner, &mut writer)
            },
            Self::NameChange(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MemberLeft => Ok(()), // Zero-byte payload
            Self::EncryptionKeyPair(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload given its kind.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the maximum, checked
    ///   before CBOR parsing starts
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(kind: UpdateKind, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > EnvelopeHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: EnvelopeHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let update = match kind {
            UpdateKind::New => Self::New(from_cbor(bytes)?),
            UpdateKind::Update => Self::Update(from_cbor(bytes)?),
            UpdateKind::MembersAdded => Self::MembersAdded(from_cbor(bytes)?),
            UpdateKind::MembersRemoved => Self::MembersRemoved(from_cbor(bytes)?),
            UpdateKind::NameChange => Self::NameChange(from_cbor(bytes)?),
            UpdateKind::MemberLeft => Self::MemberLeft,
            UpdateKind::EncryptionKeyPair => Self::EncryptionKeyPair(from_cbor(bytes)?),
        };

        Ok(update)
    }

    /// Convert into a transport envelope.
    ///
    /// Sets the kind in `header`; routing fields (group, sender, timestamp)
    /// are taken as given.
    pub fn into_envelope(self, mut header: EnvelopeHeader) -> Result<Envelope> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.kind = self.kind().to_u8();
        Ok(Envelope::new(header, buf))
    }

    /// Parse the typed update out of an envelope.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownKind` if the header kind is unrecognized
    /// - Any error from [`Self::decode`]
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let kind = envelope
            .header
            .kind()
            .ok_or(ProtocolError::UnknownKind(envelope.header.kind_byte()))?;
        Self::decode(kind, &envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> Vec<u8> {
        PublicKey::from_x25519([seed; 32]).to_vec()
    }

    fn new_group() -> NewGroup {
        NewGroup {
            public_key: key(9),
            name: "friends".into(),
            encryption_key_pair: KeyPairData {
                public_key: vec![1; 32],
                private_key: vec![2; 32],
            },
            members: vec![key(1), key(2)],
            admins: vec![key(1)],
        }
    }

    #[test]
    fn new_requires_every_field() {
        let sender = PublicKey::from_x25519([1; 32]);
        assert!(ClosedGroupUpdate::New(new_group()).is_valid(&sender));

        let mut missing_name = new_group();
        missing_name.name.clear();
        assert!(!ClosedGroupUpdate::New(missing_name).is_valid(&sender));

        let mut missing_admins = new_group();
        missing_admins.admins.clear();
        assert!(!ClosedGroupUpdate::New(missing_admins).is_valid(&sender));

        let mut missing_secret = new_group();
        missing_secret.encryption_key_pair.private_key.clear();
        assert!(!ClosedGroupUpdate::New(missing_secret).is_valid(&sender));

        let mut missing_key = new_group();
        missing_key.public_key.clear();
        assert!(!ClosedGroupUpdate::New(missing_key).is_valid(&sender));
    }

    #[test]
    fn member_lists_must_be_non_empty() {
        let sender = PublicKey::from_x25519([1; 32]);
        let empty = MemberList { members: vec![] };

        assert!(!ClosedGroupUpdate::MembersAdded(empty.clone()).is_valid(&sender));
        assert!(!ClosedGroupUpdate::MembersRemoved(empty).is_valid(&sender));
        assert!(
            ClosedGroupUpdate::MembersAdded(MemberList { members: vec![key(3)] }).is_valid(&sender)
        );
    }

    #[test]
    fn member_left_needs_a_sender() {
        assert!(!ClosedGroupUpdate::MemberLeft.is_valid(&PublicKey::ZERO));
        assert!(ClosedGroupUpdate::MemberLeft.is_valid(&PublicKey::from_x25519([1; 32])));
    }

    #[test]
    fn names_must_be_non_empty() {
        let sender = PublicKey::from_x25519([1; 32]);
        let update = GroupUpdate { name: String::new(), members: vec![key(1)] };
        assert!(!ClosedGroupUpdate::Update(update).is_valid(&sender));
        assert!(
            !ClosedGroupUpdate::NameChange(NameChange { name: String::new() }).is_valid(&sender)
        );
        assert!(ClosedGroupUpdate::EncryptionKeyPair(KeyPairDistribution::default())
            .is_valid(&sender));
    }

    #[test]
    fn envelope_carries_kind() {
        let update = ClosedGroupUpdate::NameChange(NameChange { name: "renamed".into() });
        let envelope = update.clone().into_envelope(EnvelopeHeader::new(UpdateKind::New)).unwrap();

        assert_eq!(envelope.header.kind(), Some(UpdateKind::NameChange));
        assert_eq!(ClosedGroupUpdate::from_envelope(&envelope).unwrap(), update);
    }

    #[test]
    fn member_left_has_empty_payload() {
        let envelope = ClosedGroupUpdate::MemberLeft
            .into_envelope(EnvelopeHeader::new(UpdateKind::MemberLeft))
            .unwrap();
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut envelope = ClosedGroupUpdate::MemberLeft
            .into_envelope(EnvelopeHeader::new(UpdateKind::MemberLeft))
            .unwrap();
        envelope.header.kind = 0x42;

        assert_eq!(
            ClosedGroupUpdate::from_envelope(&envelope),
            Err(ProtocolError::UnknownKind(0x42))
        );
    }

    #[test]
    fn mismatched_kind_fails_to_decode() {
        let mut buf = Vec::new();
        ClosedGroupUpdate::NameChange(NameChange { name: "x".into() }).encode(&mut buf).unwrap();

        assert!(matches!(
            ClosedGroupUpdate::decode(UpdateKind::New, &buf),
            Err(ProtocolError::CborDecode(_))
        ));
    }

    #[test]
    fn wrapper_lookup_by_recipient() {
        let alice = PublicKey::from_x25519([1; 32]);
        let bob = PublicKey::from_x25519([2; 32]);
        let distribution = KeyPairDistribution {
            wrappers: vec![KeyPairWrapper {
                public_key: alice.to_vec(),
                encrypted_key_pair: vec![7; 10],
            }],
        };

        assert!(distribution.wrapper_for(&alice).is_some());
        assert!(distribution.wrapper_for(&bob).is_none());
    }
}
