//! Closed-group payload types.
//!
//! Keys are carried as plain byte vectors so that malformed input still
//! decodes and can be rejected by structural validation rather than by the
//! CBOR layer. Typed accessors parse them on demand.

use serde::{Deserialize, Serialize};

use crate::{GroupPublicKey, PublicKey, errors::Result};

/// X25519 key pair in transport form.
///
/// Sent inside `New` in the clear (the envelope itself travels over an
/// encrypted channel) and inside `EncryptionKeyPair` wrapped per recipient.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairData {
    /// 32-byte X25519 public key
    pub public_key: Vec<u8>,
    /// 32-byte X25519 secret scalar
    pub private_key: Vec<u8>,
}

impl std::fmt::Debug for KeyPairData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairData")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeyPairData {
    /// CBOR encoding, used as the plaintext of a wrapped key pair.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| crate::ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Parse a CBOR-encoded key pair.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| crate::ProtocolError::CborDecode(e.to_string()))
    }
}

/// Full group state, sent to every member at creation and to each member
/// added later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    /// Serialized [`GroupPublicKey`]
    pub public_key: Vec<u8>,
    /// Group title
    pub name: String,
    /// Current group encryption key pair
    pub encryption_key_pair: KeyPairData,
    /// Serialized member keys
    pub members: Vec<Vec<u8>>,
    /// Serialized admin keys
    pub admins: Vec<Vec<u8>>,
}

impl NewGroup {
    /// Parse the group public key.
    pub fn group_public_key(&self) -> Result<GroupPublicKey> {
        GroupPublicKey::from_slice(&self.public_key)
    }

    /// Parse all member keys. Fails on the first malformed key.
    pub fn member_keys(&self) -> Result<Vec<PublicKey>> {
        parse_keys(&self.members)
    }

    /// Parse all admin keys. Fails on the first malformed key.
    pub fn admin_keys(&self) -> Result<Vec<PublicKey>> {
        parse_keys(&self.admins)
    }
}

/// Title and full member list replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    /// New title
    pub name: String,
    /// Complete member list after the update
    pub members: Vec<Vec<u8>>,
}

impl GroupUpdate {
    /// Parse all member keys.
    pub fn member_keys(&self) -> Result<Vec<PublicKey>> {
        parse_keys(&self.members)
    }
}

/// Members added or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberList {
    /// Serialized member keys
    pub members: Vec<Vec<u8>>,
}

impl MemberList {
    /// Build from typed keys.
    #[must_use]
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a PublicKey>) -> Self {
        Self { members: keys.into_iter().map(PublicKey::to_vec).collect() }
    }

    /// Parse all member keys.
    pub fn member_keys(&self) -> Result<Vec<PublicKey>> {
        parse_keys(&self.members)
    }
}

/// Title change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChange {
    /// New title
    pub name: String,
}

/// One recipient's copy of a rotated key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairWrapper {
    /// Serialized key of the member this copy is for
    pub public_key: Vec<u8>,
    /// [`KeyPairData`] sealed to that member
    pub encrypted_key_pair: Vec<u8>,
}

/// Rotated key pair, one wrapper per recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairDistribution {
    /// Per-recipient ciphertexts
    pub wrappers: Vec<KeyPairWrapper>,
}

impl KeyPairDistribution {
    /// The wrapper addressed to `recipient`, if any.
    #[must_use]
    pub fn wrapper_for(&self, recipient: &PublicKey) -> Option<&KeyPairWrapper> {
        self.wrappers.iter().find(|w| w.public_key.as_slice() == recipient.as_bytes())
    }
}

fn parse_keys(raw: &[Vec<u8>]) -> Result<Vec<PublicKey>> {
    raw.iter().map(|bytes| PublicKey::from_slice(bytes)).collect()
}
