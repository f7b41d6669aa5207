//! Double-encoded group identifiers.
//!
//! A group's public key is encoded as `PREFIX + hex(bytes)`, and that string is
//! encoded once more the same way. The resulting id is what conversation
//! threads are keyed by. Both layers are deterministic, so every device
//! derives the same id from the same group public key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    keys::GroupPublicKey,
};

/// Prefix applied at each encoding layer.
pub const GROUP_ID_PREFIX: &str = "__textsecure_group__!";

/// String identity of a group, derived from its [`GroupPublicKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Derive the id for a group public key.
    #[must_use]
    pub fn from_public_key(key: &GroupPublicKey) -> Self {
        let inner = encode_layer(key.as_bytes());
        Self(encode_layer(inner.as_bytes()))
    }

    /// Accept an id received from elsewhere, checking it decodes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidGroupId` if either layer lacks the prefix or is
    ///   not valid hex
    /// - Key errors if the innermost bytes are not a group public key
    pub fn parse(s: &str) -> Result<Self> {
        let id = Self(s.to_owned());
        id.decode()?;
        Ok(id)
    }

    /// Reverse both encoding layers.
    pub fn decode(&self) -> Result<GroupPublicKey> {
        let inner_bytes = decode_layer(&self.0)?;
        let inner = String::from_utf8(inner_bytes)
            .map_err(|_| ProtocolError::InvalidGroupId("inner layer is not UTF-8".into()))?;
        let key_bytes = decode_layer(&inner)?;
        GroupPublicKey::from_slice(&key_bytes)
    }

    /// The encoded string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&GroupPublicKey> for GroupId {
    fn from(key: &GroupPublicKey) -> Self {
        Self::from_public_key(key)
    }
}

fn encode_layer(bytes: &[u8]) -> String {
    format!("{GROUP_ID_PREFIX}{}", hex::encode(bytes))
}

fn decode_layer(s: &str) -> Result<Vec<u8>> {
    let body = s
        .strip_prefix(GROUP_ID_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidGroupId(format!("missing prefix: {s}")))?;
    hex::decode(body).map_err(|e| ProtocolError::InvalidGroupId(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_encoding_is_reversible() {
        let key = GroupPublicKey::from_x25519([0xAB; 32]);
        let id = GroupId::from_public_key(&key);

        assert!(id.as_str().starts_with(GROUP_ID_PREFIX));
        assert_eq!(id.decode().unwrap(), key);
        assert_eq!(GroupId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn inner_layer_is_hex_of_prefixed_key() {
        let key = GroupPublicKey::from_x25519([1; 32]);
        let id = GroupId::from_public_key(&key);

        let inner = format!("{GROUP_ID_PREFIX}{}", key.to_hex());
        assert_eq!(id.as_str(), format!("{GROUP_ID_PREFIX}{}", hex::encode(inner)));
    }

    #[test]
    fn single_encoded_id_is_rejected() {
        let key = GroupPublicKey::from_x25519([1; 32]);
        let single = format!("{GROUP_ID_PREFIX}{}", key.to_hex());

        assert!(GroupId::parse(&single).is_err());
        assert!(matches!(GroupId::parse("nope"), Err(ProtocolError::InvalidGroupId(_))));
    }
}
