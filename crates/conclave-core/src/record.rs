//! Persistent per-group state.

use std::collections::BTreeSet;

use conclave_proto::{GroupId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// A device's view of one closed group.
///
/// At most one record exists per `group_id`. Records are never deleted; a
/// group the user left or that was disbanded stays as an inactive record so
/// its conversation history remains readable.
///
/// # Invariants
///
/// - While active and the local user is present, `admins` is non-empty and
///   every admin is a member
/// - `created_at` never changes after the record is first written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Double-encoded group identity
    pub group_id: GroupId,
    /// Display name
    pub title: String,
    /// Current members
    pub members: BTreeSet<PublicKey>,
    /// Members with admin rights
    pub admins: BTreeSet<PublicKey>,
    /// Creation time (unix millis), from the creator's clock
    pub created_at: u64,
    /// False once the user left or the group was disbanded
    pub is_active: bool,
    /// Whether the user's profile is shared with this group
    #[serde(default)]
    pub profile_sharing: bool,
}

impl GroupRecord {
    /// Whether `key` is a current member.
    pub fn is_member(&self, key: &PublicKey) -> bool {
        self.members.contains(key)
    }

    /// Whether `key` is an admin.
    pub fn is_admin(&self, key: &PublicKey) -> bool {
        self.admins.contains(key)
    }

    /// Whether any key in `keys` is an admin.
    pub fn contains_admin<'a>(&self, mut keys: impl Iterator<Item = &'a PublicKey>) -> bool {
        keys.any(|k| self.admins.contains(k))
    }

    /// Encode to the stored CBOR form.
    pub fn to_cbor(&self) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from the stored CBOR form.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, StorageError> {
        ciborium::de::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}
