//! Storage abstraction for group records and key material.
//!
//! Two synchronous traits: [`GroupStore`] holds one [`GroupRecord`] per group,
//! [`KeyStore`] holds each group's append-only key pair history and the set of
//! groups the device polls. Both are object-safe so the controller can hold
//! them behind `Arc<dyn _>`.

mod error;
mod memory;

use std::collections::BTreeSet;

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{GroupId, GroupPublicKey, PublicKey};
pub use error::StorageError;
pub use memory::MemoryStorage;

use crate::record::GroupRecord;

/// Persistence for [`GroupRecord`]s.
///
/// Send + Sync (thread-safe) and synchronous. Implementations typically share
/// internal state via Arc, so clones see the same data.
///
/// # Errors
///
/// Mutations on a group without a record return `StorageError::NotFound`.
pub trait GroupStore: Send + Sync {
    /// Load a record. `None` if the group is unknown.
    fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StorageError>;

    /// All records, active and inactive, in no particular order.
    fn groups(&self) -> Result<Vec<GroupRecord>, StorageError>;

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - `StorageError::AlreadyExists` if a record with the same id exists
    fn create_group(&self, record: &GroupRecord) -> Result<(), StorageError>;

    /// Replace the title.
    fn update_title(&self, id: &GroupId, title: &str) -> Result<(), StorageError>;

    /// Replace the member set.
    fn update_members(
        &self,
        id: &GroupId,
        members: &BTreeSet<PublicKey>,
    ) -> Result<(), StorageError>;

    /// Remove a single member. No-op if absent.
    fn remove_member(&self, id: &GroupId, member: &PublicKey) -> Result<(), StorageError>;

    /// Mark the group active or inactive.
    fn set_active(&self, id: &GroupId, active: bool) -> Result<(), StorageError>;

    /// Enable or disable sharing the user's profile with the group.
    fn set_profile_sharing(&self, id: &GroupId, enabled: bool) -> Result<(), StorageError>;
}

/// Per-group encryption key pair history and polling registrations.
///
/// # Invariants
///
/// - History is append-only until [`KeyStore::remove_all_key_pairs`]
/// - Appending a pair already in the history does nothing
pub trait KeyStore: Send + Sync {
    /// Most recently appended pair. `None` if the history is empty.
    fn latest_key_pair(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<EncryptionKeyPair>, StorageError>;

    /// Full history, oldest first. Older pairs are kept to read messages sent
    /// before a rotation.
    fn key_pairs(&self, group: &GroupPublicKey) -> Result<Vec<EncryptionKeyPair>, StorageError>;

    /// Append a pair. Returns false if it was already present.
    fn append_key_pair(
        &self,
        group: &GroupPublicKey,
        pair: &EncryptionKeyPair,
    ) -> Result<bool, StorageError>;

    /// Drop the group's entire history.
    fn remove_all_key_pairs(&self, group: &GroupPublicKey) -> Result<(), StorageError>;

    /// Start polling the group's swarm for messages.
    fn register_polling(&self, group: &GroupPublicKey) -> Result<(), StorageError>;

    /// Stop polling the group.
    fn unregister_polling(&self, group: &GroupPublicKey) -> Result<(), StorageError>;

    /// Whether the group is being polled.
    fn is_polling(&self, group: &GroupPublicKey) -> Result<bool, StorageError>;

    /// Every polled group.
    fn polled_groups(&self) -> Result<BTreeSet<GroupPublicKey>, StorageError>;
}
