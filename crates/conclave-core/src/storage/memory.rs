use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{GroupId, GroupPublicKey, PublicKey};

use super::{GroupStore, KeyStore, StorageError};
use crate::record::GroupRecord;

/// In-memory storage for testing and simulation.
///
/// Implements both [`GroupStore`] and [`KeyStore`]. Records are held in their
/// CBOR-encoded form, the same bytes a durable backend would write. All state
/// is wrapped in `Arc<Mutex<>>` so clones share data. Uses `lock().expect()`,
/// which panics if the mutex is poisoned - acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// CBOR-encoded records by group id
    groups: HashMap<GroupId, Vec<u8>>,

    /// Key pair history per group, oldest first
    key_pairs: HashMap<GroupPublicKey, Vec<EncryptionKeyPair>>,

    /// Groups registered for polling
    polled: BTreeSet<GroupPublicKey>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored group records.
    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Load, mutate and write back a record.
    fn modify(
        &self,
        id: &GroupId,
        f: impl FnOnce(&mut GroupRecord),
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let bytes =
            inner.groups.get(id).ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let mut record = GroupRecord::from_cbor(bytes)?;
        f(&mut record);
        debug_assert_eq!(&record.group_id, id);

        inner.groups.insert(id.clone(), record.to_cbor()?);
        Ok(())
    }
}

impl GroupStore for MemoryStorage {
    fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, StorageError> {
        self.lock().groups.get(id).map(|bytes| GroupRecord::from_cbor(bytes)).transpose()
    }

    fn groups(&self) -> Result<Vec<GroupRecord>, StorageError> {
        self.lock().groups.values().map(|bytes| GroupRecord::from_cbor(bytes)).collect()
    }

    fn create_group(&self, record: &GroupRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.groups.contains_key(&record.group_id) {
            return Err(StorageError::AlreadyExists(record.group_id.to_string()));
        }

        inner.groups.insert(record.group_id.clone(), record.to_cbor()?);
        Ok(())
    }

    fn update_title(&self, id: &GroupId, title: &str) -> Result<(), StorageError> {
        self.modify(id, |record| title.clone_into(&mut record.title))
    }

    fn update_members(
        &self,
        id: &GroupId,
        members: &BTreeSet<PublicKey>,
    ) -> Result<(), StorageError> {
        self.modify(id, |record| record.members.clone_from(members))
    }

    fn remove_member(&self, id: &GroupId, member: &PublicKey) -> Result<(), StorageError> {
        self.modify(id, |record| {
            record.members.remove(member);
        })
    }

    fn set_active(&self, id: &GroupId, active: bool) -> Result<(), StorageError> {
        self.modify(id, |record| record.is_active = active)
    }

    fn set_profile_sharing(&self, id: &GroupId, enabled: bool) -> Result<(), StorageError> {
        self.modify(id, |record| record.profile_sharing = enabled)
    }
}

impl KeyStore for MemoryStorage {
    fn latest_key_pair(
        &self,
        group: &GroupPublicKey,
    ) -> Result<Option<EncryptionKeyPair>, StorageError> {
        Ok(self.lock().key_pairs.get(group).and_then(|pairs| pairs.last().cloned()))
    }

    fn key_pairs(&self, group: &GroupPublicKey) -> Result<Vec<EncryptionKeyPair>, StorageError> {
        Ok(self.lock().key_pairs.get(group).cloned().unwrap_or_default())
    }

    fn append_key_pair(
        &self,
        group: &GroupPublicKey,
        pair: &EncryptionKeyPair,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let history = inner.key_pairs.entry(*group).or_default();
        if history.contains(pair) {
            return Ok(false);
        }

        history.push(pair.clone());
        Ok(true)
    }

    fn remove_all_key_pairs(&self, group: &GroupPublicKey) -> Result<(), StorageError> {
        self.lock().key_pairs.remove(group);
        Ok(())
    }

    fn register_polling(&self, group: &GroupPublicKey) -> Result<(), StorageError> {
        self.lock().polled.insert(*group);
        Ok(())
    }

    fn unregister_polling(&self, group: &GroupPublicKey) -> Result<(), StorageError> {
        self.lock().polled.remove(group);
        Ok(())
    }

    fn is_polling(&self, group: &GroupPublicKey) -> Result<bool, StorageError> {
        Ok(self.lock().polled.contains(group))
    }

    fn polled_groups(&self) -> Result<BTreeSet<GroupPublicKey>, StorageError> {
        Ok(self.lock().polled.clone())
    }
}
