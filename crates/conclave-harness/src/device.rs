//! One simulated device.

use std::sync::Arc;

use conclave_core::{
    ClosedGroupController, Collaborators, ControllerConfig, Environment, GroupError, GroupStore,
    KeyStore, LocalIdentity, MemoryJobQueue, MemoryPushRegistry, MemoryStorage, MemoryTimeline,
    X25519PeerEncryption,
};
use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{GroupPublicKey, PublicKey};

use crate::{
    SimEnv,
    invariants::{DeviceSnapshot, GroupSnapshot},
    network::SimNetwork,
};

/// A controller wired to in-memory collaborators and the shared network.
pub struct SimDevice {
    /// Position in the cluster
    pub index: usize,
    /// Device identity
    pub key: PublicKey,
    /// The device's controller
    pub controller: ClosedGroupController<SimEnv>,
    /// Group records and key pairs
    pub storage: MemoryStorage,
    /// Info messages written
    pub timeline: MemoryTimeline,
    /// Direct sends waiting for retry
    pub jobs: MemoryJobQueue,
    /// Push subscriptions
    pub push: MemoryPushRegistry,
}

impl SimDevice {
    /// Device with a fresh identity drawn from `env`.
    pub fn new(index: usize, env: &SimEnv, network: &SimNetwork, config: ControllerConfig) -> Self {
        let identity = LocalIdentity::from_key_pair(EncryptionKeyPair::from_secret(env.random_key()));
        let key = identity.public_key();

        let storage = MemoryStorage::new();
        let timeline = MemoryTimeline::new();
        let jobs = MemoryJobQueue::new();
        let push = MemoryPushRegistry::new();
        let deps = Collaborators {
            groups: Arc::new(storage.clone()),
            keys: Arc::new(storage.clone()),
            dispatcher: Arc::new(network.endpoint(key)),
            encryption: Arc::new(X25519PeerEncryption::new(env.clone())),
            timeline: Arc::new(timeline.clone()),
            push: Arc::new(push.clone()),
            jobs: Arc::new(jobs.clone()),
        };
        let controller = ClosedGroupController::new(env.clone(), identity, config, deps);

        Self { index, key, controller, storage, timeline, jobs, push }
    }

    /// Whether the device currently polls `group`.
    pub fn is_polling(&self, group: &GroupPublicKey) -> bool {
        self.storage.is_polling(group).unwrap_or(false)
    }

    /// Everything the device knows about its groups.
    ///
    /// # Errors
    ///
    /// Storage failures, or a stored group id that no longer decodes.
    pub fn snapshot(&self) -> Result<DeviceSnapshot, GroupError> {
        let mut snapshot = DeviceSnapshot::new(self.index, self.key);

        for record in self.storage.groups()? {
            let group = record.group_id.decode()?;
            let keys =
                self.storage.key_pairs(&group)?.iter().map(EncryptionKeyPair::public_bytes).collect();

            snapshot.groups.insert(group, GroupSnapshot {
                title: record.title,
                members: record.members,
                admins: record.admins,
                active: record.is_active,
                polling: self.storage.is_polling(&group)?,
                keys,
            });
        }

        Ok(snapshot)
    }
}
