//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live stores so every check in a
//! run sees the same state.

use std::collections::{BTreeMap, BTreeSet};

use conclave_proto::{GroupPublicKey, PublicKey};

/// Public half of a group key pair.
pub type KeyFingerprint = [u8; 32];

/// Snapshot of every device in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Per-device state
    pub devices: Vec<DeviceSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot from device snapshots.
    pub fn from_devices(devices: Vec<DeviceSnapshot>) -> Self {
        Self { devices }
    }

    /// Every group any device has a record for.
    pub fn groups(&self) -> BTreeSet<GroupPublicKey> {
        self.devices.iter().flat_map(|d| d.groups.keys().copied()).collect()
    }

    /// Devices that are active members of `group`, with their view of it.
    pub fn participants(
        &self,
        group: &GroupPublicKey,
    ) -> impl Iterator<Item = (&DeviceSnapshot, &GroupSnapshot)> {
        self.devices.iter().filter_map(move |device| {
            device.groups.get(group).filter(|g| g.is_participant(&device.key)).map(|g| (device, g))
        })
    }
}

/// One device's view of its groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Device index in the cluster
    pub index: usize,
    /// Device identity
    pub key: PublicKey,
    /// Groups the device has a record for
    pub groups: BTreeMap<GroupPublicKey, GroupSnapshot>,
}

impl DeviceSnapshot {
    /// Snapshot with no groups.
    pub fn new(index: usize, key: PublicKey) -> Self {
        Self { index, key, groups: BTreeMap::new() }
    }
}

/// One device's record and key material for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Group title
    pub title: String,
    /// Members as recorded
    pub members: BTreeSet<PublicKey>,
    /// Admins as recorded
    pub admins: BTreeSet<PublicKey>,
    /// Record is active
    pub active: bool,
    /// Device polls the group
    pub polling: bool,
    /// Key pair history, oldest first
    pub keys: Vec<KeyFingerprint>,
}

impl GroupSnapshot {
    /// Whether `device` considers itself an active member.
    pub fn is_participant(&self, device: &PublicKey) -> bool {
        self.active && self.members.contains(device)
    }

    /// Current group key.
    pub fn latest_key(&self) -> Option<&KeyFingerprint> {
        self.keys.last()
    }
}
