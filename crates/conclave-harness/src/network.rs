//! Simulated transport.
//!
//! Every send is serialized to bytes and parked in a FIFO until the cluster
//! drains it, the way a swarm stores messages until recipients poll. Group
//! sends fan out at delivery time to whoever is polling the group then;
//! direct sends go to one device.
//!
//! A device can be taken offline: its sends fail with
//! [`DispatchError::Unavailable`] while anything addressed to it keeps
//! waiting in the queue.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use conclave_core::{DispatchError, MessageDispatcher, dispatch::Destination};
use conclave_proto::{Envelope, GroupPublicKey, PublicKey};

/// A serialized envelope in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sending device
    pub from: PublicKey,
    /// Group fan-out or direct delivery
    pub destination: Destination,
    /// Wire bytes
    pub bytes: Vec<u8>,
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Default)]
struct NetworkInner {
    queue: VecDeque<Packet>,
    offline: BTreeSet<PublicKey>,
    accepted: u64,
    refused: u64,
}

impl SimNetwork {
    /// Empty network, everyone online.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Dispatcher bound to one sending device.
    pub fn endpoint(&self, sender: PublicKey) -> NetworkEndpoint {
        NetworkEndpoint { network: self.clone(), sender }
    }

    /// Take a device offline or bring it back.
    pub fn set_offline(&self, device: PublicKey, offline: bool) {
        let mut inner = self.lock();
        if offline {
            inner.offline.insert(device);
        } else {
            inner.offline.remove(&device);
        }
    }

    /// Bring every device back online.
    pub fn heal(&self) {
        self.lock().offline.clear();
    }

    /// Whether `device` is offline.
    pub fn is_offline(&self, device: &PublicKey) -> bool {
        self.lock().offline.contains(device)
    }

    /// Next packet in send order.
    pub fn pop(&self) -> Option<Packet> {
        self.lock().queue.pop_front()
    }

    /// Packets waiting for delivery.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Sends accepted and refused so far.
    pub fn counters(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.accepted, inner.refused)
    }

    fn send(
        &self,
        from: PublicKey,
        destination: Destination,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let bytes = envelope
            .to_bytes()
            .map_err(|e| DispatchError::Unavailable(format!("unencodable envelope: {e}")))?;

        let mut inner = self.lock();
        if inner.offline.contains(&from) {
            inner.refused += 1;
            return Err(DispatchError::Unavailable(format!("{from:?} is offline")));
        }

        inner.accepted += 1;
        inner.queue.push_back(Packet { from, destination, bytes: bytes.to_vec() });
        Ok(())
    }
}

/// [`MessageDispatcher`] for one device on a [`SimNetwork`].
#[derive(Clone)]
pub struct NetworkEndpoint {
    network: SimNetwork,
    sender: PublicKey,
}

impl MessageDispatcher for NetworkEndpoint {
    fn send_to_group(
        &self,
        group: &GroupPublicKey,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        self.network.send(self.sender, Destination::Group(*group), envelope)
    }

    fn send_to_member(&self, member: &PublicKey, envelope: &Envelope) -> Result<(), DispatchError> {
        self.network.send(self.sender, Destination::Member(*member), envelope)
    }
}
