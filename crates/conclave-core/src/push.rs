//! Push notification registration.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use conclave_proto::{GroupPublicKey, PublicKey};

use crate::error::PushError;

/// Registers the device for push notifications on a group.
///
/// Failures are reported so they can be logged; they never abort the group
/// operation that triggered them.
pub trait PushRegistry: Send + Sync {
    /// Start receiving pushes for `group`.
    fn subscribe(&self, group: &GroupPublicKey, user: &PublicKey) -> Result<(), PushError>;

    /// Stop receiving pushes for `group`.
    fn unsubscribe(&self, group: &GroupPublicKey, user: &PublicKey) -> Result<(), PushError>;
}

/// Registry that tracks subscriptions in memory.
#[derive(Clone, Default)]
pub struct MemoryPushRegistry {
    inner: Arc<Mutex<PushInner>>,
}

#[derive(Default)]
struct PushInner {
    subscribed: BTreeSet<GroupPublicKey>,
    unavailable: bool,
}

impl MemoryPushRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, PushInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Whether the device is subscribed to `group`.
    pub fn is_subscribed(&self, group: &GroupPublicKey) -> bool {
        self.lock().subscribed.contains(group)
    }

    /// Make every call fail, as if the push server were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }
}

impl PushRegistry for MemoryPushRegistry {
    fn subscribe(&self, group: &GroupPublicKey, _user: &PublicKey) -> Result<(), PushError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(PushError("push server unavailable".into()));
        }
        inner.subscribed.insert(*group);
        Ok(())
    }

    fn unsubscribe(&self, group: &GroupPublicKey, _user: &PublicKey) -> Result<(), PushError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(PushError("push server unavailable".into()));
        }
        inner.subscribed.remove(group);
        Ok(())
    }
}
