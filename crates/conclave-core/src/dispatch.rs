//! Outbound transport seam.
//!
//! The controller never talks to the network. It hands finished envelopes to a
//! [`MessageDispatcher`], which either fans them out to a group's swarm or
//! delivers them to one member.

use std::sync::{Arc, Mutex, MutexGuard};

use conclave_proto::{ClosedGroupUpdate, Envelope, GroupPublicKey, PublicKey, UpdateKind};

use crate::error::DispatchError;

/// Sends protocol envelopes.
///
/// Calls are synchronous: `Ok` means the transport accepted the envelope.
/// Timeouts are the implementation's concern.
pub trait MessageDispatcher: Send + Sync {
    /// Send to every member of a group.
    fn send_to_group(&self, group: &GroupPublicKey, envelope: &Envelope)
    -> Result<(), DispatchError>;

    /// Send to a single member.
    fn send_to_member(&self, member: &PublicKey, envelope: &Envelope)
    -> Result<(), DispatchError>;
}

/// Destination of a dispatched envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Group fan-out
    Group(GroupPublicKey),
    /// Direct delivery
    Member(PublicKey),
}

/// An envelope accepted by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEnvelope {
    /// Where it was sent
    pub destination: Destination,
    /// What was sent
    pub envelope: Envelope,
}

impl SentEnvelope {
    /// Kind of the carried update. `None` if the header kind is unknown.
    pub fn kind(&self) -> Option<UpdateKind> {
        self.envelope.header.kind()
    }

    /// Decode the carried update.
    pub fn update(&self) -> Option<ClosedGroupUpdate> {
        ClosedGroupUpdate::from_envelope(&self.envelope).ok()
    }
}

/// Dispatcher that records every envelope instead of sending it.
///
/// Failures can be injected per destination type to exercise error paths.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Default)]
struct RecordingInner {
    sent: Vec<SentEnvelope>,
    fail_group: bool,
    fail_member: bool,
}

impl RecordingDispatcher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, RecordingInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Make group sends fail (or succeed again).
    pub fn fail_group_sends(&self, fail: bool) {
        self.lock().fail_group = fail;
    }

    /// Make direct sends fail (or succeed again).
    pub fn fail_member_sends(&self, fail: bool) {
        self.lock().fail_member = fail;
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<SentEnvelope> {
        self.lock().sent.clone()
    }

    /// Remove and return everything sent so far.
    pub fn take(&self) -> Vec<SentEnvelope> {
        std::mem::take(&mut self.lock().sent)
    }
}

impl MessageDispatcher for RecordingDispatcher {
    fn send_to_group(
        &self,
        group: &GroupPublicKey,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        if inner.fail_group {
            return Err(DispatchError::Unavailable("group sends disabled".into()));
        }
        inner
            .sent
            .push(SentEnvelope { destination: Destination::Group(*group), envelope: envelope.clone() });
        Ok(())
    }

    fn send_to_member(&self, member: &PublicKey, envelope: &Envelope) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        if inner.fail_member {
            return Err(DispatchError::Unreachable(member.to_hex()));
        }
        inner.sent.push(SentEnvelope {
            destination: Destination::Member(*member),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}
