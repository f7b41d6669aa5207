//! Closed Group Controller
//!
//! Owns every state transition of every closed group the device belongs to.
//! Local intents (create, update, add, remove, rename, leave) validate, send
//! the primary update to the group and then mutate local state. Remote updates
//! go through structural validation and an admissibility check before they
//! are applied; anything that fails is logged and dropped.
//!
//! The controller performs no I/O of its own. Storage, transport, wrapping,
//! timeline and push are injected as [`Collaborators`].
//!
//! # Serialization
//!
//! Every mutating method takes `&mut self`. Read-modify-write sequences on a
//! record are atomic because there is exactly one writer; run the controller
//! inside a [`GroupWorker`](crate::worker::GroupWorker) to share it across
//! tasks.

mod local;
mod remote;

use std::{collections::BTreeSet, sync::Arc};

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{
    ClosedGroupUpdate, Envelope, EnvelopeHeader, GroupId, GroupPublicKey, PublicKey,
    payloads::{KeyPairData, KeyPairDistribution, KeyPairWrapper, NewGroup},
};

use crate::{
    config::ControllerConfig,
    dispatch::MessageDispatcher,
    encryption::PeerEncryption,
    env::Environment,
    error::GroupError,
    jobs::{JobEnvelopes, JobQueue, JobReport, JobRunner, SendJob},
    push::PushRegistry,
    record::GroupRecord,
    rotation::RotationPlan,
    storage::{GroupStore, KeyStore},
    timeline::{InfoKind, TimelineEntry, TimelineNotifier},
};

/// The local user: their public key and the X25519 pair behind it.
#[derive(Clone)]
pub struct LocalIdentity {
    public_key: PublicKey,
    key_pair: EncryptionKeyPair,
}

impl LocalIdentity {
    /// Identity whose public key is derived from `key_pair`.
    pub fn from_key_pair(key_pair: EncryptionKeyPair) -> Self {
        Self { public_key: PublicKey::from_x25519(key_pair.public_bytes()), key_pair }
    }

    /// The user's public key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The user's X25519 pair, used to open wrapped group keys.
    pub fn key_pair(&self) -> &EncryptionKeyPair {
        &self.key_pair
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity").field("public_key", &self.public_key).finish_non_exhaustive()
    }
}

/// Everything the controller talks to.
///
/// Handles are shared: cloning a `Collaborators` clones the `Arc`s, not the
/// state behind them.
#[derive(Clone)]
pub struct Collaborators {
    /// Group records
    pub groups: Arc<dyn GroupStore>,
    /// Key pair history and polling
    pub keys: Arc<dyn KeyStore>,
    /// Outbound transport
    pub dispatcher: Arc<dyn MessageDispatcher>,
    /// Per-recipient key wrapping
    pub encryption: Arc<dyn PeerEncryption>,
    /// Conversation info messages
    pub timeline: Arc<dyn TimelineNotifier>,
    /// Push notification registration
    pub push: Arc<dyn PushRegistry>,
    /// Deferred direct sends
    pub jobs: Arc<dyn JobQueue>,
}

/// Closed-group state machine for one device.
///
/// Generic over `E: Environment` so tests and the simulator can drive the
/// clock and randomness.
pub struct ClosedGroupController<E: Environment> {
    env: E,
    identity: LocalIdentity,
    config: ControllerConfig,
    deps: Collaborators,
}

impl<E: Environment> ClosedGroupController<E> {
    /// Create a controller for `identity`.
    pub fn new(
        env: E,
        identity: LocalIdentity,
        config: ControllerConfig,
        deps: Collaborators,
    ) -> Self {
        Self { env, identity, config, deps }
    }

    /// The local user's public key.
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key
    }

    /// Active configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current record for `group`, if any.
    pub fn group(&self, group: &GroupPublicKey) -> Result<Option<GroupRecord>, GroupError> {
        Ok(self.deps.groups.group(&GroupId::from_public_key(group))?)
    }

    /// Key pair history for `group`, oldest first.
    pub fn key_pairs(&self, group: &GroupPublicKey) -> Result<Vec<EncryptionKeyPair>, GroupError> {
        Ok(self.deps.keys.key_pairs(group)?)
    }

    /// Generate a fresh group key pair and distribute it to `targets`.
    ///
    /// A logged no-op returning `Ok(None)` when the group is unknown or
    /// inactive, or when the local user is not an admin. The local user is
    /// never among the wrapped recipients, and a target whose key cannot be
    /// wrapped is skipped with a warning.
    ///
    /// The pair is appended to the local history only after the distribution
    /// was accepted by the transport, so a failed send leaves the previous
    /// pair current.
    ///
    /// # Errors
    ///
    /// - `GroupError::Dispatch` if the distribution could not be sent
    /// - `GroupError::Storage` / `GroupError::Protocol` on local failures
    pub fn generate_and_send_new_encryption_key_pair(
        &mut self,
        group: &GroupPublicKey,
        targets: &BTreeSet<PublicKey>,
    ) -> Result<Option<EncryptionKeyPair>, GroupError> {
        let local = self.identity.public_key;
        let Some(record) = self.group(group)? else {
            tracing::debug!(%group, "no record, not rotating");
            return Ok(None);
        };
        if !record.is_active || !record.is_admin(&local) {
            tracing::debug!(%group, active = record.is_active, "not an active admin, not rotating");
            return Ok(None);
        }

        let pair = EncryptionKeyPair::from_secret(self.env.random_key());
        let plaintext = key_pair_data(&pair).to_cbor()?;

        let mut distribution = KeyPairDistribution::default();
        for target in targets.iter().filter(|t| **t != local) {
            match self.deps.encryption.wrap_for_recipient(&plaintext, target) {
                Ok(encrypted_key_pair) => distribution.wrappers.push(KeyPairWrapper {
                    public_key: target.to_vec(),
                    encrypted_key_pair,
                }),
                Err(error) => tracing::warn!(%group, ?target, %error, "skipping rotation target"),
            }
        }

        let wrapped = distribution.wrappers.len();
        self.send_to_group(group, ClosedGroupUpdate::EncryptionKeyPair(distribution))?;
        self.deps.keys.append_key_pair(group, &pair)?;

        tracing::info!(%group, recipients = wrapped, "rotated group encryption key pair");
        Ok(Some(pair))
    }

    fn envelope(
        &self,
        group: &GroupPublicKey,
        update: ClosedGroupUpdate,
    ) -> Result<Envelope, GroupError> {
        let mut header = EnvelopeHeader::new(update.kind());
        header.set_group_public_key(group);
        header.set_sender(&self.identity.public_key);
        header.set_sent_timestamp(self.env.wall_clock_millis());
        Ok(update.into_envelope(header)?)
    }

    fn send_to_group(
        &self,
        group: &GroupPublicKey,
        update: ClosedGroupUpdate,
    ) -> Result<(), GroupError> {
        let kind = update.kind();
        let envelope = self.envelope(group, update)?;
        self.deps.dispatcher.send_to_group(group, &envelope).inspect_err(|error| {
            tracing::warn!(%group, ?kind, %error, "group send failed");
        })?;
        Ok(())
    }

    /// Queue a `New` for each recipient. Its contents are read from the
    /// group when the job runs.
    fn queue_new_for<'a>(
        &self,
        group: &GroupPublicKey,
        recipients: impl IntoIterator<Item = &'a PublicKey>,
    ) {
        for recipient in recipients {
            self.deps.jobs.submit(SendJob::new(*group, *recipient));
        }
    }

    /// Attempt every queued direct send once through the controller's own
    /// queue and dispatcher.
    pub fn run_pending_jobs(&self, runner: &JobRunner) -> Vec<JobReport> {
        runner.run_pending(self.deps.jobs.as_ref(), self, self.deps.dispatcher.as_ref())
    }

    /// Stop participating in a group: no polling, no keys, inactive, self
    /// removed, no pushes.
    fn disband_locally(&self, group: &GroupPublicKey) -> Result<(), GroupError> {
        let id = GroupId::from_public_key(group);
        self.deps.keys.unregister_polling(group)?;
        self.deps.keys.remove_all_key_pairs(group)?;
        self.deps.groups.set_active(&id, false)?;
        self.deps.groups.remove_member(&id, &self.identity.public_key)?;
        self.unsubscribe_push(group);

        tracing::info!(%group, "group disabled locally");
        Ok(())
    }

    fn load_record(&self, group: &GroupPublicKey) -> Result<GroupRecord, GroupError> {
        self.group(group)?.ok_or_else(|| GroupError::NoThread { group: GroupId::from_public_key(group) })
    }

    fn require_active(record: &GroupRecord) -> Result<(), GroupError> {
        if record.is_active {
            Ok(())
        } else {
            Err(GroupError::invalid(format!("group {} is inactive", record.group_id)))
        }
    }

    fn latest_key_pair(&self, group: &GroupPublicKey) -> Result<EncryptionKeyPair, GroupError> {
        self.deps.keys.latest_key_pair(group)?.ok_or(GroupError::NoKeyPair { group: *group })
    }

    fn check_size(&self, member_count: usize) -> Result<(), GroupError> {
        if member_count > self.config.group_size_limit {
            return Err(GroupError::invalid(format!(
                "{member_count} members exceeds the limit of {}",
                self.config.group_size_limit
            )));
        }
        Ok(())
    }

    /// Rotate after a membership change if the policy fires.
    ///
    /// Failures are logged: the membership change itself has already been
    /// sent and cannot be rolled back.
    fn rotate_if_needed(
        &mut self,
        group: &GroupPublicKey,
        old: &BTreeSet<PublicKey>,
        new: &BTreeSet<PublicKey>,
        local_is_admin: bool,
    ) {
        let Some(plan) = RotationPlan::for_transition(old, new, local_is_admin) else {
            return;
        };
        if let Err(error) = self.generate_and_send_new_encryption_key_pair(group, &plan.targets) {
            tracing::warn!(%group, %error, "key rotation failed, previous pair stays current");
        }
    }

    fn subscribe_push(&self, group: &GroupPublicKey) {
        if let Err(error) = self.deps.push.subscribe(group, &self.identity.public_key) {
            tracing::warn!(%group, %error, "push subscribe failed");
        }
    }

    fn unsubscribe_push(&self, group: &GroupPublicKey) {
        if let Err(error) = self.deps.push.unsubscribe(group, &self.identity.public_key) {
            tracing::warn!(%group, %error, "push unsubscribe failed");
        }
    }

    /// Timeline entry describing the group as currently stored.
    fn timeline_entry(
        &self,
        group: &GroupPublicKey,
        kind: InfoKind,
        sender: Option<PublicKey>,
        sent_timestamp: u64,
    ) -> Result<TimelineEntry, GroupError> {
        let record = self.load_record(group)?;
        Ok(TimelineEntry {
            group: record.group_id,
            kind,
            name: record.title,
            members: record.members,
            admins: record.admins,
            sender,
            sent_timestamp,
        })
    }

    fn record_outgoing(&self, group: &GroupPublicKey, kind: InfoKind) -> Result<(), GroupError> {
        let entry = self.timeline_entry(group, kind, None, self.env.wall_clock_millis())?;
        let thread = self.deps.timeline.thread_for(&entry.group);
        self.deps.timeline.record_outgoing(thread, entry);
        Ok(())
    }

    fn record_incoming(
        &self,
        group: &GroupPublicKey,
        kind: InfoKind,
        sender: PublicKey,
        sent_timestamp: u64,
    ) -> Result<(), GroupError> {
        let entry = self.timeline_entry(group, kind, Some(sender), sent_timestamp)?;
        self.deps.timeline.record_incoming(entry);
        Ok(())
    }
}

impl<E: Environment> JobEnvelopes for ClosedGroupController<E> {
    /// A `New` with the group's current title, members, admins and latest
    /// key pair. `None` once the group is inactive or the recipient is no
    /// longer a member.
    fn envelope_for(&self, job: &SendJob) -> Result<Option<Envelope>, GroupError> {
        let group = &job.group;
        let Some(record) = self.group(group)? else {
            return Ok(None);
        };
        if !record.is_active || !record.members.contains(&job.recipient) {
            return Ok(None);
        }
        let Some(pair) = self.deps.keys.latest_key_pair(group)? else {
            return Ok(None);
        };

        let update = new_group_update(group, &record.title, &pair, &record.members, &record.admins);
        Ok(Some(self.envelope(group, update)?))
    }
}

fn key_pair_data(pair: &EncryptionKeyPair) -> KeyPairData {
    KeyPairData {
        public_key: pair.public_bytes().to_vec(),
        private_key: pair.secret_bytes().to_vec(),
    }
}

fn new_group_update(
    group: &GroupPublicKey,
    title: &str,
    pair: &EncryptionKeyPair,
    members: &BTreeSet<PublicKey>,
    admins: &BTreeSet<PublicKey>,
) -> ClosedGroupUpdate {
    ClosedGroupUpdate::New(NewGroup {
        public_key: group.as_bytes().to_vec(),
        name: title.to_string(),
        encryption_key_pair: key_pair_data(pair),
        members: members.iter().map(PublicKey::to_vec).collect(),
        admins: admins.iter().map(PublicKey::to_vec).collect(),
    })
}
