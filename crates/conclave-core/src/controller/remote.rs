//! Remote updates.
//!
//! Nothing in here returns an error to the caller. An update that fails
//! structural validation or the admissibility check is logged at debug and
//! dropped, and local failures while applying one are logged at warn. Peers
//! learn nothing about why an update was ignored.

use std::collections::BTreeSet;

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{
    ClosedGroupUpdate, Envelope, GroupId, GroupPublicKey, PublicKey,
    payloads::{GroupUpdate, KeyPairData, KeyPairDistribution, MemberList, NameChange, NewGroup},
};

use super::ClosedGroupController;
use crate::{
    env::Environment,
    error::GroupError,
    record::GroupRecord,
    timeline::InfoKind,
    validator::{UpdateValidator, ValidationResult},
};

/// Routing fields of a remote update, taken from its envelope header.
#[derive(Debug, Clone, Copy)]
struct Origin {
    group: GroupPublicKey,
    sender: PublicKey,
    sent_timestamp: u64,
}

impl<E: Environment> ClosedGroupController<E> {
    /// Decode and apply a received envelope. Undecodable input is dropped.
    pub fn handle_envelope(&mut self, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%error, len = bytes.len(), "dropping undecodable envelope");
                return;
            },
        };

        let update = match ClosedGroupUpdate::from_envelope(&envelope) {
            Ok(update) => update,
            Err(error) => {
                tracing::debug!(%error, "dropping envelope with malformed payload");
                return;
            },
        };

        let header = &envelope.header;
        self.handle_message(
            update,
            header.sent_timestamp(),
            &header.group_public_key(),
            &header.sender(),
        );
    }

    /// Apply a decoded update from `sender` to `group`.
    ///
    /// Own echoes and structurally invalid updates are dropped before any
    /// state is read.
    pub fn handle_message(
        &mut self,
        update: ClosedGroupUpdate,
        sent_timestamp: u64,
        group: &GroupPublicKey,
        sender: &PublicKey,
    ) {
        let kind = update.kind();
        if *sender == self.identity.public_key {
            tracing::debug!(%group, ?kind, "ignoring own update");
            return;
        }
        if !update.is_valid(sender) {
            tracing::debug!(%group, ?kind, ?sender, "dropping structurally invalid update");
            return;
        }

        let origin = Origin { group: *group, sender: *sender, sent_timestamp };
        let result = match update {
            ClosedGroupUpdate::New(new) => self.apply_new(&new, origin),
            ClosedGroupUpdate::Update(update) => self.apply_update(&update, origin),
            ClosedGroupUpdate::MembersAdded(list) => self.apply_members_added(&list, origin),
            ClosedGroupUpdate::MembersRemoved(list) => self.apply_members_removed(&list, origin),
            ClosedGroupUpdate::NameChange(change) => self.apply_name_change(&change, origin),
            ClosedGroupUpdate::MemberLeft => self.apply_member_left(origin),
            ClosedGroupUpdate::EncryptionKeyPair(distribution) => {
                self.apply_key_pair(&distribution, origin)
            },
        };

        if let Err(error) = result {
            tracing::warn!(%group, ?kind, %error, "failed to apply remote update");
        }
    }

    /// The stored record if `origin` may change it, `None` to drop.
    fn admissible(&self, origin: Origin) -> Result<Option<GroupRecord>, GroupError> {
        let record = self.group(&origin.group)?;
        match UpdateValidator::validate_update(record.as_ref(), &origin.sender, origin.sent_timestamp)
        {
            ValidationResult::Accept => Ok(record),
            ValidationResult::Reject { reason } => {
                tracing::debug!(group = %origin.group, %reason, "dropping inadmissible update");
                Ok(None)
            },
        }
    }

    fn apply_new(&mut self, new: &NewGroup, origin: Origin) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let parsed = new.group_public_key().and_then(|group| {
            Ok((group, new.member_keys()?, new.admin_keys()?))
        });
        let Ok((group, members, admins)) = parsed else {
            tracing::debug!(group = %origin.group, "dropping New with malformed keys");
            return Ok(());
        };
        let Ok(pair) = EncryptionKeyPair::from_parts(
            &new.encryption_key_pair.public_key,
            &new.encryption_key_pair.private_key,
        ) else {
            tracing::debug!(%group, "dropping New with malformed key pair");
            return Ok(());
        };
        if group != origin.group {
            tracing::debug!(%group, header = %origin.group, "dropping New addressed to another group");
            return Ok(());
        }

        let members: BTreeSet<PublicKey> = members.into_iter().collect();
        let admins: BTreeSet<PublicKey> = admins.into_iter().collect();
        if !members.contains(&local) {
            tracing::debug!(%group, "dropping New that does not include us");
            return Ok(());
        }

        let id = GroupId::from_public_key(&group);
        if self.deps.groups.group(&id)?.is_some() {
            self.deps.groups.update_title(&id, &new.name)?;
            self.deps.groups.update_members(&id, &members)?;
            self.deps.groups.set_active(&id, true)?;
        } else {
            self.deps.groups.create_group(&GroupRecord {
                group_id: id.clone(),
                title: new.name.clone(),
                members,
                admins,
                created_at: origin.sent_timestamp,
                is_active: true,
                profile_sharing: true,
            })?;
        }

        self.deps.groups.set_profile_sharing(&id, true)?;
        self.deps.keys.register_polling(&group)?;
        self.deps.keys.append_key_pair(&group, &pair)?;
        self.record_incoming(&group, InfoKind::Update, origin.sender, origin.sent_timestamp)?;
        self.subscribe_push(&group);

        tracing::info!(%group, sender = ?origin.sender, "joined closed group");
        Ok(())
    }

    fn apply_members_added(&mut self, list: &MemberList, origin: Origin) -> Result<(), GroupError> {
        let Some(record) = self.admissible(origin)? else {
            return Ok(());
        };
        let Ok(added) = list.member_keys() else {
            tracing::debug!(group = %origin.group, "dropping MembersAdded with malformed keys");
            return Ok(());
        };

        let mut updated = record.members.clone();
        updated.extend(added);
        if updated == record.members {
            tracing::debug!(group = %origin.group, "MembersAdded already applied");
            return Ok(());
        }

        self.deps.groups.update_members(&record.group_id, &updated)?;
        self.record_incoming(&origin.group, InfoKind::Update, origin.sender, origin.sent_timestamp)?;

        tracing::info!(
            group = %origin.group,
            added = updated.len() - record.members.len(),
            "members added"
        );
        Ok(())
    }

    fn apply_members_removed(
        &mut self,
        list: &MemberList,
        origin: Origin,
    ) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let Some(record) = self.admissible(origin)? else {
            return Ok(());
        };
        let Ok(removed) = list.member_keys() else {
            tracing::debug!(group = %origin.group, "dropping MembersRemoved with malformed keys");
            return Ok(());
        };
        let removed: BTreeSet<PublicKey> = removed.into_iter().collect();

        if record.contains_admin(removed.iter()) || removed.contains(&local) {
            self.disband_locally(&origin.group)?;
        } else {
            let updated: BTreeSet<PublicKey> =
                record.members.difference(&removed).copied().collect();
            self.deps.groups.update_members(&record.group_id, &updated)?;
            self.rotate_if_needed(&origin.group, &record.members, &updated, record.is_admin(&local));
        }

        let kind = if removed.contains(&origin.sender) {
            tracing::warn!(group = %origin.group, sender = ?origin.sender, "member removed itself with MembersRemoved");
            InfoKind::Quit
        } else {
            InfoKind::Update
        };
        self.record_incoming(&origin.group, kind, origin.sender, origin.sent_timestamp)?;

        tracing::info!(group = %origin.group, removed = removed.len(), "members removed");
        Ok(())
    }

    fn apply_member_left(&mut self, origin: Origin) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let Some(record) = self.admissible(origin)? else {
            return Ok(());
        };

        if record.is_admin(&origin.sender) {
            self.disband_locally(&origin.group)?;
        } else {
            self.deps.groups.remove_member(&record.group_id, &origin.sender)?;
            let mut updated = record.members.clone();
            updated.remove(&origin.sender);
            self.rotate_if_needed(&origin.group, &record.members, &updated, record.is_admin(&local));
        }
        self.record_incoming(&origin.group, InfoKind::Quit, origin.sender, origin.sent_timestamp)?;

        tracing::info!(group = %origin.group, sender = ?origin.sender, "member left");
        Ok(())
    }

    fn apply_name_change(&mut self, change: &NameChange, origin: Origin) -> Result<(), GroupError> {
        let Some(record) = self.admissible(origin)? else {
            return Ok(());
        };

        self.deps.groups.update_title(&record.group_id, &change.name)?;
        self.record_incoming(&origin.group, InfoKind::Update, origin.sender, origin.sent_timestamp)?;
        Ok(())
    }

    fn apply_update(&mut self, update: &GroupUpdate, origin: Origin) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let Some(record) = self.admissible(origin)? else {
            return Ok(());
        };
        let Ok(new_members) = update.member_keys() else {
            tracing::debug!(group = %origin.group, "dropping Update with malformed keys");
            return Ok(());
        };
        let new_members: BTreeSet<PublicKey> = new_members.into_iter().collect();

        let removed_admin = record.admins.iter().any(|admin| !new_members.contains(admin));
        if removed_admin && !new_members.is_empty() {
            tracing::debug!(group = %origin.group, "dropping Update that removes an admin");
            return Ok(());
        }

        let local_removed = !new_members.contains(&local);
        if local_removed {
            self.disband_locally(&origin.group)?;
        } else {
            self.rotate_if_needed(&origin.group, &record.members, &new_members, record.is_admin(&local));
        }

        self.deps.groups.update_title(&record.group_id, &update.name)?;
        if !local_removed {
            self.deps.groups.update_members(&record.group_id, &new_members)?;
        }

        let kind =
            if new_members.contains(&origin.sender) { InfoKind::Update } else { InfoKind::Quit };
        self.record_incoming(&origin.group, kind, origin.sender, origin.sent_timestamp)?;

        tracing::info!(group = %origin.group, removed = local_removed, "applied group update");
        Ok(())
    }

    fn apply_key_pair(
        &mut self,
        distribution: &KeyPairDistribution,
        origin: Origin,
    ) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let record = self.group(&origin.group)?;
        if let ValidationResult::Reject { reason } =
            UpdateValidator::validate_key_distribution(record.as_ref(), &origin.sender)
        {
            tracing::debug!(group = %origin.group, %reason, "dropping key distribution");
            return Ok(());
        }

        let Some(wrapper) = distribution.wrapper_for(&local) else {
            tracing::debug!(group = %origin.group, "key distribution has no copy for us");
            return Ok(());
        };

        let pair = match self.open_wrapped_key_pair(&wrapper.encrypted_key_pair) {
            Ok(pair) => pair,
            Err(error) => {
                tracing::debug!(group = %origin.group, %error, "dropping unreadable key distribution");
                return Ok(());
            },
        };

        if self.deps.keys.append_key_pair(&origin.group, &pair)? {
            tracing::info!(group = %origin.group, sender = ?origin.sender, "installed rotated key pair");
        } else {
            tracing::debug!(group = %origin.group, "rotated key pair already known");
        }
        Ok(())
    }

    fn open_wrapped_key_pair(&self, ciphertext: &[u8]) -> Result<EncryptionKeyPair, GroupError> {
        let plaintext = self.deps.encryption.unwrap(ciphertext, &self.identity.key_pair)?;
        let data = KeyPairData::from_cbor(&plaintext)?;
        Ok(EncryptionKeyPair::from_parts(&data.public_key, &data.private_key)?)
    }
}

#[cfg(test)]
mod tests {
    use conclave_proto::{UpdateKind, payloads::KeyPairWrapper};

    use super::*;
    use crate::{
        controller::test_support::{Fixture, fixture, joined, key, members},
        dispatch::SentEnvelope,
        encryption::{PeerEncryption, X25519PeerEncryption},
        env::SystemEnv,
        storage::{GroupStore, KeyStore},
        timeline::Direction,
    };

    fn record(f: &Fixture, group: &GroupPublicKey) -> GroupRecord {
        f.storage.group(&GroupId::from_public_key(group)).unwrap().unwrap()
    }

    fn list(seeds: &[u8]) -> MemberList {
        MemberList::from_keys(&members(seeds))
    }

    fn new_group(group: &GroupPublicKey, member_seeds: &[u8], admin_seeds: &[u8]) -> NewGroup {
        let pair = EncryptionKeyPair::from_secret([66; 32]);
        NewGroup {
            public_key: group.as_bytes().to_vec(),
            name: "invited".into(),
            encryption_key_pair: KeyPairData {
                public_key: pair.public_bytes().to_vec(),
                private_key: pair.secret_bytes().to_vec(),
            },
            members: members(member_seeds).iter().map(PublicKey::to_vec).collect(),
            admins: members(admin_seeds).iter().map(PublicKey::to_vec).collect(),
        }
    }

    #[test]
    fn new_creates_record_and_installs_key() {
        let mut f = fixture(2);
        let group = GroupPublicKey::from_x25519([5; 32]);

        f.controller.handle_message(
            ClosedGroupUpdate::New(new_group(&group, &[1, 2, 3], &[1])),
            5_000,
            &group,
            &key(1),
        );

        let record = record(&f, &group);
        assert_eq!(record.members, members(&[1, 2, 3]));
        assert_eq!(record.admins, members(&[1]));
        assert_eq!(record.created_at, 5_000);
        assert!(record.profile_sharing);
        assert!(f.storage.is_polling(&group).unwrap());
        assert_eq!(f.storage.key_pairs(&group).unwrap().len(), 1);
        assert!(f.push.is_subscribed(&group));

        let entry = f.timeline.last_for(&record.group_id).unwrap();
        assert_eq!(entry.direction, Direction::Incoming);
        assert_eq!(entry.entry.sender, Some(key(1)));
    }

    #[test]
    fn new_for_existing_group_keeps_admins_and_reactivates() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);
        f.storage.set_active(&GroupId::from_public_key(&group), false).unwrap();

        f.controller.handle_message(
            ClosedGroupUpdate::New(new_group(&group, &[1, 2, 4], &[4])),
            5_000,
            &group,
            &key(1),
        );

        let record = record(&f, &group);
        assert!(record.is_active);
        assert_eq!(record.admins, members(&[1]));
        assert_eq!(record.members, members(&[1, 2, 4]));
        assert_eq!(record.created_at, 1_000);
        assert_eq!(f.storage.key_pairs(&group).unwrap().len(), 2);
    }

    #[test]
    fn members_added_is_idempotent() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MembersAdded(list(&[3])), 2_000, &group, &key(1));
        let after_first = record(&f, &group);
        let entries = f.timeline.entries().len();

        f.controller.handle_message(ClosedGroupUpdate::MembersAdded(list(&[3])), 2_001, &group, &key(1));

        assert_eq!(record(&f, &group), after_first);
        assert_eq!(after_first.members, members(&[1, 2, 3]));
        assert_eq!(f.timeline.entries().len(), entries);
        assert!(f.dispatcher.sent().is_empty());
    }

    #[test]
    fn non_member_sender_is_ignored() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);
        let before = record(&f, &group);

        f.controller.handle_message(
            ClosedGroupUpdate::NameChange(NameChange { name: "hijacked".into() }),
            2_000,
            &group,
            &key(9),
        );
        f.controller.handle_message(ClosedGroupUpdate::MembersRemoved(list(&[1])), 2_000, &group, &key(9));

        assert_eq!(record(&f, &group), before);
        assert!(f.timeline.entries().is_empty());
    }

    #[test]
    fn stale_update_is_dropped() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);

        f.controller.handle_message(
            ClosedGroupUpdate::NameChange(NameChange { name: "old".into() }),
            999,
            &group,
            &key(1),
        );

        assert_eq!(record(&f, &group).title, "joined");
    }

    #[test]
    fn admin_member_left_disbands() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MemberLeft, 2_000, &group, &key(1));

        let record = record(&f, &group);
        assert!(!record.is_active);
        assert!(!record.is_member(&key(2)));
        assert!(f.storage.key_pairs(&group).unwrap().is_empty());
        assert!(!f.storage.is_polling(&group).unwrap());
        assert_eq!(f.timeline.last_for(&record.group_id).unwrap().entry.kind, InfoKind::Quit);
    }

    #[test]
    fn member_left_seen_by_admin_rotates() {
        let mut f = fixture(1);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MemberLeft, 2_000, &group, &key(3));

        assert_eq!(record(&f, &group).members, members(&[1, 2]));
        let sent = f.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        let Some(ClosedGroupUpdate::EncryptionKeyPair(distribution)) = sent[0].update() else {
            panic!("expected a key distribution");
        };
        assert!(distribution.wrapper_for(&key(2)).is_some());
        assert!(distribution.wrapper_for(&key(3)).is_none());
        assert_eq!(f.storage.key_pairs(&group).unwrap().len(), 2);
    }

    #[test]
    fn members_removed_including_self_disbands() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MembersRemoved(list(&[2])), 2_000, &group, &key(1));

        assert!(!record(&f, &group).is_active);
        assert!(f.dispatcher.sent().is_empty());
    }

    #[test]
    fn members_removed_naming_an_admin_disbands() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MembersRemoved(list(&[1])), 2_000, &group, &key(3));

        let record = record(&f, &group);
        assert!(!record.is_active);
        assert!(!record.is_member(&key(2)));
        assert!(f.storage.key_pairs(&group).unwrap().is_empty());
        assert!(!f.storage.is_polling(&group).unwrap());
        assert!(f.dispatcher.sent().is_empty());
    }

    #[test]
    fn members_removed_naming_the_sender_is_a_quit() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MembersRemoved(list(&[3])), 2_000, &group, &key(3));

        let record = record(&f, &group);
        assert!(record.is_active);
        assert_eq!(record.members, members(&[1, 2]));
        let entry = f.timeline.last_for(&record.group_id).unwrap();
        assert_eq!(entry.entry.kind, InfoKind::Quit);
        assert_eq!(entry.entry.sender, Some(key(3)));
        assert!(f.dispatcher.sent().is_empty());
    }

    #[test]
    fn members_removed_by_a_member_seen_by_admin_rotates() {
        let mut f = fixture(1);
        let group = joined(&f, &[1, 2, 3, 4], &[1]);

        f.controller.handle_message(ClosedGroupUpdate::MembersRemoved(list(&[4])), 2_000, &group, &key(2));

        assert_eq!(record(&f, &group).members, members(&[1, 2, 3]));
        let sent = f.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        let Some(ClosedGroupUpdate::EncryptionKeyPair(distribution)) = sent[0].update() else {
            panic!("expected a key distribution");
        };
        assert!(distribution.wrapper_for(&key(2)).is_some());
        assert!(distribution.wrapper_for(&key(3)).is_some());
        assert!(distribution.wrapper_for(&key(4)).is_none());
        assert_eq!(f.storage.key_pairs(&group).unwrap().len(), 2);
    }

    #[test]
    fn update_removing_admin_with_survivors_is_dropped() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);
        let before = record(&f, &group);

        let update = GroupUpdate {
            name: "coup".into(),
            members: members(&[2, 3]).iter().map(PublicKey::to_vec).collect(),
        };
        f.controller.handle_message(ClosedGroupUpdate::Update(update), 2_000, &group, &key(3));

        assert_eq!(record(&f, &group), before);
    }

    #[test]
    fn update_from_departing_member_is_a_quit() {
        let mut f = fixture(1);
        let group = joined(&f, &[1, 2, 3], &[1]);

        let update = GroupUpdate {
            name: "joined".into(),
            members: members(&[1, 2]).iter().map(PublicKey::to_vec).collect(),
        };
        f.controller.handle_message(ClosedGroupUpdate::Update(update), 2_000, &group, &key(3));

        assert_eq!(record(&f, &group).members, members(&[1, 2]));
        let entry = f.timeline.last_for(&GroupId::from_public_key(&group)).unwrap();
        assert_eq!(entry.entry.kind, InfoKind::Quit);
        let kinds: Vec<_> = f.dispatcher.sent().iter().filter_map(SentEnvelope::kind).collect();
        assert_eq!(kinds, vec![UpdateKind::EncryptionKeyPair]);
    }

    #[test]
    fn key_distribution_from_admin_is_installed_once() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);

        let rotated = EncryptionKeyPair::from_secret([44; 32]);
        let plaintext = KeyPairData {
            public_key: rotated.public_bytes().to_vec(),
            private_key: rotated.secret_bytes().to_vec(),
        }
        .to_cbor()
        .unwrap();
        let encrypted_key_pair = X25519PeerEncryption::new(SystemEnv::new())
            .wrap_for_recipient(&plaintext, &key(2))
            .unwrap();
        let distribution = KeyPairDistribution {
            wrappers: vec![KeyPairWrapper {
                public_key: key(2).to_vec(),
                encrypted_key_pair,
            }],
        };

        for _ in 0..2 {
            f.controller.handle_message(
                ClosedGroupUpdate::EncryptionKeyPair(distribution.clone()),
                2_000,
                &group,
                &key(1),
            );
        }

        let pairs = f.storage.key_pairs(&group).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], rotated);
    }

    #[test]
    fn key_distribution_from_non_admin_is_dropped() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2, 3], &[1]);

        f.controller.handle_message(
            ClosedGroupUpdate::EncryptionKeyPair(KeyPairDistribution::default()),
            2_000,
            &group,
            &key(3),
        );

        assert_eq!(f.storage.key_pairs(&group).unwrap().len(), 1);
    }

    #[test]
    fn own_echo_and_garbage_are_dropped() {
        let mut f = fixture(2);
        let group = joined(&f, &[1, 2], &[1]);
        let before = record(&f, &group);

        f.controller.handle_message(
            ClosedGroupUpdate::NameChange(NameChange { name: "echo".into() }),
            2_000,
            &group,
            &key(2),
        );
        f.controller.handle_envelope(b"not an envelope");
        f.controller.handle_envelope(&[]);

        assert_eq!(record(&f, &group), before);
    }
}
