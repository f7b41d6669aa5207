//! Local intents.
//!
//! Each intent validates against the stored record, sends exactly one primary
//! update to the group and only then touches local state. A failed primary
//! send aborts the intent with nothing changed.

use std::collections::BTreeSet;

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{
    ClosedGroupUpdate, GroupId, GroupPublicKey, PublicKey,
    payloads::{GroupUpdate, MemberList, NameChange},
};

use super::{ClosedGroupController, new_group_update};
use crate::{
    env::Environment, error::GroupError, jobs::SendJob, record::GroupRecord,
    timeline::InfoKind,
};

impl<E: Environment> ClosedGroupController<E> {
    /// Create a group with the local user as its only admin.
    ///
    /// The local user is always a member, whether or not `members` names
    /// them. Every other member receives a `New` directly; a send that fails
    /// is queued for retry rather than failing creation.
    ///
    /// # Errors
    ///
    /// - `GroupError::InvalidUpdate` if the name is empty, nobody but the
    ///   local user is named, or the group would exceed the size limit
    pub fn create_group(
        &mut self,
        name: &str,
        members: &BTreeSet<PublicKey>,
    ) -> Result<GroupId, GroupError> {
        let local = self.identity.public_key;
        if name.is_empty() {
            return Err(GroupError::invalid("group name must not be empty"));
        }

        let mut members = members.clone();
        members.insert(local);
        if members.len() < 2 {
            return Err(GroupError::invalid("a group needs at least one other member"));
        }
        self.check_size(members.len())?;

        let group = GroupPublicKey::from_x25519(
            EncryptionKeyPair::from_secret(self.env.random_key()).public_bytes(),
        );
        let pair = EncryptionKeyPair::from_secret(self.env.random_key());
        let admins: BTreeSet<PublicKey> = [local].into_iter().collect();
        let id = GroupId::from_public_key(&group);

        self.deps.groups.create_group(&GroupRecord {
            group_id: id.clone(),
            title: name.to_string(),
            members: members.clone(),
            admins: admins.clone(),
            created_at: self.env.wall_clock_millis(),
            is_active: true,
            profile_sharing: true,
        })?;

        let envelope =
            self.envelope(&group, new_group_update(&group, name, &pair, &members, &admins))?;
        for member in members.iter().filter(|m| **m != local) {
            if let Err(error) = self.deps.dispatcher.send_to_member(member, &envelope) {
                tracing::warn!(%group, ?member, %error, "direct New failed, queued for retry");
                self.deps.jobs.submit(SendJob::new(group, *member));
            }
        }

        self.deps.keys.register_polling(&group)?;
        self.deps.keys.append_key_pair(&group, &pair)?;
        self.record_outgoing(&group, InfoKind::Update)?;
        self.subscribe_push(&group);

        tracing::info!(%group, members = members.len(), "created closed group");
        Ok(id)
    }

    /// Leave a group by sending an `Update` without the local user.
    ///
    /// An admin leaving disbands the group: the update carries an empty
    /// member list.
    ///
    /// # Errors
    ///
    /// Everything [`Self::update`] returns.
    pub fn leave(&mut self, group: &GroupPublicKey) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let record = self.load_record(group)?;

        let members = if record.is_admin(&local) {
            BTreeSet::new()
        } else {
            record.members.iter().copied().filter(|m| *m != local).collect()
        };

        self.update(group, &members, &record.title)
    }

    /// Leave a group with a `MemberLeft`.
    ///
    /// Peers remove the sender; if the sender was an admin they disable the
    /// group instead.
    ///
    /// # Errors
    ///
    /// - `GroupError::NoThread` if the group is unknown
    /// - `GroupError::InvalidUpdate` if it is already inactive
    /// - `GroupError::Dispatch` if the `MemberLeft` could not be sent
    pub fn explicit_leave(&mut self, group: &GroupPublicKey) -> Result<(), GroupError> {
        let record = self.load_record(group)?;
        Self::require_active(&record)?;

        self.send_to_group(group, ClosedGroupUpdate::MemberLeft)?;
        self.disband_locally(group)?;
        self.record_outgoing(group, InfoKind::Quit)?;

        tracing::info!(%group, "left closed group");
        Ok(())
    }

    /// Replace the title and member list in one update.
    ///
    /// Omitting the local user from `new_members` means leaving. An empty
    /// `new_members` disbands the group and is the only way an admin can be
    /// dropped.
    ///
    /// # Errors
    ///
    /// Checked in this order:
    ///
    /// - `GroupError::NoThread` if the group is unknown
    /// - `GroupError::InvalidUpdate` if the group is inactive
    /// - `GroupError::NoKeyPair` if the group has no key pair
    /// - `GroupError::InvalidUpdate` if the name is empty, the size limit is
    ///   exceeded, an admin is removed while members remain, or leaving is
    ///   combined with any other membership change
    /// - `GroupError::Dispatch` if the `Update` could not be sent
    pub fn update(
        &mut self,
        group: &GroupPublicKey,
        new_members: &BTreeSet<PublicKey>,
        name: &str,
    ) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let record = self.load_record(group)?;
        Self::require_active(&record)?;
        self.latest_key_pair(group)?;

        if name.is_empty() {
            return Err(GroupError::invalid("group name must not be empty"));
        }
        self.check_size(new_members.len())?;

        let removed: BTreeSet<PublicKey> =
            record.members.difference(new_members).copied().collect();
        let added: BTreeSet<PublicKey> = new_members.difference(&record.members).copied().collect();
        let is_leaving = !new_members.contains(&local);

        if !new_members.is_empty() && record.contains_admin(removed.iter()) {
            return Err(GroupError::invalid("admins cannot be removed unless the group is disbanded"));
        }
        if is_leaving && !new_members.is_empty() && (removed.len() != 1 || !added.is_empty()) {
            return Err(GroupError::invalid("leaving cannot be combined with other membership changes"));
        }

        self.send_to_group(
            group,
            ClosedGroupUpdate::Update(GroupUpdate {
                name: name.to_string(),
                members: new_members.iter().map(PublicKey::to_vec).collect(),
            }),
        )?;

        if is_leaving {
            self.disband_locally(group)?;
        } else {
            let local_is_admin = record.is_admin(&local);
            self.rotate_if_needed(group, &record.members, new_members, local_is_admin);
            self.queue_new_for(group, &added);
        }

        self.deps.groups.update_title(&record.group_id, name)?;
        if !is_leaving {
            self.deps.groups.update_members(&record.group_id, new_members)?;
        }

        let kind = if is_leaving { InfoKind::Quit } else { InfoKind::Update };
        self.record_outgoing(group, kind)?;

        tracing::info!(
            %group,
            added = added.len(),
            removed = removed.len(),
            leaving = is_leaving,
            "updated closed group"
        );
        Ok(())
    }

    /// Add members without touching anyone else.
    ///
    /// Keys that are already members are ignored. Each genuinely new member
    /// gets a queued `New` with the full group state.
    ///
    /// # Errors
    ///
    /// - `GroupError::NoThread` / `GroupError::NoKeyPair` for missing state
    /// - `GroupError::InvalidUpdate` if the group is inactive, nobody new is
    ///   named, or the size limit would be exceeded
    /// - `GroupError::Dispatch` if the `MembersAdded` could not be sent
    pub fn add_members(
        &mut self,
        group: &GroupPublicKey,
        members: &BTreeSet<PublicKey>,
    ) -> Result<(), GroupError> {
        let record = self.load_record(group)?;
        Self::require_active(&record)?;
        self.latest_key_pair(group)?;

        let added: BTreeSet<PublicKey> = members.difference(&record.members).copied().collect();
        if added.is_empty() {
            return Err(GroupError::invalid("no new members to add"));
        }
        self.check_size(record.members.len() + added.len())?;

        self.send_to_group(group, ClosedGroupUpdate::MembersAdded(MemberList::from_keys(&added)))?;

        let updated: BTreeSet<PublicKey> = record.members.union(&added).copied().collect();
        self.deps.groups.update_members(&record.group_id, &updated)?;
        self.queue_new_for(group, &added);
        self.record_outgoing(group, InfoKind::Update)?;

        tracing::info!(%group, added = added.len(), "added members");
        Ok(())
    }

    /// Remove non-admin members. An admin rotates the group key afterwards.
    ///
    /// # Errors
    ///
    /// - `GroupError::NoThread` / `GroupError::NoKeyPair` for missing state
    /// - `GroupError::InvalidUpdate` if the group is inactive, no current
    ///   member is named, the local user is named (use [`Self::leave`]), or an
    ///   admin is named
    /// - `GroupError::Dispatch` if the `MembersRemoved` could not be sent
    pub fn remove_members(
        &mut self,
        group: &GroupPublicKey,
        members: &BTreeSet<PublicKey>,
    ) -> Result<(), GroupError> {
        let local = self.identity.public_key;
        let record = self.load_record(group)?;
        Self::require_active(&record)?;
        self.latest_key_pair(group)?;

        let removed: BTreeSet<PublicKey> = members.intersection(&record.members).copied().collect();
        if removed.is_empty() {
            return Err(GroupError::invalid("no current members to remove"));
        }
        if removed.contains(&local) {
            return Err(GroupError::invalid("cannot remove yourself, leave the group instead"));
        }

        let updated: BTreeSet<PublicKey> = record.members.difference(&removed).copied().collect();
        if !updated.is_empty() && record.contains_admin(removed.iter()) {
            return Err(GroupError::invalid("admins cannot be removed unless the group is disbanded"));
        }

        self.send_to_group(
            group,
            ClosedGroupUpdate::MembersRemoved(MemberList::from_keys(&removed)),
        )?;
        self.deps.groups.update_members(&record.group_id, &updated)?;
        self.rotate_if_needed(group, &record.members, &updated, record.is_admin(&local));
        self.record_outgoing(group, InfoKind::Update)?;

        tracing::info!(%group, removed = removed.len(), "removed members");
        Ok(())
    }

    /// Rename a group.
    ///
    /// # Errors
    ///
    /// - `GroupError::NoThread` if the group is unknown
    /// - `GroupError::InvalidUpdate` if it is inactive or `name` is empty
    /// - `GroupError::Dispatch` if the `NameChange` could not be sent
    pub fn change_name(&mut self, group: &GroupPublicKey, name: &str) -> Result<(), GroupError> {
        let record = self.load_record(group)?;
        Self::require_active(&record)?;
        if name.is_empty() {
            return Err(GroupError::invalid("group name must not be empty"));
        }

        self.send_to_group(group, ClosedGroupUpdate::NameChange(NameChange { name: name.to_string() }))?;
        self.deps.groups.update_title(&record.group_id, name)?;
        self.record_outgoing(group, InfoKind::Update)?;

        tracing::info!(%group, "renamed closed group");
        Ok(())
    }
}
