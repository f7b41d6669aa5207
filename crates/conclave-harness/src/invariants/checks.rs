//! Standard invariant checks.
//!
//! All checks assume a quiescent cluster: every packet delivered and every
//! queued job either delivered or abandoned.

use std::collections::BTreeSet;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Active members of a group agree on its title, members and admins.
pub struct MembershipConvergence;

impl Invariant for MembershipConvergence {
    fn name(&self) -> &'static str {
        "membership_convergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for group in state.groups() {
            let mut views = state.participants(&group);
            let Some((first_device, first)) = views.next() else {
                continue;
            };

            for (device, view) in views {
                if (&view.title, &view.members, &view.admins)
                    != (&first.title, &first.members, &first.admins)
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "group {group}: device {} sees {:?}/{} members/{} admins, device {} \
                             sees {:?}/{} members/{} admins",
                            first_device.index,
                            first.title,
                            first.members.len(),
                            first.admins.len(),
                            device.index,
                            view.title,
                            view.members.len(),
                            view.admins.len(),
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Active members of a group hold the same current key.
pub struct KeyConvergence;

impl Invariant for KeyConvergence {
    fn name(&self) -> &'static str {
        "key_convergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for group in state.groups() {
            let latest: BTreeSet<_> =
                state.participants(&group).map(|(_, view)| view.latest_key()).collect();
            if latest.len() > 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("group {group}: {} distinct current keys", latest.len()),
                });
            }
        }
        Ok(())
    }
}

/// Nobody outside a group holds its current key.
///
/// Devices that were removed or left may keep an inactive record, but never
/// the key the remaining members encrypt with.
pub struct ForwardSecrecy;

impl Invariant for ForwardSecrecy {
    fn name(&self) -> &'static str {
        "forward_secrecy"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for group in state.groups() {
            let current: BTreeSet<_> =
                state.participants(&group).filter_map(|(_, view)| view.latest_key()).collect();

            for device in &state.devices {
                let Some(view) = device.groups.get(&group) else {
                    continue;
                };
                if view.is_participant(&device.key) {
                    continue;
                }
                if view.keys.iter().any(|key| current.contains(key)) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "group {group}: former member {} holds the current key",
                            device.index
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Admins are a non-empty subset of the members.
pub struct AdminsAreMembers;

impl Invariant for AdminsAreMembers {
    fn name(&self) -> &'static str {
        "admins_are_members"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for group in state.groups() {
            for (device, view) in state.participants(&group) {
                if view.admins.is_empty() || !view.admins.is_subset(&view.members) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "group {group}: device {} has {} admins, {} not members",
                            device.index,
                            view.admins.len(),
                            view.admins.difference(&view.members).count()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Participation and key material go together: active members poll and hold
/// a key, inactive records hold neither.
pub struct PollingMatchesParticipation;

impl Invariant for PollingMatchesParticipation {
    fn name(&self) -> &'static str {
        "polling_matches_participation"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for device in &state.devices {
            for (group, view) in &device.groups {
                let participant = view.is_participant(&device.key);
                let consistent = if participant {
                    view.polling && !view.keys.is_empty()
                } else {
                    !view.active && !view.polling && view.keys.is_empty()
                };

                if !consistent {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "device {} group {group}: active={} member={} polling={} keys={}",
                            device.index,
                            view.active,
                            view.members.contains(&device.key),
                            view.polling,
                            view.keys.len()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use conclave_proto::{GroupPublicKey, PublicKey};

    use super::*;
    use crate::invariants::{DeviceSnapshot, GroupSnapshot};

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_x25519([seed; 32])
    }

    fn view(members: &[u8], keys: &[u8]) -> GroupSnapshot {
        GroupSnapshot {
            title: "g".into(),
            members: members.iter().map(|s| key(*s)).collect(),
            admins: [key(1)].into_iter().collect(),
            active: true,
            polling: true,
            keys: keys.iter().map(|k| [*k; 32]).collect(),
        }
    }

    fn device(index: u8, group: GroupSnapshot) -> DeviceSnapshot {
        let gpk = GroupPublicKey::from_x25519([0xAA; 32]);
        DeviceSnapshot { index: index.into(), key: key(index), groups: BTreeMap::from([(gpk, group)]) }
    }

    #[test]
    fn converged_views_pass() {
        let state = SystemSnapshot::from_devices(vec![
            device(1, view(&[1, 2], &[7])),
            device(2, view(&[1, 2], &[7])),
        ]);
        assert!(MembershipConvergence.check(&state).is_ok());
        assert!(KeyConvergence.check(&state).is_ok());
        assert!(AdminsAreMembers.check(&state).is_ok());
    }

    #[test]
    fn diverging_keys_are_caught() {
        let state = SystemSnapshot::from_devices(vec![
            device(1, view(&[1, 2], &[7])),
            device(2, view(&[1, 2], &[7, 8])),
        ]);
        assert!(KeyConvergence.check(&state).is_err());
    }

    #[test]
    fn former_member_with_current_key_is_caught() {
        let mut gone = view(&[1], &[7]);
        gone.active = false;
        gone.polling = false;
        let state = SystemSnapshot::from_devices(vec![device(1, view(&[1], &[7])), device(2, gone)]);

        let violation = ForwardSecrecy.check(&state).unwrap_err();
        assert_eq!(violation.invariant, "forward_secrecy");
        assert!(PollingMatchesParticipation.check(&state).is_err());
    }
}
