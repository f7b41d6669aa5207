//! Key rotation policy.
//!
//! Removing anyone from a group must cut them off from future messages, so the
//! group's key pair is replaced and the new pair is handed only to the members
//! who remain. Additions never rotate: new members simply receive the current
//! pair.
//!
//! Only admins rotate. Every admin that observes a removal generates a pair of
//! its own, so a group with several admins may see several rotations for one
//! removal; each is a valid successor and receivers keep the whole history.

use std::collections::BTreeSet;

use conclave_proto::PublicKey;

/// Whether a membership change must trigger a rotation.
#[must_use]
pub fn should_rotate(removed_any: bool, local_is_admin: bool) -> bool {
    removed_any && local_is_admin
}

/// Who receives a rotated key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    /// Members the new pair is wrapped for
    pub targets: BTreeSet<PublicKey>,
}

impl RotationPlan {
    /// Plan a rotation for the transition `old` → `new`.
    ///
    /// Returns `None` when the policy does not fire. Targets are the members
    /// after the change, so freshly added members receive the new pair too.
    ///
    /// # Invariants
    ///
    /// - Post: no target is in `old - new`
    #[must_use]
    pub fn for_transition(
        old: &BTreeSet<PublicKey>,
        new: &BTreeSet<PublicKey>,
        local_is_admin: bool,
    ) -> Option<Self> {
        let removed_any = old.difference(new).next().is_some();
        if !should_rotate(removed_any, local_is_admin) {
            return None;
        }

        let targets = new.clone();
        debug_assert!(old.difference(new).all(|removed| !targets.contains(removed)));
        Some(Self { targets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(seeds: &[u8]) -> BTreeSet<PublicKey> {
        seeds.iter().map(|s| PublicKey::from_x25519([*s; 32])).collect()
    }

    #[test]
    fn policy_table() {
        assert!(should_rotate(true, true));
        assert!(!should_rotate(true, false));
        assert!(!should_rotate(false, true));
        assert!(!should_rotate(false, false));
    }

    #[test]
    fn removal_targets_remaining_members() {
        let plan = RotationPlan::for_transition(&keys(&[1, 2, 3]), &keys(&[1, 2, 4]), true)
            .expect("removal by admin rotates");

        assert_eq!(plan.targets, keys(&[1, 2, 4]));
        assert!(!plan.targets.contains(&PublicKey::from_x25519([3; 32])));
    }

    #[test]
    fn additions_do_not_rotate() {
        assert_eq!(RotationPlan::for_transition(&keys(&[1, 2]), &keys(&[1, 2, 3]), true), None);
    }

    #[test]
    fn non_admins_do_not_rotate() {
        assert_eq!(RotationPlan::for_transition(&keys(&[1, 2, 3]), &keys(&[1, 2]), false), None);
    }
}
