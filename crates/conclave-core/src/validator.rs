//! Admissibility of remote updates.
//!
//! Structural validity is checked by the protocol crate. This module decides
//! whether a structurally valid update may touch local state, given the
//! record as it stands before the update.

use conclave_proto::PublicKey;

use crate::record::GroupRecord;

/// Result of checking a remote update against local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Update may be applied
    Accept,

    /// Update must be dropped
    Reject {
        /// Human-readable reason for rejection
        reason: String,
    },
}

impl ValidationResult {
    /// True for [`ValidationResult::Accept`].
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Checks remote updates against the local [`GroupRecord`].
///
/// Rejections are not errors: the caller logs them and drops the update.
pub struct UpdateValidator;

impl UpdateValidator {
    /// General admissibility for membership and title updates.
    ///
    /// - The group must be known and active
    /// - Updates sent before the group was created are stale (replays of an
    ///   earlier incarnation of the group)
    /// - The sender must be a member before the update is applied
    pub fn validate_update(
        record: Option<&GroupRecord>,
        sender: &PublicKey,
        sent_timestamp: u64,
    ) -> ValidationResult {
        let Some(record) = record else {
            return ValidationResult::Reject { reason: "unknown group".to_string() };
        };

        if !record.is_active {
            return ValidationResult::Reject { reason: "group is inactive".to_string() };
        }

        if record.created_at > sent_timestamp {
            return ValidationResult::Reject {
                reason: format!(
                    "stale update: sent at {sent_timestamp}, group created at {}",
                    record.created_at
                ),
            };
        }

        if !record.is_member(sender) {
            return ValidationResult::Reject {
                reason: format!("sender {sender:?} is not a member"),
            };
        }

        ValidationResult::Accept
    }

    /// Admissibility for key pair distributions: only admins may rotate.
    pub fn validate_key_distribution(
        record: Option<&GroupRecord>,
        sender: &PublicKey,
    ) -> ValidationResult {
        let Some(record) = record else {
            return ValidationResult::Reject { reason: "unknown group".to_string() };
        };

        if !record.is_active {
            return ValidationResult::Reject { reason: "group is inactive".to_string() };
        }

        if !record.is_admin(sender) {
            return ValidationResult::Reject {
                reason: format!("sender {sender:?} is not an admin"),
            };
        }

        ValidationResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use conclave_proto::{GroupId, GroupPublicKey};

    use super::*;

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_x25519([seed; 32])
    }

    fn record() -> GroupRecord {
        GroupRecord {
            group_id: GroupId::from_public_key(&GroupPublicKey::from_x25519([9; 32])),
            title: "g".into(),
            members: [key(1), key(2)].into_iter().collect(),
            admins: [key(1)].into_iter().collect(),
            created_at: 1_000,
            is_active: true,
            profile_sharing: true,
        }
    }

    #[test]
    fn accepts_member_after_creation() {
        assert!(UpdateValidator::validate_update(Some(&record()), &key(2), 1_000).is_accept());
    }

    #[test]
    fn rejects_stale_update() {
        let result = UpdateValidator::validate_update(Some(&record()), &key(2), 999);
        assert!(matches!(result, ValidationResult::Reject { reason } if reason.contains("stale")));
    }

    #[test]
    fn rejects_non_member() {
        assert!(!UpdateValidator::validate_update(Some(&record()), &key(3), 2_000).is_accept());
    }

    #[test]
    fn rejects_unknown_and_inactive_groups() {
        assert!(!UpdateValidator::validate_update(None, &key(1), 2_000).is_accept());

        let mut inactive = record();
        inactive.is_active = false;
        assert!(!UpdateValidator::validate_update(Some(&inactive), &key(1), 2_000).is_accept());
        assert!(!UpdateValidator::validate_key_distribution(Some(&inactive), &key(1)).is_accept());
    }

    #[test]
    fn key_distribution_requires_admin() {
        assert!(UpdateValidator::validate_key_distribution(Some(&record()), &key(1)).is_accept());
        assert!(!UpdateValidator::validate_key_distribution(Some(&record()), &key(2)).is_accept());
    }
}
