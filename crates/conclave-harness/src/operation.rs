//! Operations a simulation can apply.
//!
//! Indices are small integers interpreted modulo the number of devices and
//! groups in the cluster, so any generated value is applicable. Invalid
//! combinations (a stranger renaming a group, an admin removing itself) are
//! expected and simply rejected by the controller.

use arbitrary::Arbitrary;

/// Device index (modulo cluster size).
pub type DeviceId = u8;

/// Group index (modulo groups created so far).
pub type GroupSlot = u8;

/// One step of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Device creates a group with the devices selected by `members`.
    CreateGroup {
        /// Creator
        device: DeviceId,
        /// Bitmask over device indices
        members: u16,
    },

    /// Device adds another device.
    AddMember {
        /// Acting device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
        /// Device to add
        member: DeviceId,
    },

    /// Device removes another device.
    RemoveMember {
        /// Acting device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
        /// Device to remove
        member: DeviceId,
    },

    /// Device leaves with an `Update`.
    Leave {
        /// Leaving device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
    },

    /// Device leaves with a `MemberLeft`.
    ExplicitLeave {
        /// Leaving device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
    },

    /// Device renames a group.
    Rename {
        /// Acting device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
        /// Expanded into the new title
        seed: u8,
    },

    /// Device rotates a group's key for its current members.
    Rotate {
        /// Acting device
        device: DeviceId,
        /// Target group
        group: GroupSlot,
    },

    /// Take a device offline or bring it back.
    SetOffline {
        /// Affected device
        device: DeviceId,
        /// New state
        offline: bool,
    },

    /// Let wall-clock time pass.
    AdvanceClock {
        /// Milliseconds to advance
        millis: u16,
    },
}

impl Operation {
    /// Title a [`Operation::Rename`] expands to.
    pub fn title(seed: u8) -> String {
        format!("group-{seed:02x}")
    }
}

/// What applying an operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The controller accepted the intent
    Applied,
    /// The controller refused it; the message is the error
    Rejected(String),
    /// The operation had no target (no groups yet)
    Skipped,
}
