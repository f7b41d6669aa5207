//! Update kinds carried in the envelope header.

use std::fmt;

/// Discriminates the [`crate::ClosedGroupUpdate`] variants on the wire.
///
/// The payload is serialized without a variant tag; this byte in the header
/// is the only thing that says how to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpdateKind {
    /// Full group state for a new or re-added member
    New = 1,
    /// Name and full member list replacement
    Update = 2,
    /// Members appended
    MembersAdded = 3,
    /// Members removed
    MembersRemoved = 4,
    /// Title change only
    NameChange = 5,
    /// Sender removes itself
    MemberLeft = 6,
    /// Rotated key pair, wrapped per recipient
    EncryptionKeyPair = 7,
}

impl UpdateKind {
    /// All kinds, in wire order.
    pub const ALL: [Self; 7] = [
        Self::New,
        Self::Update,
        Self::MembersAdded,
        Self::MembersRemoved,
        Self::NameChange,
        Self::MemberLeft,
        Self::EncryptionKeyPair,
    ];

    /// Wire byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. `None` if unrecognized.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::New),
            2 => Some(Self::Update),
            3 => Some(Self::MembersAdded),
            4 => Some(Self::MembersRemoved),
            5 => Some(Self::NameChange),
            6 => Some(Self::MemberLeft),
            7 => Some(Self::EncryptionKeyPair),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_are_stable() {
        for kind in UpdateKind::ALL {
            assert_eq!(UpdateKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(UpdateKind::from_u8(0), None);
        assert_eq!(UpdateKind::from_u8(8), None);
    }
}
