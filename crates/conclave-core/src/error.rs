//! Error types for closed-group operations.
//!
//! Local intents return [`GroupError`]. Remote updates never surface errors:
//! anything that fails validation is logged and dropped, so an attacker cannot
//! learn from error responses.

use conclave_crypto::CryptoError;
use conclave_proto::{GroupId, GroupPublicKey, ProtocolError};
use thiserror::Error;

use crate::storage::StorageError;

/// Failure handing an envelope to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Transport is not accepting messages right now
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Transport accepted the call but could not reach the recipient
    #[error("recipient unreachable: {0}")]
    Unreachable(String),
}

/// Failure attempting a queued send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Transport refused the envelope
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// The envelope could not be built from current state
    #[error("could not build envelope: {0}")]
    Build(String),
}

/// Failure registering or dropping push notifications. Logged, never
/// propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("push registration failed: {0}")]
pub struct PushError(pub String);

/// Errors returned from local group operations.
#[derive(Error, Debug)]
pub enum GroupError {
    /// No record exists for the group
    #[error("no group record for {group}")]
    NoThread {
        /// Group that was looked up
        group: GroupId,
    },

    /// Group has no encryption key pair
    #[error("no encryption key pair for group {group}")]
    NoKeyPair {
        /// Group that was looked up
        group: GroupPublicKey,
    },

    /// The requested change violates a membership rule
    #[error("invalid update: {reason}")]
    InvalidUpdate {
        /// Which rule was violated
        reason: String,
    },

    /// Local storage failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The primary group message could not be sent
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Key generation or wrapping failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// An update could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl GroupError {
    /// Shorthand for [`GroupError::InvalidUpdate`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidUpdate { reason: reason.into() }
    }

    /// Returns true if retrying the same operation may succeed.
    ///
    /// Only infrastructure failures are retryable. Rule violations and missing
    /// state fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Dispatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(GroupError::Dispatch(DispatchError::Unavailable("down".into())).is_retryable());
        assert!(GroupError::Storage(StorageError::Backend("io".into())).is_retryable());
        assert!(!GroupError::invalid("empty name").is_retryable());
        assert!(!GroupError::Crypto(CryptoError::KeyMismatch).is_retryable());
    }

    #[test]
    fn messages_name_the_rule() {
        let err = GroupError::invalid("cannot remove an admin");
        assert_eq!(err.to_string(), "invalid update: cannot remove an admin");
    }
}
