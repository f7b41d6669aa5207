//! Error types for key material operations

use thiserror::Error;

/// Errors from key pair handling and key wrapping
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Public key does not belong to the secret it was paired with
    #[error("public key does not match secret key")]
    KeyMismatch,

    /// Diffie-Hellman produced an all-zero shared secret
    ///
    /// The peer key is a low-order point. Accepting it would make the wrap key
    /// predictable.
    #[error("peer public key is not contributory")]
    NonContributory,

    /// Sealed box is shorter than its fixed overhead
    #[error("ciphertext too short: need at least {min} bytes, got {actual}")]
    CiphertextTooShort {
        /// Minimum sealed length
        min: usize,
        /// Length received
        actual: usize,
    },

    /// Decryption failed (authentication tag mismatch or wrong recipient)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },
}
