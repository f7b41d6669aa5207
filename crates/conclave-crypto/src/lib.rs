//! Conclave Cryptographic Primitives
//!
//! Key material for closed groups. Pure functions with deterministic outputs:
//! callers provide random bytes, which keeps simulation runs reproducible.
//!
//! # Key Lifecycle
//!
//! ```text
//! random 32 bytes
//!        │
//!        ▼
//! EncryptionKeyPair (X25519) ── appended to the group's key history
//!        │
//!        ▼
//! seal() once per surviving member ── EncryptionKeyPair update on the wire
//!        │
//!        ▼
//! open() on each recipient ── appended to their history
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - A fresh key pair is generated whenever a member is removed
//! - The pair is sealed only to members who remain, so removed members never
//!   see it
//!
//! Confidentiality of the wrap:
//! - Each seal uses a fresh ephemeral X25519 key
//! - HKDF-SHA256 binds the wrap key to both ephemeral and recipient keys
//! - XChaCha20-Poly1305 rejects any tampered ciphertext
//! - Low-order points that would force an all-zero shared secret are rejected

mod error;
mod key_pair;
mod sealed_box;

pub use error::CryptoError;
pub use key_pair::{EncryptionKeyPair, KEY_SIZE};
pub use sealed_box::{EPHEMERAL_KEY_SIZE, NONCE_SIZE, SEAL_OVERHEAD, open, seal};
