//! Per-recipient key wrapping (sealed box)
//!
//! Wire layout of a sealed value:
//!
//! ```text
//! [ephemeral public key: 32][nonce: 24][ciphertext + Poly1305 tag]
//! ```
//!
//! All functions are pure: the ephemeral secret and nonce come from the
//! caller.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{CryptoError, EncryptionKeyPair, KEY_SIZE};

/// Label used for wrap key derivation
const WRAP_KEY_LABEL: &[u8] = b"conclave key wrap v1";

/// Size of the ephemeral public key prefix
pub const EPHEMERAL_KEY_SIZE: usize = 32;

/// Size of the `XChaCha20` nonce
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size
const POLY1305_TAG_SIZE: usize = 16;

/// Bytes a sealed box adds on top of its plaintext
pub const SEAL_OVERHEAD: usize = EPHEMERAL_KEY_SIZE + NONCE_SIZE + POLY1305_TAG_SIZE;

/// Seal `plaintext` so only the holder of `recipient`'s secret can open it.
///
/// # Errors
///
/// - `NonContributory` if `recipient` is a low-order point
///
/// # Security
///
/// - Caller MUST provide a fresh, cryptographically secure
///   `ephemeral_secret` and `nonce` for every call in production
/// - The wrap key is bound to both the ephemeral and recipient public keys
pub fn seal(
    plaintext: &[u8],
    recipient: &[u8; KEY_SIZE],
    ephemeral_secret: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = StaticSecret::from(ephemeral_secret);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let key = derive_wrap_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient);
    let cipher = XChaCha20Poly1305::new((&*key).into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    debug_assert_eq!(sealed.len(), SEAL_OVERHEAD + plaintext.len());
    Ok(sealed)
}

/// Open a value sealed to `recipient`'s public key.
///
/// # Errors
///
/// - `CiphertextTooShort` if `sealed` is shorter than [`SEAL_OVERHEAD`]
/// - `NonContributory` if the embedded ephemeral key is a low-order point
/// - `DecryptionFailed` if the tag does not verify (tampered, or sealed to
///   someone else)
pub fn open(sealed: &[u8], recipient: &EncryptionKeyPair) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::CiphertextTooShort { min: SEAL_OVERHEAD, actual: sealed.len() });
    }

    let (ephemeral_public, rest) = sealed.split_at(EPHEMERAL_KEY_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut ephemeral = [0u8; EPHEMERAL_KEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_public);

    let shared = recipient.diffie_hellman(&ephemeral)?;
    let key = derive_wrap_key(&shared, &ephemeral, &recipient.public_bytes());
    let cipher = XChaCha20Poly1305::new((&*key).into());

    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

/// HKDF-SHA256 over the shared secret, salted with both public keys.
fn derive_wrap_key(
    shared: &[u8; KEY_SIZE],
    ephemeral_public: &[u8; KEY_SIZE],
    recipient_public: &[u8; KEY_SIZE],
) -> Zeroizing<[u8; 32]> {
    let mut salt = [0u8; 2 * KEY_SIZE];
    salt[..KEY_SIZE].copy_from_slice(ephemeral_public);
    salt[KEY_SIZE..].copy_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);

    let mut key = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(WRAP_KEY_LABEL, &mut key[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}
