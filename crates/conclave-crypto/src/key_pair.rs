//! X25519 group encryption key pairs

use std::fmt;

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Size of an X25519 public or secret key
pub const KEY_SIZE: usize = 32;

/// Asymmetric key pair shared by every member of a group.
///
/// Immutable once created. The secret is zeroized when the pair is dropped.
#[derive(Clone)]
pub struct EncryptionKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EncryptionKeyPair {
    /// Build a key pair from 32 random bytes.
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production.
    #[must_use]
    pub fn from_secret(secret: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair received over the wire.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if either half is not 32 bytes
    /// - `KeyMismatch` if `public` is not derived from `private`
    pub fn from_parts(public: &[u8], private: &[u8]) -> Result<Self, CryptoError> {
        let public: [u8; KEY_SIZE] = public.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: public.len() }
        })?;
        let private: Zeroizing<[u8; KEY_SIZE]> =
            Zeroizing::new(private.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: private.len(),
            })?);

        let pair = Self::from_secret(*private);
        if pair.public.as_bytes() != &public {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(pair)
    }

    /// Public half.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Secret half, zeroized when the returned value drops.
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// X25519 agreement with a peer's public key.
    ///
    /// # Errors
    ///
    /// - `NonContributory` if the peer key is a low-order point
    pub fn diffie_hellman(
        &self,
        peer: &[u8; KEY_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl PartialEq for EncryptionKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public.as_bytes() == other.public.as_bytes()
            && *self.secret_bytes() == *other.secret_bytes()
    }
}

impl Eq for EncryptionKeyPair {}

impl fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyPair")
            .field("public", &self.public.as_bytes())
            .field("secret", &"<redacted>")
            .finish()
    }
}
