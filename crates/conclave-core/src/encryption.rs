//! Per-recipient wrapping of key material.

use conclave_crypto::{CryptoError, EncryptionKeyPair, NONCE_SIZE, open, seal};
use conclave_proto::PublicKey;

use crate::env::Environment;

/// Wraps a payload so only one member can read it.
pub trait PeerEncryption: Send + Sync {
    /// Seal `plaintext` to `recipient`.
    fn wrap_for_recipient(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Open a payload sealed to the local identity.
    fn unwrap(&self, ciphertext: &[u8], local: &EncryptionKeyPair)
    -> Result<Vec<u8>, CryptoError>;
}

/// [`PeerEncryption`] over the X25519 sealed box, drawing ephemeral keys and
/// nonces from the environment.
#[derive(Debug, Clone)]
pub struct X25519PeerEncryption<E> {
    env: E,
}

impl<E: Environment> X25519PeerEncryption<E> {
    /// Create a wrapper using `env` for randomness.
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

impl<E: Environment> PeerEncryption for X25519PeerEncryption<E> {
    fn wrap_for_recipient(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = self.env.random_key();
        let mut nonce = [0u8; NONCE_SIZE];
        self.env.random_bytes(&mut nonce);

        seal(plaintext, &recipient.x25519_bytes(), ephemeral, nonce)
    }

    fn unwrap(
        &self,
        ciphertext: &[u8],
        local: &EncryptionKeyPair,
    ) -> Result<Vec<u8>, CryptoError> {
        open(ciphertext, local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SystemEnv;

    #[test]
    fn wrap_round_trip_through_public_key() {
        let identity = EncryptionKeyPair::from_secret([8; 32]);
        let member = PublicKey::from_x25519(identity.public_bytes());
        let encryption = X25519PeerEncryption::new(SystemEnv::new());

        let wrapped = encryption.wrap_for_recipient(b"key pair", &member).unwrap();
        assert_eq!(encryption.unwrap(&wrapped, &identity).unwrap(), b"key pair");
    }

    #[test]
    fn each_wrap_is_fresh() {
        let identity = EncryptionKeyPair::from_secret([8; 32]);
        let member = PublicKey::from_x25519(identity.public_bytes());
        let encryption = X25519PeerEncryption::new(SystemEnv::new());

        let a = encryption.wrap_for_recipient(b"same", &member).unwrap();
        let b = encryption.wrap_for_recipient(b"same", &member).unwrap();
        assert_ne!(a, b);
    }
}
