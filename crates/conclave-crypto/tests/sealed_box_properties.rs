//! Property tests for key wrapping.
//!
//! Ensures a sealed key pair opens only for its recipient, for any plaintext
//! and any choice of ephemeral randomness.

use conclave_crypto::{CryptoError, EncryptionKeyPair, SEAL_OVERHEAD, open, seal};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_recipient_recovers_plaintext(
        recipient_secret in any::<[u8; 32]>(),
        ephemeral in any::<[u8; 32]>(),
        nonce in any::<[u8; 24]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let recipient = EncryptionKeyPair::from_secret(recipient_secret);
        let sealed = seal(&plaintext, &recipient.public_bytes(), ephemeral, nonce)
            .expect("clamped keys are contributory");

        prop_assert_eq!(sealed.len(), plaintext.len() + SEAL_OVERHEAD);
        prop_assert_eq!(open(&sealed, &recipient).expect("open"), plaintext);
    }

    #[test]
    fn prop_other_keys_cannot_open(
        recipient_secret in any::<[u8; 32]>(),
        other_secret in any::<[u8; 32]>(),
        ephemeral in any::<[u8; 32]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let recipient = EncryptionKeyPair::from_secret(recipient_secret);
        let other = EncryptionKeyPair::from_secret(other_secret);
        prop_assume!(recipient.public_bytes() != other.public_bytes());

        let sealed = seal(&plaintext, &recipient.public_bytes(), ephemeral, [0; 24])
            .expect("seal");
        let result = open(&sealed, &other);
        let rejected = matches!(result, Err(CryptoError::DecryptionFailed { .. }));
        prop_assert!(rejected, "expected DecryptionFailed, got {:?}", result);
    }

    #[test]
    fn prop_open_never_panics(
        secret in any::<[u8; 32]>(),
        garbage in prop::collection::vec(any::<u8>(), 0..200),
    ) {
        let recipient = EncryptionKeyPair::from_secret(secret);
        let _ = open(&garbage, &recipient);
    }
}

#[test]
fn wire_parts_rebuild_the_same_pair() {
    let pair = EncryptionKeyPair::from_secret([77; 32]);
    let rebuilt = EncryptionKeyPair::from_parts(&pair.public_bytes(), &*pair.secret_bytes())
        .expect("matching halves");

    assert_eq!(rebuilt.public_bytes(), pair.public_bytes());
}
