//! Property-based tests for envelope and update encoding.
//!
//! Verifies that every update kind survives the trip through an envelope and
//! the wire, and that decoding arbitrary bytes never panics.

use conclave_proto::{
    ClosedGroupUpdate, Envelope, EnvelopeHeader, GroupId, GroupPublicKey, PublicKey, UpdateKind,
    payloads::{
        GroupUpdate, KeyPairData, KeyPairDistribution, KeyPairWrapper, MemberList, NameChange,
        NewGroup,
    },
};
use proptest::prelude::*;

fn arbitrary_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>().prop_map(PublicKey::from_x25519)
}

fn arbitrary_group_key() -> impl Strategy<Value = GroupPublicKey> {
    any::<[u8; 32]>().prop_map(GroupPublicKey::from_x25519)
}

fn arbitrary_members() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(arbitrary_key().prop_map(|k| k.to_vec()), 0..20)
}

fn arbitrary_update() -> impl Strategy<Value = ClosedGroupUpdate> {
    prop_oneof![
        (
            arbitrary_group_key(),
            ".{0,32}",
            any::<[u8; 32]>(),
            any::<[u8; 32]>(),
            arbitrary_members(),
            arbitrary_members(),
        )
            .prop_map(|(gpk, name, public, private, members, admins)| {
                ClosedGroupUpdate::New(NewGroup {
                    public_key: gpk.as_bytes().to_vec(),
                    name,
                    encryption_key_pair: KeyPairData {
                        public_key: public.to_vec(),
                        private_key: private.to_vec(),
                    },
                    members,
                    admins,
                })
            }),
        (".{0,32}", arbitrary_members())
            .prop_map(|(name, members)| ClosedGroupUpdate::Update(GroupUpdate { name, members })),
        arbitrary_members().prop_map(|members| ClosedGroupUpdate::MembersAdded(MemberList {
            members
        })),
        arbitrary_members().prop_map(|members| ClosedGroupUpdate::MembersRemoved(MemberList {
            members
        })),
        ".{0,32}".prop_map(|name| ClosedGroupUpdate::NameChange(NameChange { name })),
        Just(ClosedGroupUpdate::MemberLeft),
        prop::collection::vec(
            (arbitrary_key(), prop::collection::vec(any::<u8>(), 0..128)),
            0..10
        )
        .prop_map(|entries| {
            ClosedGroupUpdate::EncryptionKeyPair(KeyPairDistribution {
                wrappers: entries
                    .into_iter()
                    .map(|(key, ciphertext)| KeyPairWrapper {
                        public_key: key.to_vec(),
                        encrypted_key_pair: ciphertext,
                    })
                    .collect(),
            })
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_update_survives_the_wire(
        update in arbitrary_update(),
        group in arbitrary_group_key(),
        sender in arbitrary_key(),
        sent in any::<u64>(),
    ) {
        let mut header = EnvelopeHeader::new(update.kind());
        header.set_group_public_key(&group);
        header.set_sender(&sender);
        header.set_sent_timestamp(sent);

        let envelope = update.clone().into_envelope(header).expect("encode");
        let wire = envelope.to_bytes().expect("wire");

        let decoded = Envelope::decode(&wire).expect("decode envelope");
        prop_assert_eq!(decoded.header.kind(), Some(update.kind()));
        prop_assert_eq!(decoded.header.group_public_key(), group);
        prop_assert_eq!(decoded.header.sender(), sender);
        prop_assert_eq!(decoded.header.sent_timestamp(), sent);

        let parsed = ClosedGroupUpdate::from_envelope(&decoded).expect("decode update");
        prop_assert_eq!(parsed, update);
    }

    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(envelope) = Envelope::decode(&bytes) {
            let _ = ClosedGroupUpdate::from_envelope(&envelope);
        }
    }

    #[test]
    fn prop_payload_decode_never_panics(
        kind in prop::sample::select(UpdateKind::ALL.to_vec()),
        bytes in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let _ = ClosedGroupUpdate::decode(kind, &bytes);
    }

    #[test]
    fn prop_group_id_is_deterministic_and_reversible(group in arbitrary_group_key()) {
        let first = GroupId::from_public_key(&group);
        let second = GroupId::from_public_key(&group);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.decode().expect("decode"), group);
    }

    #[test]
    fn prop_distinct_groups_have_distinct_ids(a in arbitrary_group_key(), b in arbitrary_group_key()) {
        prop_assume!(a != b);
        prop_assert_ne!(GroupId::from_public_key(&a), GroupId::from_public_key(&b));
    }
}

#[test]
fn corrupted_magic_is_rejected_before_payload() {
    let envelope = ClosedGroupUpdate::MemberLeft
        .into_envelope(EnvelopeHeader::new(UpdateKind::MemberLeft))
        .expect("encode");
    let mut wire = envelope.to_bytes().expect("wire").to_vec();
    wire[1] ^= 0xFF;

    assert!(Envelope::decode(&wire).is_err());
}
