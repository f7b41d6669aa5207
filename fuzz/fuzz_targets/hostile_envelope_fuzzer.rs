//! Fuzz target for envelopes from untrusted senders
//!
//! A three-device group is created, then each input envelope is built from
//! fuzzed header fields and payload bytes and delivered to every device.
//!
//! # Strategy
//!
//! - Senders: real members, the local device itself, or strangers
//! - Groups: the real group or an unknown one
//! - Timestamps: before, at, or after the group's creation
//! - Payloads: raw bytes under any kind byte
//!
//! # Invariants
//!
//! - Handling never panics
//! - Device state stays readable after every delivery

#![no_main]

use arbitrary::Arbitrary;
use conclave_harness::{Cluster, Operation, SIM_EPOCH_MILLIS};
use conclave_proto::{Envelope, EnvelopeHeader, GroupPublicKey, PublicKey, UpdateKind};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct HostileScenario {
    seed: u64,
    envelopes: Vec<HostileEnvelope>,
}

#[derive(Debug, Arbitrary)]
struct HostileEnvelope {
    sender: SenderChoice,
    group: GroupChoice,
    kind: u8,
    timestamp_offset: i32,
    payload: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum SenderChoice {
    Device(u8),
    Stranger([u8; 32]),
}

#[derive(Debug, Arbitrary)]
enum GroupChoice {
    Real,
    Unknown([u8; 32]),
}

fuzz_target!(|scenario: HostileScenario| {
    let mut cluster = Cluster::new(scenario.seed, 3);
    cluster.apply(&Operation::CreateGroup { device: 0, members: 0b111 });
    let real_group = cluster.groups()[0];

    for input in scenario.envelopes.iter().take(32) {
        let sender = match input.sender {
            SenderChoice::Device(index) => {
                cluster.devices()[usize::from(index) % cluster.devices().len()].key
            },
            SenderChoice::Stranger(bytes) => PublicKey::from_x25519(bytes),
        };
        let group = match input.group {
            GroupChoice::Real => real_group,
            GroupChoice::Unknown(bytes) => GroupPublicKey::from_x25519(bytes),
        };
        let kind = UpdateKind::from_u8(input.kind).unwrap_or(UpdateKind::Update);

        let mut header = EnvelopeHeader::new(kind);
        header.set_sender(&sender);
        header.set_group_public_key(&group);
        header.set_sent_timestamp(SIM_EPOCH_MILLIS.saturating_add_signed(input.timestamp_offset.into()));
        let Ok(bytes) = Envelope::new(header, input.payload.clone()).to_bytes() else {
            continue;
        };

        for index in 0..cluster.devices().len() {
            cluster.deliver(index, &bytes);
        }
        cluster.settle();
        cluster.snapshot().expect("device state unreadable");
    }
});
