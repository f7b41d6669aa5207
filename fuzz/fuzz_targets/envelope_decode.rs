//! Fuzz target for envelope and payload decoding
//!
//! Arbitrary bytes are decoded as an envelope and, when that succeeds, as a
//! closed group update. Finds:
//! - Panics in header parsing or payload size arithmetic
//! - CBOR payloads that crash the decoder
//! - Updates that decode but fail to re-encode
//!
//! Decoding must never panic. Invalid input returns an error.

#![no_main]

use conclave_proto::{ClosedGroupUpdate, Envelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };
    let Ok(update) = ClosedGroupUpdate::from_envelope(&envelope) else {
        return;
    };

    // Anything that decodes must encode again under the same header.
    let kind = update.kind();
    let reencoded = update
        .into_envelope(envelope.header)
        .expect("decoded update failed to re-encode");
    assert_eq!(reencoded.header.kind(), Some(kind));
});
