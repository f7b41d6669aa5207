//! Fuzz target for closed group operation sequences
//!
//! Applies fuzzer-chosen operations to a five-device cluster and checks the
//! standard invariants after each settled step. Complements the proptest
//! runs with coverage-guided exploration of rare interleavings: admins going
//! offline mid-rotation, members re-added after removal, renames racing
//! departures.
//!
//! # Invariants
//!
//! - Members of a group agree on title, members and admins
//! - Members share the current group key
//! - Former members never hold the current key
//! - Admins are members; participation implies polling

#![no_main]

use arbitrary::Arbitrary;
use conclave_harness::{Cluster, InvariantRegistry, Operation};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    operations: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let registry = InvariantRegistry::standard();
    let mut cluster = Cluster::new(scenario.seed, 5);

    let operations = scenario.operations.iter().take(64);
    if let Err(failure) = cluster.run_operations(operations, &registry) {
        panic!("{failure}");
    }
});
