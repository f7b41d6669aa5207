//! Deterministic simulation harness for Conclave closed groups.
//!
//! A [`Cluster`] runs one [`ClosedGroupController`](conclave_core::ClosedGroupController)
//! per device over a shared in-memory [`SimNetwork`], with a seeded
//! [`SimEnv`] supplying every random byte and every timestamp. Operations
//! are generated from the seed (or supplied explicitly), applied one at a
//! time, and the settled state is checked against an [`InvariantRegistry`].
//!
//! Same seed, same operations, same outcome: a failing run is reproduced by
//! rerunning its seed.

pub mod cluster;
pub mod device;
pub mod invariants;
pub mod network;
pub mod operation;
pub mod sim_env;

pub use cluster::{Cluster, ClusterStats, MAX_SETTLE_ROUNDS, SimulationFailure};
pub use device::SimDevice;
pub use invariants::{
    AdminsAreMembers, DeviceSnapshot, ForwardSecrecy, GroupSnapshot, Invariant, InvariantRegistry,
    InvariantResult, KeyConvergence, KeyFingerprint, MembershipConvergence,
    PollingMatchesParticipation, SystemSnapshot, Violation,
};
pub use network::{NetworkEndpoint, Packet, SimNetwork};
pub use operation::{DeviceId, GroupSlot, Operation, OperationOutcome};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv};
