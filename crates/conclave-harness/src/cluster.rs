//! A cluster of simulated devices sharing one network.
//!
//! Operations are applied one at a time. After each one the cluster settles:
//! queued direct sends are retried, every packet is delivered to whoever
//! should receive it at that moment, and this repeats until nothing is left
//! in flight. Invariants are checked against the settled state.

use std::{collections::BTreeSet, fmt};

use arbitrary::{Arbitrary, Unstructured};
use conclave_core::{
    ControllerConfig, GroupError, JobRunner, dispatch::Destination, jobs::JobOutcome,
};
use conclave_proto::{GroupPublicKey, PublicKey};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    SimDevice, SimEnv,
    invariants::{InvariantRegistry, SystemSnapshot, Violation},
    network::SimNetwork,
    operation::{Operation, OperationOutcome},
};

/// Settle rounds before giving up on a cluster that never goes quiet.
pub const MAX_SETTLE_ROUNDS: usize = 256;

/// Bytes of entropy fed to [`Operation::arbitrary`] per generated operation.
const OPERATION_ENTROPY: usize = 32;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Operations the controller accepted
    pub applied: u64,
    /// Operations the controller refused
    pub rejected: u64,
    /// Operations with nothing to act on
    pub skipped: u64,
    /// Envelopes handed to a device
    pub delivered: u64,
    /// Queued direct sends that ran out of attempts
    pub abandoned: u64,
}

/// An invariant failed during [`Cluster::run`].
#[derive(Debug, Clone)]
pub struct SimulationFailure {
    /// Step at which the check failed
    pub step: usize,
    /// Operation applied at that step
    pub operation: Operation,
    /// Everything that failed
    pub violations: Vec<Violation>,
}

impl fmt::Display for SimulationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({:?}):", self.step, self.operation)?;
        for violation in &self.violations {
            write!(f, "\n  {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SimulationFailure {}

/// Devices, the network between them and the groups created so far.
pub struct Cluster {
    env: SimEnv,
    network: SimNetwork,
    devices: Vec<SimDevice>,
    groups: Vec<GroupPublicKey>,
    runner: JobRunner,
    operations: ChaCha20Rng,
    stats: ClusterStats,
}

impl Cluster {
    /// Cluster of `devices` devices with the default configuration.
    pub fn new(seed: u64, devices: usize) -> Self {
        Self::with_config(seed, devices, ControllerConfig::default())
    }

    /// Cluster of `devices` devices sharing `config`.
    ///
    /// Device identities and all protocol randomness come from `seed`; the
    /// operation generator uses its own stream derived from it, so replaying
    /// a recorded operation list reproduces a generated run.
    pub fn with_config(seed: u64, devices: usize, config: ControllerConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let network = SimNetwork::new();
        let runner = JobRunner::new(config.job_max_attempts);
        let devices = (0..devices.max(1))
            .map(|index| SimDevice::new(index, &env, &network, config.clone()))
            .collect();

        Self {
            env,
            network,
            devices,
            groups: Vec::new(),
            runner,
            operations: ChaCha20Rng::seed_from_u64(seed.rotate_left(32) ^ 0x5eed),
            stats: ClusterStats::default(),
        }
    }

    /// Devices in index order.
    pub fn devices(&self) -> &[SimDevice] {
        &self.devices
    }

    /// Groups created so far, in creation order.
    pub fn groups(&self) -> &[GroupPublicKey] {
        &self.groups
    }

    /// Shared network.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Counters so far.
    pub fn stats(&self) -> ClusterStats {
        self.stats
    }

    fn device_index(&self, device: u8) -> usize {
        usize::from(device) % self.devices.len()
    }

    fn key_of(&self, device: u8) -> PublicKey {
        self.devices[self.device_index(device)].key
    }

    fn group_at(&self, slot: u8) -> Option<GroupPublicKey> {
        if self.groups.is_empty() {
            return None;
        }
        Some(self.groups[usize::from(slot) % self.groups.len()])
    }

    /// Apply one operation and settle.
    pub fn apply(&mut self, operation: &Operation) -> OperationOutcome {
        let outcome = match self.execute(operation) {
            Some(Ok(())) => OperationOutcome::Applied,
            Some(Err(error)) => OperationOutcome::Rejected(error.to_string()),
            None => OperationOutcome::Skipped,
        };

        match &outcome {
            OperationOutcome::Applied => self.stats.applied += 1,
            OperationOutcome::Rejected(reason) => {
                tracing::debug!(?operation, %reason, "operation rejected");
                self.stats.rejected += 1;
            },
            OperationOutcome::Skipped => self.stats.skipped += 1,
        }

        self.settle();
        outcome
    }

    fn execute(&mut self, operation: &Operation) -> Option<Result<(), GroupError>> {
        match *operation {
            Operation::CreateGroup { device, members } => {
                let index = self.device_index(device);
                let members: BTreeSet<PublicKey> = self
                    .devices
                    .iter()
                    .filter(|d| d.index < 16 && members & (1 << d.index) != 0)
                    .map(|d| d.key)
                    .collect();

                let created = self.devices[index]
                    .controller
                    .create_group("group", &members)
                    .and_then(|id| id.decode().map_err(GroupError::from));
                Some(created.map(|group| self.groups.push(group)))
            },
            Operation::AddMember { device, group, member } => {
                let group = self.group_at(group)?;
                let added = [self.key_of(member)].into_iter().collect();
                let index = self.device_index(device);
                Some(self.devices[index].controller.add_members(&group, &added))
            },
            Operation::RemoveMember { device, group, member } => {
                let group = self.group_at(group)?;
                let removed = [self.key_of(member)].into_iter().collect();
                let index = self.device_index(device);
                Some(self.devices[index].controller.remove_members(&group, &removed))
            },
            Operation::Leave { device, group } => {
                let group = self.group_at(group)?;
                let index = self.device_index(device);
                Some(self.devices[index].controller.leave(&group))
            },
            Operation::ExplicitLeave { device, group } => {
                let group = self.group_at(group)?;
                let index = self.device_index(device);
                Some(self.devices[index].controller.explicit_leave(&group))
            },
            Operation::Rename { device, group, seed } => {
                let group = self.group_at(group)?;
                let index = self.device_index(device);
                Some(self.devices[index].controller.change_name(&group, &Operation::title(seed)))
            },
            Operation::Rotate { device, group } => {
                let group = self.group_at(group)?;
                let index = self.device_index(device);
                let controller = &mut self.devices[index].controller;
                let rotated = controller.group(&group).and_then(|record| {
                    let targets = record.map(|r| r.members).unwrap_or_default();
                    controller.generate_and_send_new_encryption_key_pair(&group, &targets)
                });
                Some(match rotated {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => Err(GroupError::invalid("not an admin of an active group")),
                    Err(error) => Err(error),
                })
            },
            Operation::SetOffline { device, offline } => {
                self.network.set_offline(self.key_of(device), offline);
                Some(Ok(()))
            },
            Operation::AdvanceClock { millis } => {
                self.env.advance(u64::from(millis));
                Some(Ok(()))
            },
        }
    }

    /// Retry queued sends and deliver packets until nothing is in flight.
    ///
    /// Returns the number of rounds it took.
    pub fn settle(&mut self) -> usize {
        for round in 0..MAX_SETTLE_ROUNDS {
            let mut jobs_pending = false;
            for device in &self.devices {
                for report in device.controller.run_pending_jobs(&self.runner) {
                    if matches!(report.outcome, JobOutcome::Abandoned { .. }) {
                        self.stats.abandoned += 1;
                    }
                }
                jobs_pending |= !device.jobs.is_empty();
            }

            if self.network.pending() == 0 && !jobs_pending {
                return round;
            }

            self.env.advance(1);
            while let Some(packet) = self.network.pop() {
                for device in &mut self.devices {
                    let receives = match packet.destination {
                        Destination::Group(group) => device.is_polling(&group),
                        Destination::Member(member) => member == device.key,
                    };
                    if receives {
                        device.controller.handle_envelope(&packet.bytes);
                        self.stats.delivered += 1;
                    }
                }
            }
        }

        tracing::warn!(rounds = MAX_SETTLE_ROUNDS, "cluster did not settle");
        MAX_SETTLE_ROUNDS
    }

    /// Hand raw bytes to one device as if the network had delivered them.
    ///
    /// Out-of-range indices are ignored.
    pub fn deliver(&mut self, device: usize, bytes: &[u8]) {
        if let Some(device) = self.devices.get_mut(device) {
            device.controller.handle_envelope(bytes);
            self.stats.delivered += 1;
        }
    }

    /// Snapshot of every device.
    ///
    /// # Errors
    ///
    /// If a device's stores cannot be read.
    pub fn snapshot(&self) -> Result<SystemSnapshot, GroupError> {
        let devices = self.devices.iter().map(SimDevice::snapshot).collect::<Result<_, _>>()?;
        Ok(SystemSnapshot::from_devices(devices))
    }

    /// Draw the next operation from the cluster's operation stream.
    pub fn random_operation(&mut self) -> Operation {
        let mut entropy = [0u8; OPERATION_ENTROPY];
        self.operations.fill_bytes(&mut entropy);
        Operation::arbitrary(&mut Unstructured::new(&entropy))
            .unwrap_or(Operation::AdvanceClock { millis: 1 })
    }

    /// Apply `operations` in order, checking `registry` after each one.
    ///
    /// # Errors
    ///
    /// The first step whose settled state violates an invariant.
    pub fn run_operations<'a>(
        &mut self,
        operations: impl IntoIterator<Item = &'a Operation>,
        registry: &InvariantRegistry,
    ) -> Result<ClusterStats, SimulationFailure> {
        for (step, operation) in operations.into_iter().enumerate() {
            let outcome = self.apply(operation);
            tracing::trace!(step, ?operation, ?outcome, "applied");
            self.check(step, operation, registry)?;
        }
        Ok(self.stats)
    }

    /// Generate and apply `steps` operations, checking `registry` after each.
    ///
    /// # Errors
    ///
    /// The first step whose settled state violates an invariant.
    pub fn run(
        &mut self,
        steps: usize,
        registry: &InvariantRegistry,
    ) -> Result<ClusterStats, SimulationFailure> {
        for step in 0..steps {
            let operation = self.random_operation();
            let outcome = self.apply(&operation);
            tracing::trace!(step, ?operation, ?outcome, "applied");
            self.check(step, &operation, registry)?;
        }

        tracing::info!(
            steps,
            groups = self.groups.len(),
            applied = self.stats.applied,
            rejected = self.stats.rejected,
            delivered = self.stats.delivered,
            "simulation finished"
        );
        Ok(self.stats)
    }

    fn check(
        &self,
        step: usize,
        operation: &Operation,
        registry: &InvariantRegistry,
    ) -> Result<(), SimulationFailure> {
        let failure = |violations| SimulationFailure {
            step,
            operation: operation.clone(),
            violations,
        };

        let snapshot = self.snapshot().map_err(|error| {
            failure(vec![Violation { invariant: "snapshot", message: error.to_string() }])
        })?;
        registry.check_all(&snapshot).map_err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reaches_every_selected_device() {
        let mut cluster = Cluster::new(1, 3);
        let outcome = cluster.apply(&Operation::CreateGroup { device: 0, members: 0b110 });

        assert_eq!(outcome, OperationOutcome::Applied);
        let group = cluster.groups()[0];
        for device in cluster.devices() {
            assert!(device.is_polling(&group));
        }
    }

    #[test]
    fn operations_without_groups_are_skipped() {
        let mut cluster = Cluster::new(2, 2);
        let outcome = cluster.apply(&Operation::Rename { device: 0, group: 0, seed: 1 });
        assert_eq!(outcome, OperationOutcome::Skipped);
        assert_eq!(cluster.stats().skipped, 1);
    }

    #[test]
    fn offline_creator_abandons_direct_sends() {
        let mut cluster = Cluster::new(3, 2);
        cluster.apply(&Operation::SetOffline { device: 0, offline: true });
        let outcome = cluster.apply(&Operation::CreateGroup { device: 0, members: 0b10 });

        assert_eq!(outcome, OperationOutcome::Applied);
        assert_eq!(cluster.stats().abandoned, 1);
        assert!(!cluster.devices()[1].is_polling(&cluster.groups()[0]));
        assert!(cluster.snapshot().is_ok());
    }

    #[test]
    fn generated_runs_hold_invariants() {
        let mut cluster = Cluster::new(4, 4);
        let registry = InvariantRegistry::standard();
        let stats = cluster.run(200, &registry).unwrap();
        assert!(stats.applied > 0);
    }
}
