//! Invariants over a settled cluster.
//!
//! A [`Cluster`](crate::Cluster) is reduced to a [`SystemSnapshot`] after every
//! operation and handed to each registered [`Invariant`]. The checks describe
//! what must hold no matter which operations ran or which devices were
//! offline, so they pair naturally with generated operation sequences.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! cluster.apply(&op);
//! registry.check_all(&cluster.snapshot())?;
//! ```

mod checks;
mod snapshot;

pub use checks::{
    AdminsAreMembers, ForwardSecrecy, KeyConvergence, MembershipConvergence,
    PollingMatchesParticipation,
};
pub use snapshot::{DeviceSnapshot, GroupSnapshot, KeyFingerprint, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// What was observed
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Property of a settled cluster.
pub trait Invariant: Send + Sync {
    /// Name used in violations.
    fn name(&self) -> &'static str;

    /// Check the property against `state`.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Set of invariants checked together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every closed-group invariant:
    ///
    /// - [`MembershipConvergence`]
    /// - [`KeyConvergence`]
    /// - [`ForwardSecrecy`]
    /// - [`AdminsAreMembers`]
    /// - [`PollingMatchesParticipation`]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(MembershipConvergence);
        registry.add(KeyConvergence);
        registry.add(ForwardSecrecy);
        registry.add(AdminsAreMembers);
        registry.add(PollingMatchesParticipation);
        registry
    }

    /// Register an invariant.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Run every invariant, collecting all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Run every invariant and panic with all violations if any fail.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
