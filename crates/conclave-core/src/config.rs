//! Controller configuration.

/// Default maximum number of members in a closed group.
pub const DEFAULT_GROUP_SIZE_LIMIT: usize = 100;

/// Default number of delivery attempts for a queued send.
pub const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;

/// Closed group controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum members per group, the local user included
    pub group_size_limit: usize,
    /// Attempts before a queued send is abandoned
    pub job_max_attempts: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            group_size_limit: DEFAULT_GROUP_SIZE_LIMIT,
            job_max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
        }
    }
}
