//! Deferred direct sends.
//!
//! Secondary messages (the `New` each added member receives) must not hold up
//! or roll back the primary group change. They are queued as [`SendJob`]s and
//! delivered later by a [`JobRunner`], which retries a bounded number of times
//! and reports every outcome.
//!
//! A job names only the group and the recipient. The envelope is built from
//! the group's state at the moment of each attempt, so a retry never carries
//! a member list or key pair that has since been superseded.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use conclave_proto::{Envelope, GroupPublicKey, PublicKey};

use crate::{
    dispatch::MessageDispatcher,
    error::{GroupError, JobError},
};

/// A direct send waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendJob {
    /// Group whose state is sent
    pub group: GroupPublicKey,
    /// Member to deliver to
    pub recipient: PublicKey,
    /// Failed attempts so far
    pub attempts: u32,
}

impl SendJob {
    /// A job that has not been attempted yet.
    pub fn new(group: GroupPublicKey, recipient: PublicKey) -> Self {
        Self { group, recipient, attempts: 0 }
    }
}

/// Holds jobs between attempts.
///
/// # Invariants
///
/// - [`JobQueue::take_pending`] hands out each submitted job exactly once
/// - Jobs come out in submission order
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job.
    fn submit(&self, job: SendJob);

    /// Remove and return every pending job.
    fn take_pending(&self) -> Vec<SendJob>;

    /// Put back a job that failed and has attempts left.
    fn requeue(&self, job: SendJob) {
        self.submit(job);
    }
}

/// Builds a job's envelope at the moment it is attempted.
pub trait JobEnvelopes {
    /// Envelope for `job` from current state. `None` if the job no longer
    /// applies, for example because the recipient has left the group.
    fn envelope_for(&self, job: &SendJob) -> Result<Option<Envelope>, GroupError>;
}

/// FIFO job queue held in memory.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    inner: Arc<Mutex<VecDeque<SendJob>>>,
}

impl MemoryJobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, VecDeque<SendJob>> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl JobQueue for MemoryJobQueue {
    fn submit(&self, job: SendJob) {
        self.lock().push_back(job);
    }

    fn take_pending(&self) -> Vec<SendJob> {
        self.lock().drain(..).collect()
    }
}

/// What happened to one job during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Transport accepted the envelope
    Delivered,
    /// Nothing left to send, job dropped
    Obsolete,
    /// Attempt failed, job re-queued
    Retrying {
        /// Failed attempts so far
        attempts: u32,
    },
    /// Attempt failed for the last time, job dropped
    Abandoned {
        /// Total failed attempts
        attempts: u32,
        /// Last failure
        error: JobError,
    },
}

/// Outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Group the job was for
    pub group: GroupPublicKey,
    /// Member the job was for
    pub recipient: PublicKey,
    /// What happened
    pub outcome: JobOutcome,
}

/// Delivers queued jobs with bounded retries.
#[derive(Debug, Clone)]
pub struct JobRunner {
    max_attempts: u32,
}

impl JobRunner {
    /// Runner that gives up after `max_attempts` failures. Zero is treated as
    /// one.
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }

    /// Attempt every job currently pending in `queue` once.
    ///
    /// Each envelope is built by `envelopes` right before it is sent. Failed
    /// jobs are re-queued until they exhaust their attempts. Jobs submitted
    /// while running wait for the next run.
    pub fn run_pending(
        &self,
        queue: &dyn JobQueue,
        envelopes: &dyn JobEnvelopes,
        dispatcher: &dyn MessageDispatcher,
    ) -> Vec<JobReport> {
        let pending = queue.take_pending();
        let mut reports = Vec::with_capacity(pending.len());

        for mut job in pending {
            let (group, recipient) = (job.group, job.recipient);

            let attempt = match envelopes.envelope_for(&job) {
                Ok(Some(envelope)) => {
                    dispatcher.send_to_member(&recipient, &envelope).map(|()| true).map_err(JobError::from)
                },
                Ok(None) => Ok(false),
                Err(error) => Err(JobError::Build(error.to_string())),
            };

            let outcome = match attempt {
                Ok(true) => {
                    tracing::debug!(%group, ?recipient, "queued send delivered");
                    JobOutcome::Delivered
                },
                Ok(false) => {
                    tracing::debug!(%group, ?recipient, "queued send no longer applies, dropped");
                    JobOutcome::Obsolete
                },
                Err(error) => {
                    job.attempts += 1;
                    let attempts = job.attempts;
                    if attempts >= self.max_attempts {
                        tracing::warn!(%group, ?recipient, attempts, %error, "queued send abandoned");
                        JobOutcome::Abandoned { attempts, error }
                    } else {
                        tracing::debug!(%group, ?recipient, attempts, %error, "queued send failed, will retry");
                        queue.requeue(job);
                        JobOutcome::Retrying { attempts }
                    }
                },
            };

            reports.push(JobReport { group, recipient, outcome });
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use conclave_proto::{ClosedGroupUpdate, EnvelopeHeader, UpdateKind};

    use super::*;
    use crate::{dispatch::RecordingDispatcher, error::DispatchError};

    /// Builds a `MemberLeft` until told the job no longer applies.
    struct Envelopes {
        applies: Cell<bool>,
        built: Cell<usize>,
    }

    impl Envelopes {
        fn new() -> Self {
            Self { applies: Cell::new(true), built: Cell::new(0) }
        }
    }

    impl JobEnvelopes for Envelopes {
        fn envelope_for(&self, _job: &SendJob) -> Result<Option<Envelope>, GroupError> {
            if !self.applies.get() {
                return Ok(None);
            }
            self.built.set(self.built.get() + 1);
            let header = EnvelopeHeader::new(UpdateKind::MemberLeft);
            Ok(Some(ClosedGroupUpdate::MemberLeft.into_envelope(header)?))
        }
    }

    struct Broken;

    impl JobEnvelopes for Broken {
        fn envelope_for(&self, _job: &SendJob) -> Result<Option<Envelope>, GroupError> {
            Err(GroupError::invalid("record unreadable"))
        }
    }

    fn job() -> SendJob {
        SendJob::new(GroupPublicKey::from_x25519([9; 32]), PublicKey::from_x25519([4; 32]))
    }

    #[test]
    fn delivers_pending_jobs() {
        let queue = MemoryJobQueue::new();
        let dispatcher = RecordingDispatcher::new();
        queue.submit(job());

        let reports = JobRunner::new(3).run_pending(&queue, &Envelopes::new(), &dispatcher);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, JobOutcome::Delivered);
        assert_eq!(reports[0].recipient, job().recipient);
        assert!(queue.is_empty());
        assert_eq!(dispatcher.sent().len(), 1);
    }

    #[test]
    fn retries_then_abandons() {
        let queue = MemoryJobQueue::new();
        let dispatcher = RecordingDispatcher::new();
        dispatcher.fail_member_sends(true);
        queue.submit(job());

        let runner = JobRunner::new(2);
        let envelopes = Envelopes::new();
        let first = runner.run_pending(&queue, &envelopes, &dispatcher);
        assert_eq!(first[0].outcome, JobOutcome::Retrying { attempts: 1 });
        assert_eq!(queue.len(), 1);

        let second = runner.run_pending(&queue, &envelopes, &dispatcher);
        assert!(matches!(
            second[0].outcome,
            JobOutcome::Abandoned { attempts: 2, error: JobError::Dispatch(DispatchError::Unreachable(_)) }
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn envelope_is_rebuilt_on_every_attempt() {
        let queue = MemoryJobQueue::new();
        let dispatcher = RecordingDispatcher::new();
        dispatcher.fail_member_sends(true);
        queue.submit(job());

        let runner = JobRunner::new(3);
        let envelopes = Envelopes::new();
        runner.run_pending(&queue, &envelopes, &dispatcher);

        dispatcher.fail_member_sends(false);
        let reports = runner.run_pending(&queue, &envelopes, &dispatcher);
        assert_eq!(reports[0].outcome, JobOutcome::Delivered);
        assert_eq!(envelopes.built.get(), 2);
    }

    #[test]
    fn jobs_that_no_longer_apply_are_dropped() {
        let queue = MemoryJobQueue::new();
        let dispatcher = RecordingDispatcher::new();
        dispatcher.fail_member_sends(true);
        queue.submit(job());

        let runner = JobRunner::new(3);
        let envelopes = Envelopes::new();
        runner.run_pending(&queue, &envelopes, &dispatcher);

        envelopes.applies.set(false);
        let reports = runner.run_pending(&queue, &envelopes, &dispatcher);
        assert_eq!(reports[0].outcome, JobOutcome::Obsolete);
        assert!(queue.is_empty());
        assert!(dispatcher.sent().is_empty());
    }

    #[test]
    fn build_failures_count_as_attempts() {
        let queue = MemoryJobQueue::new();
        let dispatcher = RecordingDispatcher::new();
        queue.submit(job());

        let reports = JobRunner::new(1).run_pending(&queue, &Broken, &dispatcher);
        assert!(matches!(
            reports[0].outcome,
            JobOutcome::Abandoned { attempts: 1, error: JobError::Build(_) }
        ));
        assert!(dispatcher.sent().is_empty());
    }
}
