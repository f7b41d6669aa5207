//! Conversation info messages.
//!
//! Every state transition the user should see ("Alice added Bob", "Carol
//! left") is reported to a [`TimelineNotifier`]. Incoming entries are
//! attributed to the sender; outgoing ones are written into the local thread.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use conclave_proto::{GroupId, PublicKey};

/// Local conversation thread handle.
pub type ThreadId = u64;

/// What an info message announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    /// Group created, renamed or membership changed
    Update,
    /// Someone (possibly the user) left, or the group was disbanded
    Quit,
}

/// Snapshot of a group change for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Group the entry belongs to
    pub group: GroupId,
    /// Kind of info message
    pub kind: InfoKind,
    /// Group title after the change
    pub name: String,
    /// Members after the change
    pub members: BTreeSet<PublicKey>,
    /// Admins after the change
    pub admins: BTreeSet<PublicKey>,
    /// Who caused the change. `None` for local actions
    pub sender: Option<PublicKey>,
    /// When the change was made (unix millis)
    pub sent_timestamp: u64,
}

/// Sink for conversation info messages.
pub trait TimelineNotifier: Send + Sync {
    /// Thread for a group, created on first use.
    fn thread_for(&self, group: &GroupId) -> ThreadId;

    /// Record a change made by a peer.
    fn record_incoming(&self, entry: TimelineEntry);

    /// Record a change made locally.
    fn record_outgoing(&self, thread: ThreadId, entry: TimelineEntry);
}

/// Whether an entry came from a peer or the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caused by a peer
    Incoming,
    /// Caused locally
    Outgoing,
}

/// An entry as captured by [`MemoryTimeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEntry {
    /// Incoming or outgoing
    pub direction: Direction,
    /// Thread the entry was written to, for outgoing entries
    pub thread: Option<ThreadId>,
    /// The entry itself
    pub entry: TimelineEntry,
}

/// Timeline that keeps entries in memory, for tests and simulation.
#[derive(Clone, Default)]
pub struct MemoryTimeline {
    inner: Arc<Mutex<TimelineInner>>,
}

#[derive(Default)]
struct TimelineInner {
    threads: HashMap<GroupId, ThreadId>,
    entries: Vec<RecordedEntry>,
}

impl MemoryTimeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, TimelineInner> {
        self.inner.lock().expect("Mutex poisoned")
    }

    /// All entries in recording order.
    pub fn entries(&self) -> Vec<RecordedEntry> {
        self.lock().entries.clone()
    }

    /// Entries for one group, in recording order.
    pub fn entries_for(&self, group: &GroupId) -> Vec<RecordedEntry> {
        self.lock().entries.iter().filter(|e| &e.entry.group == group).cloned().collect()
    }

    /// Most recent entry for a group.
    pub fn last_for(&self, group: &GroupId) -> Option<RecordedEntry> {
        self.lock().entries.iter().rev().find(|e| &e.entry.group == group).cloned()
    }
}

impl TimelineNotifier for MemoryTimeline {
    fn thread_for(&self, group: &GroupId) -> ThreadId {
        let mut inner = self.lock();
        let next = inner.threads.len() as ThreadId + 1;
        *inner.threads.entry(group.clone()).or_insert(next)
    }

    fn record_incoming(&self, entry: TimelineEntry) {
        self.lock().entries.push(RecordedEntry {
            direction: Direction::Incoming,
            thread: None,
            entry,
        });
    }

    fn record_outgoing(&self, thread: ThreadId, entry: TimelineEntry) {
        self.lock().entries.push(RecordedEntry {
            direction: Direction::Outgoing,
            thread: Some(thread),
            entry,
        });
    }
}
