//! Conclave closed-group state machine.
//!
//! A closed group is a fixed set of members sharing one X25519 encryption key
//! pair. Membership, titles and admin rights change through protocol updates;
//! whenever an admin sees someone removed, the key pair is rotated so the
//! removed member cannot read what follows.
//!
//! # Architecture
//!
//! The crate is Sans-IO. [`ClosedGroupController`] decides; injected
//! collaborators store, send, wrap and notify:
//!
//! ```text
//!                  ┌───────────────────────────┐
//!   local intent ─▶│                           │─▶ MessageDispatcher
//!                  │   ClosedGroupController   │─▶ JobQueue (deferred New)
//!   envelope ─────▶│  validator · rotation     │─▶ TimelineNotifier
//!                  │                           │─▶ PushRegistry
//!                  └─────────────┬─────────────┘
//!                                │
//!                     GroupStore · KeyStore
//! ```
//!
//! [`GroupWorker`] runs a controller on a tokio task so every operation is
//! serialized. [`Environment`] abstracts the clock and randomness for
//! deterministic simulation.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod encryption;
pub mod env;
pub mod error;
pub mod jobs;
pub mod push;
pub mod record;
pub mod rotation;
pub mod storage;
pub mod timeline;
pub mod validator;
pub mod worker;

pub use config::ControllerConfig;
pub use controller::{ClosedGroupController, Collaborators, LocalIdentity};
pub use dispatch::{MessageDispatcher, RecordingDispatcher};
pub use encryption::{PeerEncryption, X25519PeerEncryption};
pub use env::{Environment, SystemEnv};
pub use error::{DispatchError, GroupError, JobError, PushError};
pub use jobs::{JobEnvelopes, JobQueue, JobRunner, MemoryJobQueue, SendJob};
pub use push::{MemoryPushRegistry, PushRegistry};
pub use record::GroupRecord;
pub use rotation::{RotationPlan, should_rotate};
pub use storage::{GroupStore, KeyStore, MemoryStorage, StorageError};
pub use timeline::{InfoKind, MemoryTimeline, TimelineEntry, TimelineNotifier};
pub use validator::{UpdateValidator, ValidationResult};
pub use worker::{GroupWorker, WorkerCommand, WorkerError, WorkerHandle};
