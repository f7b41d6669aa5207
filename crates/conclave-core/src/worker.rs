//! Serialized background worker.
//!
//! [`GroupWorker`] owns a [`ClosedGroupController`] inside a tokio task and
//! applies [`WorkerCommand`]s strictly one at a time, in arrival order. Local
//! intents and received envelopes share the one queue, so no two operations
//! ever interleave on a group's record.
//!
//! ```text
//! WorkerHandle ──mpsc──▶ GroupWorker task ──▶ ClosedGroupController
//!      ▲                        │
//!      └────────oneshot─────────┘
//! ```

use std::collections::BTreeSet;

use conclave_crypto::EncryptionKeyPair;
use conclave_proto::{GroupId, GroupPublicKey, PublicKey};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{controller::ClosedGroupController, env::Environment, error::GroupError};

/// Commands waiting in the worker queue before backpressure applies.
pub const COMMAND_QUEUE_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, GroupError>>;

/// Errors from [`WorkerHandle`] calls.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker task has exited
    #[error("group worker stopped")]
    Stopped,

    /// The operation itself failed
    #[error(transparent)]
    Group(#[from] GroupError),
}

/// One unit of work for the worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// [`ClosedGroupController::create_group`]
    CreateGroup {
        /// Group title
        name: String,
        /// Initial members
        members: BTreeSet<PublicKey>,
        /// Result channel
        reply: Reply<GroupId>,
    },
    /// [`ClosedGroupController::leave`]
    Leave {
        /// Group to leave
        group: GroupPublicKey,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::explicit_leave`]
    ExplicitLeave {
        /// Group to leave
        group: GroupPublicKey,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::update`]
    Update {
        /// Group to update
        group: GroupPublicKey,
        /// Complete member list after the update
        members: BTreeSet<PublicKey>,
        /// Title after the update
        name: String,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::add_members`]
    AddMembers {
        /// Group to add to
        group: GroupPublicKey,
        /// Members to add
        members: BTreeSet<PublicKey>,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::remove_members`]
    RemoveMembers {
        /// Group to remove from
        group: GroupPublicKey,
        /// Members to remove
        members: BTreeSet<PublicKey>,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::change_name`]
    ChangeName {
        /// Group to rename
        group: GroupPublicKey,
        /// New title
        name: String,
        /// Result channel
        reply: Reply<()>,
    },
    /// [`ClosedGroupController::generate_and_send_new_encryption_key_pair`]
    RotateKeyPair {
        /// Group to rotate
        group: GroupPublicKey,
        /// Recipients of the new pair
        targets: BTreeSet<PublicKey>,
        /// Result channel
        reply: Reply<Option<EncryptionKeyPair>>,
    },
    /// [`ClosedGroupController::handle_envelope`]
    Deliver {
        /// Raw envelope bytes
        bytes: Vec<u8>,
        /// Signalled once the envelope has been processed
        done: oneshot::Sender<()>,
    },
}

/// Owns a controller and drains its command queue.
pub struct GroupWorker<E: Environment> {
    controller: ClosedGroupController<E>,
    commands: mpsc::Receiver<WorkerCommand>,
}

impl<E: Environment> GroupWorker<E> {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The task runs until every [`WorkerHandle`] is dropped.
    pub fn spawn(controller: ClosedGroupController<E>) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = Self { controller, commands: rx };
        let task = tokio::spawn(worker.run());
        (WorkerHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        tracing::debug!("group worker stopped, all handles dropped");
    }

    fn apply(&mut self, command: WorkerCommand) {
        let c = &mut self.controller;
        // A dropped receiver means the caller stopped waiting; the work is
        // done either way.
        match command {
            WorkerCommand::CreateGroup { name, members, reply } => {
                let _ = reply.send(c.create_group(&name, &members));
            },
            WorkerCommand::Leave { group, reply } => {
                let _ = reply.send(c.leave(&group));
            },
            WorkerCommand::ExplicitLeave { group, reply } => {
                let _ = reply.send(c.explicit_leave(&group));
            },
            WorkerCommand::Update { group, members, name, reply } => {
                let _ = reply.send(c.update(&group, &members, &name));
            },
            WorkerCommand::AddMembers { group, members, reply } => {
                let _ = reply.send(c.add_members(&group, &members));
            },
            WorkerCommand::RemoveMembers { group, members, reply } => {
                let _ = reply.send(c.remove_members(&group, &members));
            },
            WorkerCommand::ChangeName { group, name, reply } => {
                let _ = reply.send(c.change_name(&group, &name));
            },
            WorkerCommand::RotateKeyPair { group, targets, reply } => {
                let _ = reply.send(c.generate_and_send_new_encryption_key_pair(&group, &targets));
            },
            WorkerCommand::Deliver { bytes, done } => {
                c.handle_envelope(&bytes);
                let _ = done.send(());
            },
        }
    }
}

/// Cloneable async front end to a [`GroupWorker`].
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).await.map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)?.map_err(WorkerError::from)
    }

    /// See [`ClosedGroupController::create_group`].
    pub async fn create_group(
        &self,
        name: impl Into<String>,
        members: BTreeSet<PublicKey>,
    ) -> Result<GroupId, WorkerError> {
        let name = name.into();
        self.request(|reply| WorkerCommand::CreateGroup { name, members, reply }).await
    }

    /// See [`ClosedGroupController::leave`].
    pub async fn leave(&self, group: GroupPublicKey) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::Leave { group, reply }).await
    }

    /// See [`ClosedGroupController::explicit_leave`].
    pub async fn explicit_leave(&self, group: GroupPublicKey) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::ExplicitLeave { group, reply }).await
    }

    /// See [`ClosedGroupController::update`].
    pub async fn update(
        &self,
        group: GroupPublicKey,
        members: BTreeSet<PublicKey>,
        name: impl Into<String>,
    ) -> Result<(), WorkerError> {
        let name = name.into();
        self.request(|reply| WorkerCommand::Update { group, members, name, reply }).await
    }

    /// See [`ClosedGroupController::add_members`].
    pub async fn add_members(
        &self,
        group: GroupPublicKey,
        members: BTreeSet<PublicKey>,
    ) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::AddMembers { group, members, reply }).await
    }

    /// See [`ClosedGroupController::remove_members`].
    pub async fn remove_members(
        &self,
        group: GroupPublicKey,
        members: BTreeSet<PublicKey>,
    ) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::RemoveMembers { group, members, reply }).await
    }

    /// See [`ClosedGroupController::change_name`].
    pub async fn change_name(
        &self,
        group: GroupPublicKey,
        name: impl Into<String>,
    ) -> Result<(), WorkerError> {
        let name = name.into();
        self.request(|reply| WorkerCommand::ChangeName { group, name, reply }).await
    }

    /// See [`ClosedGroupController::generate_and_send_new_encryption_key_pair`].
    pub async fn rotate_key_pair(
        &self,
        group: GroupPublicKey,
        targets: BTreeSet<PublicKey>,
    ) -> Result<Option<EncryptionKeyPair>, WorkerError> {
        self.request(|reply| WorkerCommand::RotateKeyPair { group, targets, reply }).await
    }

    /// Queue a received envelope and wait until it has been processed.
    pub async fn deliver(&self, bytes: Vec<u8>) -> Result<(), WorkerError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::Deliver { bytes, done })
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use conclave_proto::UpdateKind;

    use super::*;
    use crate::{
        controller::test_support::{fixture, members},
        storage::GroupStore,
    };

    #[tokio::test]
    async fn commands_run_in_order() {
        let f = fixture(1);
        let storage = f.storage.clone();
        let dispatcher = f.dispatcher.clone();
        let (handle, task) = GroupWorker::spawn(f.controller);

        let id = handle.create_group("friends", members(&[2, 3])).await.unwrap();
        let group = id.decode().unwrap();
        handle.change_name(group, "renamed").await.unwrap();
        handle.remove_members(group, members(&[3])).await.unwrap();

        let record = storage.group(&id).unwrap().unwrap();
        assert_eq!(record.title, "renamed");
        assert_eq!(record.members, members(&[1, 2]));

        let kinds: Vec<_> = dispatcher.sent().iter().filter_map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![
            UpdateKind::New,
            UpdateKind::New,
            UpdateKind::NameChange,
            UpdateKind::MembersRemoved,
            UpdateKind::EncryptionKeyPair,
        ]);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn errors_come_back_through_the_handle() {
        let f = fixture(1);
        let (handle, _task) = GroupWorker::spawn(f.controller);

        let result = handle.leave(GroupPublicKey::from_x25519([3; 32])).await;
        assert!(matches!(result, Err(WorkerError::Group(GroupError::NoThread { .. }))));

        handle.deliver(b"garbage".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn stopped_worker_reports_stopped() {
        let f = fixture(1);
        let (handle, task) = GroupWorker::spawn(f.controller);
        task.abort();
        let _ = task.await;

        let result = handle.explicit_leave(GroupPublicKey::from_x25519([3; 32])).await;
        assert!(matches!(result, Err(WorkerError::Stopped)));
    }
}
