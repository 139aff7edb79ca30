use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{DraftUser, UserId, UserRecord},
    error::ClientError,
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use crate::{
    api::DirectoryApi,
    cache::{ListedUser, QueryCache},
    keys::UserKeys,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationVariables {
    Create(DraftUser),
    Update(UserRecord),
    Delete(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutput {
    Created(UserRecord),
    Updated(UserRecord),
    Deleted(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Error,
    Success,
}

/// Observable state of one mutation kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutationStatus {
    pub state: MutationState,
    pub error: Option<ClientError>,
    pub last_variables: Option<MutationVariables>,
    pub data: Option<MutationOutput>,
}

impl MutationStatus {
    pub fn is_idle(&self) -> bool {
        self.state == MutationState::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.state == MutationState::Pending
    }

    pub fn is_error(&self) -> bool {
        self.state == MutationState::Error
    }

    pub fn is_success(&self) -> bool {
        self.state == MutationState::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("a {0} mutation is already pending")]
    AlreadyPending(MutationKind),
    #[error("cannot update a user without a server-assigned id")]
    MissingId,
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    MutationChanged {
        kind: MutationKind,
        status: MutationStatus,
    },
}

#[derive(Default)]
struct MutationBook {
    statuses: HashMap<MutationKind, MutationStatus>,
    id_locks: HashMap<UserId, Arc<AsyncMutex<()>>>,
    sequence: u64,
    // Sequence number at which a delete of the id succeeded.
    deleted_at: HashMap<UserId, u64>,
}

/// Runs create/update/delete against the backend and patches the cache after each success.
pub struct UserMutations {
    api: Arc<dyn DirectoryApi>,
    cache: Arc<QueryCache>,
    book: Mutex<MutationBook>,
    events: broadcast::Sender<DirectoryEvent>,
}

/// Marks a mutation kind pending; resets it to idle if dropped before settling.
struct PendingSlot<'a> {
    mutations: &'a UserMutations,
    kind: MutationKind,
    started_at: u64,
    settled: bool,
}

impl PendingSlot<'_> {
    fn succeed(mut self, output: MutationOutput) {
        self.settled = true;
        self.mutations.settle(self.kind, MutationState::Success, None, Some(output));
    }

    fn fail(mut self, err: ClientError) {
        self.settled = true;
        self.mutations.settle(self.kind, MutationState::Error, Some(err), None);
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.mutations.settle(self.kind, MutationState::Idle, None, None);
        }
    }
}

impl UserMutations {
    pub fn new(api: Arc<dyn DirectoryApi>, cache: Arc<QueryCache>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            api,
            cache,
            book: Mutex::new(MutationBook::default()),
            events,
        }
    }

    fn book(&self) -> MutexGuard<'_, MutationBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    pub fn status(&self, kind: MutationKind) -> MutationStatus {
        self.book().statuses.get(&kind).cloned().unwrap_or_default()
    }

    /// Clears a settled status back to idle. Pending mutations are left alone.
    pub fn reset(&self, kind: MutationKind) {
        if self.status(kind).is_pending() {
            return;
        }
        self.settle(kind, MutationState::Idle, None, None);
    }

    fn begin(
        &self,
        kind: MutationKind,
        variables: MutationVariables,
    ) -> Result<PendingSlot<'_>, MutationError> {
        let (status, started_at) = {
            let mut book = self.book();
            let status = book.statuses.entry(kind).or_default();
            if status.is_pending() {
                return Err(MutationError::AlreadyPending(kind));
            }
            *status = MutationStatus {
                state: MutationState::Pending,
                error: None,
                last_variables: Some(variables),
                data: None,
            };
            let status = status.clone();
            book.sequence += 1;
            (status, book.sequence)
        };
        let _ = self.events.send(DirectoryEvent::MutationChanged { kind, status });
        Ok(PendingSlot {
            mutations: self,
            kind,
            started_at,
            settled: false,
        })
    }

    fn settle(
        &self,
        kind: MutationKind,
        state: MutationState,
        error: Option<ClientError>,
        data: Option<MutationOutput>,
    ) {
        let status = {
            let mut book = self.book();
            let status = book.statuses.entry(kind).or_default();
            status.state = state;
            status.error = error;
            status.data = data;
            if state == MutationState::Idle {
                status.last_variables = None;
            }
            status.clone()
        };
        let _ = self.events.send(DirectoryEvent::MutationChanged { kind, status });
    }

    /// Runs `op` while holding the per-id lock, so update and delete of one id never overlap.
    async fn serialized<F, Fut, R>(&self, id: UserId, op: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let lock = {
            let mut book = self.book();
            Arc::clone(book.id_locks.entry(id).or_default())
        };
        let result = {
            let _serial = Arc::clone(&lock).lock_owned().await;
            op().await
        };

        let mut book = self.book();
        // Only the map and our handle remain: nobody else is queued on this id.
        if Arc::strong_count(&lock) <= 2 {
            book.id_locks.remove(&id);
            book.deleted_at.remove(&id);
        }
        result
    }

    pub async fn create_user(&self, draft: DraftUser) -> Result<UserRecord, MutationError> {
        let slot = self.begin(MutationKind::Create, MutationVariables::Create(draft.clone()))?;

        match self.api.create(&draft).await {
            Ok(created) => {
                self.apply_create(&created);
                info!(user_id = %created.id, "user created");
                slot.succeed(MutationOutput::Created(created.clone()));
                Ok(created)
            }
            Err(err) => {
                error!(error = %err, "error creating user");
                slot.fail(err.clone());
                Err(err.into())
            }
        }
    }

    pub async fn update_user(&self, record: UserRecord) -> Result<UserRecord, MutationError> {
        if !record.id.is_bound() {
            return Err(MutationError::MissingId);
        }
        let id = record.id;
        let slot = self.begin(MutationKind::Update, MutationVariables::Update(record.clone()))?;

        let result = self
            .serialized(id, || async {
                let updated = self.api.update(&record).await?;
                self.apply_update(id, &updated, slot.started_at);
                Ok::<_, ClientError>(updated)
            })
            .await;

        match result {
            Ok(updated) => {
                info!(user_id = %id, "user updated");
                slot.succeed(MutationOutput::Updated(updated.clone()));
                Ok(updated)
            }
            Err(err) => {
                error!(user_id = %id, error = %err, "error updating user");
                slot.fail(err.clone());
                Err(err.into())
            }
        }
    }

    pub async fn delete_user(&self, id: UserId) -> Result<(), MutationError> {
        let slot = self.begin(MutationKind::Delete, MutationVariables::Delete(id))?;

        let result = self
            .serialized(id, || async {
                self.api.delete(id).await?;
                self.apply_delete(id);
                Ok::<_, ClientError>(())
            })
            .await;

        match result {
            Ok(()) => {
                info!(user_id = %id, "user deleted");
                slot.succeed(MutationOutput::Deleted(id));
                Ok(())
            }
            Err(err) => {
                error!(user_id = %id, error = %err, "error deleting user");
                slot.fail(err.clone());
                Err(err.into())
            }
        }
    }

    fn apply_create(&self, created: &UserRecord) {
        let lists = UserKeys::lists();
        self.cache.update::<Vec<ListedUser>, _>(&lists, |mut users| {
            users.push(ListedUser::pending(created.clone()));
            users
        });
        self.cache.invalidate(&lists);
    }

    fn apply_update(&self, id: UserId, updated: &UserRecord, started_at: u64) {
        let deleted_since_start = self
            .book()
            .deleted_at
            .get(&id)
            .is_some_and(|deleted_at| *deleted_at > started_at);
        if deleted_since_start {
            warn!(user_id = %id, "user was deleted while the update was in flight; skipping cache write");
            return;
        }

        let detail = UserKeys::detail(id);
        let lists = UserKeys::lists();
        self.cache.write(detail.clone(), updated.clone());
        self.cache.update::<Vec<ListedUser>, _>(&lists, |users| {
            users
                .into_iter()
                .map(|user| {
                    if user.record.id == id {
                        ListedUser {
                            record: updated.clone(),
                            origin: user.origin,
                        }
                    } else {
                        user
                    }
                })
                .collect()
        });
        self.cache.invalidate(&detail);
        self.cache.invalidate(&lists);
    }

    fn apply_delete(&self, id: UserId) {
        {
            let mut book = self.book();
            book.sequence += 1;
            let sequence = book.sequence;
            book.deleted_at.insert(id, sequence);
        }

        let lists = UserKeys::lists();
        self.cache.update::<Vec<ListedUser>, _>(&lists, |users| {
            users.into_iter().filter(|user| user.record.id != id).collect()
        });
        self.cache.remove(&UserKeys::detail(id));
        self.cache.invalidate(&lists);
    }
}

#[cfg(test)]
#[path = "tests/mutations_tests.rs"]
mod tests;
