use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Company, DraftUser, UserId, UserRecord},
    error::{ClientError, Operation},
};

use crate::{api::DirectoryApi, DirectoryClient, QueryCache};

pub(crate) fn sample_user(id: i64) -> UserRecord {
    UserRecord {
        id: UserId(id),
        name: format!("User {id}"),
        email: format!("user{id}@example.com"),
        phone: format!("555-000{id}"),
        website: format!("user{id}.example.com"),
        company: Company {
            name: format!("Company {id}"),
        },
    }
}

pub(crate) fn sample_draft(name: &str) -> DraftUser {
    DraftUser {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_ascii_lowercase()),
        phone: "555-1234".into(),
        website: "example.com".into(),
        company: Company {
            name: "Acme".into(),
        },
    }
}

#[derive(Default)]
struct FakeState {
    users: Vec<UserRecord>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, u16>,
}

/// In-memory backend that counts calls and can be told to fail.
#[derive(Default)]
pub(crate) struct FakeDirectory {
    state: Mutex<FakeState>,
    delay: Mutex<Option<Duration>>,
}

impl FakeDirectory {
    pub(crate) fn with_users(count: i64) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().expect("state").users = (1..=count).map(sample_user).collect();
        Arc::new(fake)
    }

    pub(crate) fn fail(&self, op: &'static str, status: u16) {
        self.state.lock().expect("state").failures.insert(op, status);
    }

    pub(crate) fn recover(&self, op: &'static str) {
        self.state.lock().expect("state").failures.remove(op);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay") = Some(delay);
    }

    pub(crate) fn calls(&self, op: &'static str) -> usize {
        self.state
            .lock()
            .expect("state")
            .calls
            .get(op)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn replace_user(&self, record: UserRecord) {
        let mut state = self.state.lock().expect("state");
        if let Some(user) = state.users.iter_mut().find(|user| user.id == record.id) {
            *user = record;
        }
    }

    async fn enter(&self, op: &'static str, operation: Operation) -> Result<(), ClientError> {
        let delay = *self.delay.lock().expect("delay");
        let failure = {
            let mut state = self.state.lock().expect("state");
            *state.calls.entry(op).or_default() += 1;
            state.failures.get(op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(status) => Err(ClientError::Remote { operation, status }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn list(&self) -> Result<Vec<UserRecord>, ClientError> {
        self.enter("list", Operation::List).await?;
        Ok(self.state.lock().expect("state").users.clone())
    }

    async fn get(&self, id: UserId) -> Result<UserRecord, ClientError> {
        self.enter("get", Operation::Get(id)).await?;
        self.state
            .lock()
            .expect("state")
            .users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or(ClientError::Remote {
                operation: Operation::Get(id),
                status: 404,
            })
    }

    async fn create(&self, draft: &DraftUser) -> Result<UserRecord, ClientError> {
        self.enter("create", Operation::Create).await?;
        let mut state = self.state.lock().expect("state");
        let next_id = state.users.iter().map(|user| user.id.0).max().unwrap_or(0) + 1;
        let record = UserRecord::from_draft(UserId(next_id), draft.clone());
        state.users.push(record.clone());
        Ok(record)
    }

    async fn update(&self, record: &UserRecord) -> Result<UserRecord, ClientError> {
        self.enter("update", Operation::Update(record.id)).await?;
        self.replace_user(record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, id: UserId) -> Result<(), ClientError> {
        self.enter("delete", Operation::Delete(id)).await?;
        self.state
            .lock()
            .expect("state")
            .users
            .retain(|user| user.id != id);
        Ok(())
    }
}

pub(crate) fn client_over(fake: &Arc<FakeDirectory>) -> DirectoryClient {
    DirectoryClient::new(
        Arc::clone(fake) as Arc<dyn DirectoryApi>,
        Arc::new(QueryCache::new()),
    )
}
