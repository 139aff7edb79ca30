//! Keyed query cache with lazy expiry and per-key load de-duplication.
//!
//! Values are stored as [`QueryData`] and exposed through [`CachedValue`] so
//! list and detail queries can share one keyspace for prefix invalidation.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use shared::{
    domain::{UserId, UserRecord},
    error::ClientError,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::keys::QueryKey;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Where a listed record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOrigin {
    Server,
    /// Appended locally after a create; replaced by the next authoritative list.
    Pending { token: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedUser {
    pub record: UserRecord,
    pub origin: EntryOrigin,
}

impl ListedUser {
    pub fn server(record: UserRecord) -> Self {
        Self {
            record,
            origin: EntryOrigin::Server,
        }
    }

    pub fn pending(record: UserRecord) -> Self {
        Self {
            record,
            origin: EntryOrigin::Pending {
                token: Uuid::new_v4(),
            },
        }
    }

    pub fn id(&self) -> UserId {
        self.record.id
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.origin, EntryOrigin::Pending { .. })
    }

    /// Stable identity for rendering. Pending rows never share it with server rows.
    pub fn render_key(&self) -> String {
        match &self.origin {
            EntryOrigin::Server => format!("user-{}", self.record.id),
            EntryOrigin::Pending { token } => format!("pending-{token}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryData {
    Users(Vec<ListedUser>),
    User(UserRecord),
}

pub trait CachedValue: Clone + Send + Sync + 'static {
    fn into_data(self) -> QueryData;
    fn from_data(data: &QueryData) -> Option<Self>;
}

impl CachedValue for Vec<ListedUser> {
    fn into_data(self) -> QueryData {
        QueryData::Users(self)
    }

    fn from_data(data: &QueryData) -> Option<Self> {
        match data {
            QueryData::Users(users) => Some(users.clone()),
            QueryData::User(_) => None,
        }
    }
}

impl CachedValue for UserRecord {
    fn into_data(self) -> QueryData {
        QueryData::User(self)
    }

    fn from_data(data: &QueryData) -> Option<Self> {
        match data {
            QueryData::User(user) => Some(user.clone()),
            QueryData::Users(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Fresh,
    Stale,
    Fetching,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub updated_at: DateTime<Utc>,
    pub status: EntryStatus,
}

struct StoredEntry {
    data: QueryData,
    fetched_at: Instant,
    updated_at: DateTime<Utc>,
    invalidated: bool,
}

impl StoredEntry {
    fn fresh(data: QueryData) -> Self {
        Self {
            data,
            fetched_at: Instant::now(),
            updated_at: Utc::now(),
            invalidated: false,
        }
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<QueryData, ClientError>>>;

struct InFlight {
    id: u64,
    generation: u64,
    load: SharedLoad,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, StoredEntry>,
    in_flight: HashMap<QueryKey, InFlight>,
    // Bumped whenever a key is written, removed, invalidated or cancelled; a
    // load only stores its result if the generation it started with is current.
    generations: HashMap<QueryKey, u64>,
    next_load_id: u64,
}

impl CacheState {
    fn generation(&self, key: &QueryKey) -> u64 {
        self.generations.get(key).copied().unwrap_or_default()
    }

    fn bump(&mut self, key: &QueryKey) {
        *self.generations.entry(key.clone()).or_default() += 1;
    }

    /// A load is running whose result will still be stored.
    fn is_loading(&self, key: &QueryKey) -> bool {
        self.in_flight
            .get(key)
            .is_some_and(|in_flight| in_flight.generation == self.generation(key))
    }

    fn finish(&mut self, key: &QueryKey, id: u64) {
        if self
            .in_flight
            .get(key)
            .is_some_and(|in_flight| in_flight.id == id)
        {
            self.in_flight.remove(key);
        }
    }

    fn store(&mut self, key: QueryKey, data: QueryData) {
        self.bump(&key);
        self.entries.insert(key, StoredEntry::fresh(data));
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct QueryCache {
    stale_time: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_stale_time(DEFAULT_STALE_TIME)
    }

    pub fn with_stale_time(stale_time: Duration) -> Self {
        Self {
            stale_time,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    fn is_stale(&self, entry: &StoredEntry) -> bool {
        entry.invalidated || entry.fetched_at.elapsed() > self.stale_time
    }

    fn status_of(&self, state: &CacheState, key: &QueryKey, entry: &StoredEntry) -> EntryStatus {
        if state.is_loading(key) {
            EntryStatus::Fetching
        } else if self.is_stale(entry) {
            EntryStatus::Stale
        } else {
            EntryStatus::Fresh
        }
    }

    /// Synchronous lookup. Never starts a load.
    pub fn read<T: CachedValue>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
        let state = lock_state(&self.state);
        let entry = state.entries.get(key)?;
        let value = T::from_data(&entry.data)?;
        Some(CacheEntry {
            value,
            fetched_at: entry.fetched_at,
            updated_at: entry.updated_at,
            status: self.status_of(&state, key, entry),
        })
    }

    /// Returns the fresh cached value, or loads it. Concurrent callers for one
    /// key share a single load. A failed load leaves the cached entry as it was.
    /// The load runs on its own task, so it completes and stores even if every
    /// caller stops waiting.
    ///
    /// `loader` is called under the cache lock; only the future it returns may
    /// touch the cache.
    pub async fn fetch_and_store<T, F, Fut>(&self, key: QueryKey, loader: F) -> Result<T, ClientError>
    where
        T: CachedValue,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let load = {
            let mut state = lock_state(&self.state);
            if let Some(entry) = state.entries.get(&key) {
                if !self.is_stale(entry) {
                    if let Some(value) = T::from_data(&entry.data) {
                        debug!(key = %key, "query cache hit");
                        return Ok(value);
                    }
                }
            }

            // Loads started before an invalidation are superseded; don't join them.
            let current = state.generation(&key);
            match state.in_flight.get(&key) {
                Some(in_flight) if state.is_loading(&key) => {
                    debug!(key = %key, "joining in-flight load");
                    in_flight.load.clone()
                }
                _ => {
                    debug!(key = %key, "query cache miss, loading");
                    let id = state.next_load_id;
                    state.next_load_id += 1;
                    let load = self.start_load(key.clone(), id, current, loader());
                    state.in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            generation: current,
                            load: load.clone(),
                        },
                    );
                    load
                }
            }
        };

        let data = load.await?;
        T::from_data(&data).ok_or_else(|| ClientError::Decode {
            operation: key.operation(),
            message: format!("cached value under {key} has a different shape"),
        })
    }

    fn start_load<T, Fut>(&self, key: QueryKey, id: u64, generation: u64, fut: Fut) -> SharedLoad
    where
        T: CachedValue,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let key = task_key;
            let result = fut.await.map(CachedValue::into_data);
            let mut guard = lock_state(&state);
            guard.finish(&key, id);

            match &result {
                Ok(data) if guard.generation(&key) == generation => {
                    guard.store(key, data.clone());
                }
                Ok(_) => debug!(key = %key, "discarding result of superseded load"),
                Err(err) => warn!(key = %key, error = %err, "query load failed"),
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    lock_state(&state).finish(&key, id);
                    Err(ClientError::Network {
                        operation: key.operation(),
                        message: format!("load task for {key} failed: {err}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Inserts or replaces an entry as fresh.
    pub fn write<T: CachedValue>(&self, key: QueryKey, value: T) {
        let mut state = lock_state(&self.state);
        debug!(key = %key, "query cache write");
        state.store(key, value.into_data());
    }

    /// Rewrites a cached value in place. Absent entries stay absent.
    pub fn update<T, F>(&self, key: &QueryKey, f: F) -> bool
    where
        T: CachedValue,
        F: FnOnce(T) -> T,
    {
        let mut state = lock_state(&self.state);
        let Some(current) = state.entries.get(key).and_then(|entry| T::from_data(&entry.data))
        else {
            return false;
        };
        debug!(key = %key, "query cache update");
        state.store(key.clone(), f(current).into_data());
        true
    }

    /// Marks every entry under `prefix` stale without dropping its value, and
    /// supersedes loads already running for those keys.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut state = lock_state(&self.state);
        let mut keys: Vec<QueryKey> = state
            .entries
            .keys()
            .chain(state.in_flight.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        let mut marked = 0;
        for key in &keys {
            state.bump(key);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.invalidated = true;
                marked += 1;
            }
        }
        debug!(prefix = %prefix, marked, "query cache invalidate");
        marked
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        let mut state = lock_state(&self.state);
        state.bump(key);
        let removed = state.entries.remove(key).is_some();
        debug!(key = %key, removed, "query cache remove");
        removed
    }

    /// Abandons loads under `prefix`. Their waiters still resolve, but the
    /// results are not stored.
    pub fn cancel(&self, prefix: &QueryKey) -> usize {
        let mut state = lock_state(&self.state);
        let keys: Vec<QueryKey> = state
            .in_flight
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            state.in_flight.remove(key);
            state.bump(key);
        }
        if !keys.is_empty() {
            debug!(prefix = %prefix, cancelled = keys.len(), "cancelled in-flight loads");
        }
        keys.len()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        lock_state(&self.state).entries.contains_key(key)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock_state(&self.state).is_loading(key)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = lock_state(&self.state).entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
