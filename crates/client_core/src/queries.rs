use std::{future::Future, sync::Arc};

use shared::{
    domain::{UserId, UserRecord},
    error::ClientError,
};
use tracing::{debug, warn};

use crate::{
    api::DirectoryApi,
    cache::{CachedValue, EntryStatus, ListedUser, QueryCache},
    keys::{QueryKey, UserKeys},
};

/// What a view sees for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub data: Option<T>,
    /// No data yet and a load is running.
    pub is_loading: bool,
    /// Data is being served while a refresh runs behind it.
    pub is_fetching: bool,
    pub error: Option<ClientError>,
}

impl<T> QueryResult<T> {
    fn disabled() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            error: None,
        }
    }

    fn ready(data: T) -> Self {
        Self {
            data: Some(data),
            is_loading: false,
            is_fetching: false,
            error: None,
        }
    }

    fn revalidating(data: T) -> Self {
        Self {
            data: Some(data),
            is_loading: false,
            is_fetching: true,
            error: None,
        }
    }

    fn loading() -> Self {
        Self {
            data: None,
            is_loading: true,
            is_fetching: true,
            error: None,
        }
    }

    fn failed(error: ClientError) -> Self {
        Self {
            data: None,
            is_loading: false,
            is_fetching: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }
}

async fn load_collection(api: Arc<dyn DirectoryApi>) -> Result<Vec<ListedUser>, ClientError> {
    Ok(api.list().await?.into_iter().map(ListedUser::server).collect())
}

/// Read side of the directory: list and detail queries over the shared cache.
pub struct UserQueries {
    api: Arc<dyn DirectoryApi>,
    cache: Arc<QueryCache>,
}

impl UserQueries {
    pub fn new(api: Arc<dyn DirectoryApi>, cache: Arc<QueryCache>) -> Self {
        Self { api, cache }
    }

    pub async fn use_collection(&self) -> QueryResult<Vec<ListedUser>> {
        let api = Arc::clone(&self.api);
        self.observe(UserKeys::lists(), move || load_collection(api)).await
    }

    /// Unbound ids (`<= 0`) disable the query.
    pub async fn use_entity(&self, id: UserId) -> QueryResult<UserRecord> {
        if !id.is_bound() {
            return QueryResult::disabled();
        }
        let api = Arc::clone(&self.api);
        self.observe(UserKeys::detail(id), move || async move { api.get(id).await })
            .await
    }

    /// Cache-only view of the list for rendering between awaits.
    pub fn collection_snapshot(&self) -> QueryResult<Vec<ListedUser>> {
        self.snapshot(&UserKeys::lists())
    }

    pub fn entity_snapshot(&self, id: UserId) -> QueryResult<UserRecord> {
        if !id.is_bound() {
            return QueryResult::disabled();
        }
        self.snapshot(&UserKeys::detail(id))
    }

    fn snapshot<T: CachedValue>(&self, key: &QueryKey) -> QueryResult<T> {
        match self.cache.read::<T>(key) {
            Some(entry) if entry.status == EntryStatus::Fetching => {
                QueryResult::revalidating(entry.value)
            }
            Some(entry) => QueryResult::ready(entry.value),
            None if self.cache.is_fetching(key) => QueryResult::loading(),
            None => QueryResult::disabled(),
        }
    }

    /// Forces an authoritative list load, dropping any optimistic rows.
    pub async fn refetch_collection(&self) -> Result<Vec<ListedUser>, ClientError> {
        self.cache.invalidate(&UserKeys::lists());
        let api = Arc::clone(&self.api);
        self.cache
            .fetch_and_store(UserKeys::lists(), move || load_collection(api))
            .await
    }

    async fn observe<T, F, Fut>(&self, key: QueryKey, loader: F) -> QueryResult<T>
    where
        T: CachedValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        match self.cache.read::<T>(&key) {
            Some(entry) if entry.status == EntryStatus::Fresh => QueryResult::ready(entry.value),
            // A running load is joined rather than trusted to finish.
            Some(entry) => {
                self.revalidate(key, loader);
                QueryResult::revalidating(entry.value)
            }
            None => match self.cache.fetch_and_store(key, loader).await {
                Ok(value) => QueryResult::ready(value),
                Err(err) => QueryResult::failed(err),
            },
        }
    }

    fn revalidate<T, F, Fut>(&self, key: QueryKey, loader: F)
    where
        T: CachedValue,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        debug!(key = %key, "serving stale data, revalidating in background");
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(err) = cache.fetch_and_store(key.clone(), loader).await {
                warn!(key = %key, error = %err, "background revalidation failed");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/queries_tests.rs"]
mod tests;
