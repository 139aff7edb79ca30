//! Client-side core of the user directory: REST access, the query cache that
//! keeps list and detail views consistent, the mutation coordinator that
//! patches that cache, and the create/edit form state machine.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use shared::domain::UserRecord;

pub mod api;
pub mod cache;
pub mod config;
pub mod form;
pub mod keys;
pub mod mutations;
pub mod queries;

pub use api::{DirectoryApi, HttpDirectoryApi};
pub use cache::{CacheEntry, CachedValue, EntryOrigin, EntryStatus, ListedUser, QueryCache, QueryData};
pub use config::{load_settings, Settings};
pub use form::{FormError, FormMode, FormState, SubmitRequest, UserForm, ValidationErrorMap};
pub use keys::{ListFilters, QueryKey, UserKeys};
pub use mutations::{
    DirectoryEvent, MutationError, MutationKind, MutationOutput, MutationState, MutationStatus,
    MutationVariables, UserMutations,
};
pub use queries::{QueryResult, UserQueries};

/// One explicitly constructed client: the cache is created here and shared by
/// the read and write sides.
pub struct DirectoryClient {
    cache: Arc<QueryCache>,
    queries: UserQueries,
    mutations: UserMutations,
}

impl DirectoryClient {
    pub fn new(api: Arc<dyn DirectoryApi>, cache: Arc<QueryCache>) -> Self {
        Self {
            queries: UserQueries::new(Arc::clone(&api), Arc::clone(&cache)),
            mutations: UserMutations::new(api, Arc::clone(&cache)),
            cache,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.base_url()?;
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build http client")?;
        let api = HttpDirectoryApi::with_client(http, base_url);
        let cache = QueryCache::with_stale_time(settings.stale_time());
        Ok(Self::new(Arc::new(api), Arc::new(cache)))
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn queries(&self) -> &UserQueries {
        &self.queries
    }

    pub fn mutations(&self) -> &UserMutations {
        &self.mutations
    }

    pub fn create_form(&self) -> UserForm {
        UserForm::create()
    }

    pub fn edit_form(&self, record: UserRecord) -> UserForm {
        UserForm::edit(record)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
