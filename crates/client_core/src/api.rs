use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{DraftUser, UserId, UserRecord},
    error::{ClientError, Operation},
};
use tracing::{debug, warn};
use url::Url;

/// The five REST operations of the user directory backend.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn list(&self) -> Result<Vec<UserRecord>, ClientError>;
    async fn get(&self, id: UserId) -> Result<UserRecord, ClientError>;
    async fn create(&self, draft: &DraftUser) -> Result<UserRecord, ClientError>;
    async fn update(&self, record: &UserRecord) -> Result<UserRecord, ClientError>;
    async fn delete(&self, id: UserId) -> Result<(), ClientError>;
}

pub struct HttpDirectoryApi {
    http: Client,
    base_url: Url,
}

/// Ensures relative joins append to the base path instead of replacing its last segment.
pub fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

impl HttpDirectoryApi {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: with_trailing_slash(base_url),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, operation: Operation, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::Network {
                operation,
                message: format!("invalid request url for '{path}': {err}"),
            })
    }

    async fn send(&self, operation: Operation, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await.map_err(|err| {
            warn!(operation = ?operation, error = %err, "directory request failed");
            ClientError::Network {
                operation,
                message: err.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(operation = ?operation, status = status.as_u16(), "directory request rejected");
            return Err(ClientError::Remote {
                operation,
                status: status.as_u16(),
            });
        }
        debug!(operation = ?operation, status = status.as_u16(), "directory request succeeded");
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        operation: Operation,
        response: Response,
    ) -> Result<T, ClientError> {
        response.json::<T>().await.map_err(|err| ClientError::Decode {
            operation,
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryApi {
    async fn list(&self) -> Result<Vec<UserRecord>, ClientError> {
        let operation = Operation::List;
        let url = self.endpoint(operation, "users")?;
        let response = self.send(operation, self.http.get(url)).await?;
        Self::decode(operation, response).await
    }

    async fn get(&self, id: UserId) -> Result<UserRecord, ClientError> {
        let operation = Operation::Get(id);
        let url = self.endpoint(operation, &format!("users/{id}"))?;
        let response = self.send(operation, self.http.get(url)).await?;
        Self::decode(operation, response).await
    }

    async fn create(&self, draft: &DraftUser) -> Result<UserRecord, ClientError> {
        let operation = Operation::Create;
        let url = self.endpoint(operation, "users")?;
        let response = self.send(operation, self.http.post(url).json(draft)).await?;
        Self::decode(operation, response).await
    }

    async fn update(&self, record: &UserRecord) -> Result<UserRecord, ClientError> {
        let operation = Operation::Update(record.id);
        let url = self.endpoint(operation, &format!("users/{}", record.id))?;
        let response = self.send(operation, self.http.put(url).json(record)).await?;
        Self::decode(operation, response).await
    }

    async fn delete(&self, id: UserId) -> Result<(), ClientError> {
        let operation = Operation::Delete(id);
        let url = self.endpoint(operation, &format!("users/{id}"))?;
        self.send(operation, self.http.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
