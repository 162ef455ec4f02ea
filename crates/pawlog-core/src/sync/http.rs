//! `RemoteApi` over the pet-care REST backend.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::remote::{RemoteApi, RemoteError, RemoteRef, RemoteResult};
use crate::config::normalize_api_base_url;
use crate::models::{RecordId, RecordKind};

/// HTTP client for `/api/animals`, `/api/care` and `/health`.
///
/// Clones share the bearer token, so replacing it after a fresh login is
/// seen by every clone.
#[derive(Clone)]
pub struct HttpRemoteApi {
    base_url: String,
    client: reqwest::Client,
    bearer_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpRemoteApi {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .field("bearer_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    /// `timeout` bounds every request, including connect.
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let base_url =
            normalize_api_base_url(base_url).map_err(RemoteError::InvalidConfiguration)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))?;

        Ok(Self {
            base_url,
            client,
            bearer_token: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.set_bearer_token(Some(token.into()));
        self
    }

    /// Replace (or clear) the token attached to every request.
    pub fn set_bearer_token(&self, token: Option<String>) {
        let token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        *self
            .bearer_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: RecordKind) -> String {
        format!("{}/api/{}", self.base_url, collection_path(kind))
    }

    fn record_url(&self, kind: RecordKind, remote_id: &str) -> String {
        format!("{}/{}", self.collection_url(kind), remote_id.trim())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .bearer_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let request = request.header("Accept", "application/json");
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

const fn collection_path(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Animal => "animals",
        RecordKind::Care => "care",
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create(&self, kind: RecordKind, body: &serde_json::Value) -> RemoteResult<RemoteRef> {
        let response = self
            .authorized(self.client.post(self.collection_url(kind)).json(body))
            .send()
            .await?;
        let payload = ensure_success(response)
            .await?
            .json::<RemoteRecordResponse>()
            .await?;
        payload.try_into()
    }

    async fn update(
        &self,
        kind: RecordKind,
        remote_id: &str,
        body: &serde_json::Value,
    ) -> RemoteResult<RemoteRef> {
        let response = self
            .authorized(self.client.put(self.record_url(kind, remote_id)).json(body))
            .send()
            .await?;
        let payload = ensure_success(response)
            .await?
            .json::<RemoteRecordResponse>()
            .await?;
        // Some backends answer an update without echoing the id
        Ok(RemoteRef::try_from(payload).unwrap_or_else(|_| RemoteRef {
            id: remote_id.to_string(),
            user_id: None,
        }))
    }

    async fn delete(&self, kind: RecordKind, remote_id: &str) -> RemoteResult<()> {
        let response = self
            .authorized(self.client.delete(self.record_url(kind, remote_id)))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn find_by_client_id(
        &self,
        kind: RecordKind,
        client_id: &RecordId,
    ) -> RemoteResult<Option<RemoteRef>> {
        let client_id = client_id.as_str();
        let response = self
            .authorized(
                self.client
                    .get(self.collection_url(kind))
                    .query(&[("clientId", client_id.as_str())]),
            )
            .send()
            .await?;
        let records = ensure_success(response)
            .await?
            .json::<Vec<RemoteRecordResponse>>()
            .await?;

        // The filter is advisory on the server side; match locally as well
        records
            .into_iter()
            .find(|record| record.client_id.as_deref() == Some(client_id.as_str()))
            .map(RemoteRef::try_from)
            .transpose()
    }

    async fn health(&self) -> RemoteResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status, parse_api_error(status, &body)))
}

#[derive(Debug, Deserialize)]
struct RemoteRecordResponse {
    #[serde(rename = "_id")]
    object_id: Option<String>,
    id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

impl TryFrom<RemoteRecordResponse> for RemoteRef {
    type Error = RemoteError;

    fn try_from(value: RemoteRecordResponse) -> RemoteResult<Self> {
        let id = value
            .object_id
            .or(value.id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                RemoteError::InvalidPayload("response did not include _id/id".to_string())
            })?;

        Ok(Self {
            id,
            user_id: value.user_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = crate::util::compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
