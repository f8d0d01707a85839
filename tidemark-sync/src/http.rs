//! reqwest binding of the remote API.
//!
//! Endpoints, relative to the base URL:
//! - `POST   /api/v1/records`
//! - `PUT    /api/v1/records/{id}`
//! - `DELETE /api/v1/records/{id}`
//! - `GET    /api/v1/records/changes?limit=&since=`
//! - `POST   /api/v1/telemetry`
//!
//! Every request carries the provider's bearer token. Status codes are
//! turned into [`RemoteError`] variants here and nowhere else.

use crate::auth::AuthProvider;
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::remote::{ChangeSet, RemoteApi, RemoteRecord, TelemetryTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tidemark_types::{RecordId, format_timestamp};
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ConflictBody {
    server_record: RemoteRecord,
}

/// HTTP client for the Tidemark record API.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    auth: Arc<dyn AuthProvider>,
}

impl HttpRemote {
    /// Creates a client for `base_url` (e.g. `https://api.example.com`).
    pub fn new(base_url: &str, auth: Arc<dyn AuthProvider>) -> SyncResult<Self> {
        Self::with_timeout(base_url, auth, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`HttpRemote::new`] with a per-request timeout.
    pub fn with_timeout(
        base_url: &str,
        auth: Arc<dyn AuthProvider>,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!("invalid base url {base_url}")));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Network(format!("invalid base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RemoteResult<RequestBuilder> {
        let token = self.auth.token().ok_or(RemoteError::MissingToken)?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "Remote call failed");

        if status.as_u16() == 409 {
            if let Ok(conflict) = serde_json::from_str::<ConflictBody>(&body) {
                return Err(RemoteError::Conflict {
                    server_record: Box::new(conflict.server_record),
                });
            }
        }

        Err(RemoteError::Status {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(err.to_string())
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create_record(&self, payload: &RemoteRecord) -> RemoteResult<RemoteRecord> {
        let url = self.endpoint(&["records"])?;
        let request = self.request(Method::POST, url)?.json(payload);
        self.send_json(request).await
    }

    async fn update_record(
        &self,
        id: &RecordId,
        payload: &RemoteRecord,
    ) -> RemoteResult<RemoteRecord> {
        let url = self.endpoint(&["records", id.as_str()])?;
        let request = self.request(Method::PUT, url)?.json(payload);
        self.send_json(request).await
    }

    async fn delete_record(&self, id: &RecordId) -> RemoteResult<()> {
        let url = self.endpoint(&["records", id.as_str()])?;
        let request = self.request(Method::DELETE, url)?;
        self.send(request).await?;
        Ok(())
    }

    async fn get_changes(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<ChangeSet> {
        let url = self.endpoint(&["records", "changes"])?;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("since", format_timestamp(&since)));
        }
        let request = self.request(Method::GET, url)?.query(&query);
        self.send_json(request).await
    }
}

#[async_trait]
impl TelemetryTransport for HttpRemote {
    async fn send_telemetry(&self, payload: &Value) -> RemoteResult<()> {
        let url = self.endpoint(&["telemetry"])?;
        let request = self.request(Method::POST, url)?.json(payload);
        self.send(request).await?;
        Ok(())
    }
}
