//! HTTP client for the cloud store.
//!
//! Every endpoint answers with an [`ApiResponse`] envelope. A transport error
//! or an envelope without data becomes an error for the single call that
//! produced it.

use super::remote::{RemoteAck, RemoteCommit, RemoteStore, UpsertResponse, UsageInfo};
use crate::error::{Error, Result};
use crate::models::CommitBundle;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// API response wrapper
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    updated_at: Option<DateTime<Utc>>,
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.token {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(Error::NotAuthenticated),
        }
    }

    /// Send a request and unwrap the envelope. `Ok(None)` means 404.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = self.authorized(request)?.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::NotAuthenticated);
        }

        let envelope: ApiResponse<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) if !status.is_success() => {
                return Err(Error::Remote(format!("server returned {}: {}", status, e)))
            }
            Err(e) => return Err(e.into()),
        };
        if !status.is_success() || !envelope.success {
            return Err(Error::Remote(
                envelope
                    .error
                    .unwrap_or_else(|| format!("server returned {}", status)),
            ));
        }
        Ok(envelope.data)
    }

    async fn send_required<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .ok_or_else(|| Error::Remote("server returned no data".to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn list_changed_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteCommit>> {
        let mut request = self.client.get(self.url("/api/sync/commits"));
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Micros, true))]);
        }
        let commits: Option<Vec<RemoteCommit>> = self.send(request).await?;
        Ok(commits.unwrap_or_default())
    }

    async fn get_commit(&self, id: &str) -> Result<Option<RemoteCommit>> {
        self.send(self.client.get(self.url(&format!("/api/sync/commits/{}", id))))
            .await
    }

    async fn commit_version(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let version: Option<VersionResponse> = self
            .send(self.client.get(self.url(&format!("/api/sync/commits/{}/version", id))))
            .await?;
        Ok(version.and_then(|v| v.updated_at))
    }

    async fn upsert_commit(&self, bundle: &CommitBundle) -> Result<UpsertResponse> {
        let request = self
            .client
            .put(self.url(&format!("/api/sync/commits/{}", bundle.commit.id)))
            .json(bundle);
        let response = self.authorized(request)?.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::NotAuthenticated);
        }

        let envelope: ApiResponse<RemoteAck> = response.json().await?;
        match envelope.data {
            Some(ack) if envelope.success && status.is_success() => Ok(UpsertResponse::Ack(ack)),
            _ => Ok(UpsertResponse::Reject(
                envelope
                    .error
                    .unwrap_or_else(|| format!("server returned {}", status)),
            )),
        }
    }

    async fn get_usage(&self, user_id: &str) -> Result<UsageInfo> {
        let request = self
            .client
            .get(self.url("/api/usage"))
            .query(&[("userId", user_id)]);
        self.send_required(request).await
    }
}
