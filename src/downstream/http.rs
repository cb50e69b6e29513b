//! HTTP client for a remote content store.
//!
//! Content is PUT as JSON to `{url}/content{base_path}` and publish intents to
//! `{url}/publish-intent{base_path}`. The remote store answers 409 when it
//! already holds a newer `payload_version`. Retrying is left to the delivery
//! queue; a single call makes a single request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ApplyOutcome, ContentStore, DeliveryError, DownstreamPayload, PublishIntent};

/// Content store reached over HTTP.
pub struct HttpContentStore {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpContentStore {
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub(crate) fn content_url(&self, base_path: &str) -> String {
        format!("{}/content{}", self.base_url, base_path)
    }

    pub(crate) fn intent_url(&self, base_path: &str) -> String {
        format!("{}/publish-intent{}", self.base_url, base_path)
    }

    /// Map a response to an outcome. `missing_ok` treats 404 as applied.
    async fn outcome(&self, response: Response, missing_ok: bool) -> Result<ApplyOutcome, DeliveryError> {
        let status = response.status();
        match classify(status, missing_ok) {
            Some(outcome) => Ok(outcome),
            None => {
                let body = response.text().await.unwrap_or_default();
                if is_retryable_status(status) {
                    warn!(store = %self.name, status = %status, "Content store returned retryable status");
                }
                Err(DeliveryError::Rejected {
                    store: self.name.clone(),
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                })
            }
        }
    }
}

/// Outcome for statuses that are not failures.
pub(crate) fn classify(status: StatusCode, missing_ok: bool) -> Option<ApplyOutcome> {
    if status.is_success() {
        Some(ApplyOutcome::Applied)
    } else if status == StatusCode::CONFLICT {
        Some(ApplyOutcome::Stale { last_applied: None })
    } else if missing_ok && status == StatusCode::NOT_FOUND {
        Some(ApplyOutcome::Applied)
    } else {
        None
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl ContentStore for HttpContentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_content(&self, payload: &DownstreamPayload) -> Result<ApplyOutcome, DeliveryError> {
        let response = self
            .client
            .put(self.content_url(&payload.base_path))
            .json(payload)
            .send()
            .await?;
        let outcome = self.outcome(response, false).await?;
        debug!(
            store = %self.name,
            content_id = %payload.content_id,
            payload_version = payload.payload_version,
            ?outcome,
            "Content delivered"
        );
        Ok(outcome)
    }

    async fn delete_content(
        &self,
        content_id: Uuid,
        locale: &str,
        base_path: &str,
        payload_version: i64,
    ) -> Result<ApplyOutcome, DeliveryError> {
        let response = self
            .client
            .delete(self.content_url(base_path))
            .query(&[
                ("content_id", content_id.to_string()),
                ("locale", locale.to_string()),
                ("payload_version", payload_version.to_string()),
            ])
            .send()
            .await?;
        self.outcome(response, true).await
    }

    async fn put_publish_intent(&self, base_path: &str, intent: &PublishIntent) -> Result<(), DeliveryError> {
        let response = self
            .client
            .put(self.intent_url(base_path))
            .json(intent)
            .send()
            .await?;
        self.outcome(response, false).await.map(|_| ())
    }

    async fn delete_publish_intent(&self, base_path: &str) -> Result<(), DeliveryError> {
        let response = self.client.delete(self.intent_url(base_path)).send().await?;
        self.outcome(response, true).await.map(|_| ())
    }
}
