use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Serialize;

use crate::store::TransactionPayload;

/// Adapter for the downstream posting service. Stateless aside from the base
/// URL; the inner `Client` pools connections, so share one instance per
/// process where convenient.
#[derive(Clone)]
pub struct PostingClient {
    http_client: Client,
    base_url: String,
}

#[derive(thiserror::Error, Debug)]
pub enum PostingError {
    /// Any non-2xx response; the downstream answers 400 when the id already
    /// exists, which the caller's existence probe disambiguates.
    #[error("posting service rejected the request: {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("could not reach posting service")]
    Network(#[from] reqwest::Error),
}

/// The downstream create contract carries exactly these fields; stored
/// metadata stays on our side.
#[derive(Serialize)]
struct PostTransactionBody<'a> {
    id: &'a str,
    amount: f64,
    currency: &'a str,
    description: &'a str,
    timestamp: DateTime<Utc>,
}

impl PostingClient {
    pub fn new(
        base_url: String,
        timeout: Duration,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http_client,
            base_url,
        }
    }

    /// Issue the create request. Success iff 2xx; everything else (including
    /// transport errors) is a failure for the retry machinery to classify.
    #[tracing::instrument(skip_all, fields(transaction_id = %payload.id))]
    pub async fn post(
        &self,
        payload: &TransactionPayload,
    ) -> Result<(), PostingError> {
        let body = PostTransactionBody {
            id: &payload.id,
            amount: payload.amount,
            currency: &payload.currency,
            description: &payload.description,
            timestamp: payload.timestamp,
        };
        let resp = self
            .http_client
            .post(format!("{}/transactions", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        match status.is_success() {
            true => Ok(()),
            false => {
                let body = resp.text().await.unwrap_or_default();
                Err(PostingError::Rejected { status, body })
            }
        }
    }

    /// Existence check: 200 -> record, 404 -> none. Any other status is
    /// logged and treated as absent; the retry loop probes again anyway.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        transaction_id: &str,
    ) -> Result<Option<serde_json::Value>, PostingError> {
        let resp = self
            .http_client
            .get(format!("{}/transactions/{transaction_id}", self.base_url))
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            other => {
                tracing::warn!(
                    status = %other,
                    "unexpected status from existence check, treating as absent"
                );
                Ok(None)
            }
        }
    }

    /// Reset the downstream state. Test support only.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<(), PostingError> {
        let resp = self
            .http_client
            .post(format!("{}/cleanup", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        match status.is_success() {
            true => Ok(()),
            false => {
                let body = resp.text().await.unwrap_or_default();
                Err(PostingError::Rejected { status, body })
            }
        }
    }
}
