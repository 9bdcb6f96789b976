use std::time::Instant;

use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::CurrencyCode;
use crate::domain::NewTransaction;
use crate::domain::TransactionAmount;
use crate::domain::TransactionDescription;
use crate::domain::TransactionId;
use crate::metrics::RuntimeMetrics;
use crate::startup::IntakeBudget;
use crate::store::StatusRecord;
use crate::store::TransactionState;
use crate::submission::SubmissionService;
use crate::submission::SubmitError;
use crate::submission::SubmitOutcome;
use crate::utils::error_chain_fmt;

/// Raw request body; everything here is unvalidated until it passes through
/// the domain parsers.
#[derive(Deserialize)]
pub struct TransactionBody {
    pub id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<TransactionBody> for NewTransaction {
    type Error = String;

    fn try_from(body: TransactionBody) -> Result<Self, Self::Error> {
        let id = match body.id {
            Some(raw) => TransactionId::parse(raw)?,
            None => TransactionId::generate(),
        };
        let amount = TransactionAmount::parse(body.amount)?;
        let currency = CurrencyCode::parse(body.currency)?;
        let description = TransactionDescription::parse(body.description)?;
        Ok(Self {
            id,
            amount,
            currency,
            description,
            timestamp: body.timestamp.unwrap_or_else(Utc::now),
            metadata: body.metadata,
        })
    }
}

#[derive(thiserror::Error)]
pub enum SubmitTransactionError {
    #[error("{0}")]
    Validation(String),
    #[error("delivery queue is at capacity, retry later")]
    QueueFull,
    #[error("store is unavailable")]
    Store(#[source] sqlx::Error),
}

impl std::fmt::Debug for SubmitTransactionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SubmitTransactionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            // both transient: the client should back off and retry
            Self::QueueFull | Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<SubmitError> for SubmitTransactionError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::QueueFull => Self::QueueFull,
            SubmitError::Store(e) => Self::Store(e),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    transaction_id: String,
    status: TransactionState,
    submitted_at: DateTime<Utc>,
}

/// `POST /api/transactions`. Validates, dedups, persists, queues; never
/// waits on the downstream posting service.
#[tracing::instrument(
    name = "Submitting transaction",
    skip_all,
    fields(transaction_id = tracing::field::Empty)
)]
pub async fn submit_transaction(
    body: web::Json<TransactionBody>,
    service: web::Data<SubmissionService>,
    metrics: web::Data<RuntimeMetrics>,
    budget: web::Data<IntakeBudget>,
) -> Result<HttpResponse, SubmitTransactionError> {
    let started = Instant::now();
    let result = handle_submission(body.into_inner(), &service).await;
    metrics.record_request(result.is_ok());

    let elapsed = started.elapsed();
    if elapsed > budget.0 {
        tracing::warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.0.as_millis() as u64,
            "intake exceeded its latency budget"
        );
    }

    let record = result?;
    Ok(HttpResponse::Ok().json(SubmitResponse {
        transaction_id: record.transaction_id,
        status: record.state,
        submitted_at: record.submitted_at,
    }))
}

async fn handle_submission(
    body: TransactionBody,
    service: &SubmissionService,
) -> Result<StatusRecord, SubmitTransactionError> {
    let transaction: NewTransaction = body
        .try_into()
        .map_err(SubmitTransactionError::Validation)?;
    tracing::Span::current().record(
        "transaction_id",
        tracing::field::display(transaction.id.as_ref()),
    );

    // a duplicate is not an error: the client observes the record its
    // earlier submission created
    let record = match service.submit(transaction).await? {
        SubmitOutcome::Accepted(record) => record,
        SubmitOutcome::Duplicate(record) => record,
    };
    Ok(record)
}
