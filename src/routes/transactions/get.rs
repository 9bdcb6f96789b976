use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::store::StatusRecord;
use crate::store::TransactionState;
use crate::submission::SubmissionService;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum StatusQueryError {
    #[error("transaction not found")]
    NotFound,
    #[error("store is unavailable")]
    Store(#[source] sqlx::Error),
}

impl std::fmt::Debug for StatusQueryError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for StatusQueryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Public projection of a status record; the stored payload stays private.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    transaction_id: String,
    status: TransactionState,
    submitted_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: i32,
}

impl From<StatusRecord> for StatusResponse {
    fn from(record: StatusRecord) -> Self {
        Self {
            transaction_id: record.transaction_id,
            status: record.state,
            submitted_at: record.submitted_at,
            completed_at: record.completed_at,
            error: record.error,
            retry_count: record.retry_count,
        }
    }
}

/// `GET /api/transactions/{transaction_id}`. One store read; 404 covers both
/// never-submitted ids and records past their TTL.
#[tracing::instrument(skip_all, fields(transaction_id = %transaction_id.as_str()))]
pub async fn get_transaction_status(
    transaction_id: web::Path<String>,
    service: web::Data<SubmissionService>,
) -> Result<HttpResponse, StatusQueryError> {
    let record = service
        .get_status(&transaction_id)
        .await
        .map_err(StatusQueryError::Store)?
        .ok_or(StatusQueryError::NotFound)?;
    Ok(HttpResponse::Ok().json(StatusResponse::from(record)))
}
