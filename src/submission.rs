use chrono::Utc;

use crate::domain::NewTransaction;
use crate::store::StatusRecord;
use crate::store::TransactionPayload;
use crate::store::TransactionStore;
use crate::utils::error_chain_fmt;

/// Intake half of the pipeline: dedup, status write, enqueue. Never talks to
/// the posting service; the worst case is a handful of store round-trips,
/// which is what keeps the intake path inside its latency budget.
pub struct SubmissionService {
    store: TransactionStore,
    queue_max_size: i64,
    status_ttl: chrono::Duration,
    dedup_ttl: chrono::Duration,
}

pub enum SubmitOutcome {
    /// New id; the record was written and queued.
    Accepted(StatusRecord),
    /// Same-id resubmission inside the dedup window; the caller observes the
    /// prior submission's record. Not an error.
    Duplicate(StatusRecord),
}

#[derive(thiserror::Error)]
pub enum SubmitError {
    /// Backpressure: the queue is at capacity. Transient, the client should
    /// retry later.
    #[error("delivery queue is at capacity")]
    QueueFull,
    #[error("store is unavailable")]
    Store(#[from] sqlx::Error),
}

impl std::fmt::Debug for SubmitError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl SubmissionService {
    pub fn new(
        store: TransactionStore,
        queue_max_size: i64,
        status_ttl: chrono::Duration,
        dedup_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            queue_max_size,
            status_ttl,
            dedup_ttl,
        }
    }

    /// Accept one validated transaction. The depth check runs before any
    /// mutation, so a rejected submission leaves no marker behind; the dedup
    /// claim runs before the status write, so concurrent same-id submissions
    /// enqueue at most once.
    #[tracing::instrument(skip_all, fields(transaction_id = %transaction.id.as_ref()))]
    pub async fn submit(
        &self,
        transaction: NewTransaction,
    ) -> Result<SubmitOutcome, SubmitError> {
        if self.store.queue_depth().await? >= self.queue_max_size {
            return Err(SubmitError::QueueFull);
        }

        let id = transaction.id.as_ref().to_string();
        if !self
            .store
            .try_claim_dedup_marker(&id, self.dedup_ttl)
            .await?
        {
            if let Some(existing) = self.store.get_status_record(&id).await? {
                tracing::info!("duplicate submission, returning prior status");
                return Ok(SubmitOutcome::Duplicate(existing));
            }
            // marker outlived the record; treat as a fresh submission rather
            // than failing the client
            tracing::warn!("dedup marker with no status record, resubmitting");
        }

        let now = Utc::now();
        let record = StatusRecord::pending(TransactionPayload::from(transaction), now);
        self.store
            .upsert_status_record(&record, self.status_ttl)
            .await?;
        self.store.enqueue(&id, now).await?;
        tracing::info!("transaction queued");
        Ok(SubmitOutcome::Accepted(record))
    }

    /// Single status read; `None` once the TTL has reclaimed the record.
    pub async fn get_status(
        &self,
        transaction_id: &str,
    ) -> Result<Option<StatusRecord>, sqlx::Error> {
        self.store.get_status_record(transaction_id).await
    }

    pub async fn queue_depth(&self) -> Result<i64, sqlx::Error> {
        self.store.queue_depth().await
    }
}
