use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::FromRow;
use sqlx::PgPool;
use sqlx::Row;

use super::records::QueueEntry;
use super::records::StatusRecord;
use super::records::TransactionState;

// how often `dequeue_blocking` re-polls an empty queue
const POLL_INTERVAL: Duration = Duration::from_millis(100);

impl<'r> FromRow<'r, PgRow> for StatusRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let state_raw: String = row.try_get("status")?;
        let state = TransactionState::parse(&state_raw).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: Box::new(e),
        })?;
        let payload_raw: String = row.try_get("payload")?;
        let payload =
            serde_json::from_str(&payload_raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: "payload".into(),
                source: Box::new(e),
            })?;
        Ok(Self {
            transaction_id: row.try_get("transaction_id")?,
            state,
            submitted_at: row.try_get("submitted_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            payload,
        })
    }
}

/// All durable state lives behind this handle: status records, dedup markers
/// and the work queue, one Postgres pool underneath. Every operation is a
/// single statement, so each is atomic on its own; callers never hold
/// cross-call state the store needs to stay consistent.
#[derive(Clone)]
pub struct TransactionStore {
    pool: PgPool,
}

impl TransactionStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Atomic set-if-absent. Returns `true` when this caller won the marker
    /// (no live marker existed); concurrent callers see exactly one winner.
    /// An expired marker counts as absent and is refreshed in place.
    #[tracing::instrument(skip(self, ttl))]
    pub async fn try_claim_dedup_marker(
        &self,
        transaction_id: &str,
        ttl: chrono::Duration,
    ) -> Result<bool, sqlx::Error> {
        let claimed = sqlx::query(
            r#"
            INSERT INTO dedup_markers (transaction_id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (transaction_id) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                WHERE dedup_markers.expires_at <= now()
            "#,
        )
        .bind(transaction_id)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        Ok(claimed)
    }

    /// Write (or overwrite) the status record for `record.transaction_id`.
    /// Overwrite only happens when a dead marker/record pair is being
    /// resubmitted; live records are mutated through the `mark_*` methods.
    #[tracing::instrument(skip_all, fields(transaction_id = %record.transaction_id))]
    pub async fn upsert_status_record(
        &self,
        record: &StatusRecord,
        ttl: chrono::Duration,
    ) -> Result<(), sqlx::Error> {
        // a payload that cannot serialise is a programming error, but it must
        // not take the worker down
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO status_records
                (transaction_id, status, submitted_at, completed_at, error,
                 retry_count, payload, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (transaction_id) DO UPDATE SET
                status = EXCLUDED.status,
                submitted_at = EXCLUDED.submitted_at,
                completed_at = EXCLUDED.completed_at,
                error = EXCLUDED.error,
                retry_count = EXCLUDED.retry_count,
                payload = EXCLUDED.payload,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&record.transaction_id)
        .bind(record.state.as_str())
        .bind(record.submitted_at)
        .bind(record.completed_at)
        .bind(&record.error)
        .bind(record.retry_count)
        .bind(payload)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read one status record; rows past their TTL read as absent even before
    /// the sweeper removes them.
    #[tracing::instrument(skip(self))]
    pub async fn get_status_record(
        &self,
        transaction_id: &str,
    ) -> Result<Option<StatusRecord>, sqlx::Error> {
        sqlx::query_as::<_, StatusRecord>(
            r#"
            SELECT transaction_id, status, submitted_at, completed_at, error,
                   retry_count, payload
            FROM status_records
            WHERE transaction_id = $1 AND expires_at > now()
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// pending -> processing. Returns `false` when the record was not in
    /// pending (already claimed, or terminal); the caller should discard.
    #[tracing::instrument(skip(self))]
    pub async fn mark_processing(
        &self,
        transaction_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE status_records
            SET status = $2
            WHERE transaction_id = $1 AND status = $3
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionState::Processing.as_str())
        .bind(TransactionState::Pending.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Persist the durable retry counter after a confirmed pre-write failure.
    #[tracing::instrument(skip(self))]
    pub async fn record_retry(
        &self,
        transaction_id: &str,
        retry_count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE status_records
            SET retry_count = $2
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal write. The state guard keeps terminal records immutable, so a
    /// late writer cannot resurrect a finished transaction.
    #[tracing::instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        transaction_id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE status_records
            SET status = $2, completed_at = $3
            WHERE transaction_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionState::Completed.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal write with a diagnostic; same immutability guard as
    /// `mark_completed`.
    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(
        &self,
        transaction_id: &str,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE status_records
            SET status = $2, completed_at = $3, error = $4
            WHERE transaction_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionState::Failed.as_str())
        .bind(completed_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Push one entry. The UNIQUE constraint on `transaction_id` makes a
    /// second push for a queued id a no-op, so an id is never on the queue
    /// twice at once.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(
        &self,
        transaction_id: &str,
        queued_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO work_queue (transaction_id, queued_at)
            VALUES ($1, $2)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(transaction_id)
        .bind(queued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove and return the oldest entry, or `None` on an empty queue.
    /// `FOR UPDATE SKIP LOCKED` hands each row to exactly one caller; the
    /// delete and the read are one statement, so a crashed consumer never
    /// leaves a half-popped entry behind.
    #[tracing::instrument(skip(self))]
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>, sqlx::Error> {
        sqlx::query_as::<_, QueueEntry>(
            r#"
            DELETE FROM work_queue
            WHERE id = (
                SELECT id FROM work_queue
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING transaction_id, queued_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await
    }

    /// `dequeue`, polled until an entry appears or `timeout` elapses. The
    /// short timeout keeps workers responsive to shutdown.
    pub async fn dequeue_blocking(
        &self,
        timeout: Duration,
    ) -> Result<Option<QueueEntry>, sqlx::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = self.dequeue().await? {
                return Ok(Some(entry));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Current queue length; observability only.
    pub async fn queue_depth(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM work_queue")
            .fetch_one(&self.pool)
            .await
    }
}
