// This worker realises the store's TTLs (reads already filter on
// `expires_at`, the sweep reclaims the rows) and requeues pending records
// that never made it onto the queue.

use std::time::Duration;

use sqlx::PgPool;

use crate::configuration::Settings;
use crate::startup::get_connection_pool;

const SWEEP_PERIOD: Duration = Duration::from_secs(60);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

// a pending record older than this and absent from the queue is stranded
// (status write succeeded, queue push did not)
const REQUEUE_AFTER_SECONDS: f64 = 300.0;

async fn expire_dedup_markers(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM dedup_markers WHERE expires_at <= now()")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

async fn expire_status_records(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM status_records WHERE expires_at <= now()")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Reconciliation: push stranded pending ids back onto the queue. The
/// conflict clause keeps an id that is still queued from appearing twice.
async fn requeue_stale_pending(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let requeued = sqlx::query(
        r#"
        INSERT INTO work_queue (transaction_id, queued_at)
        SELECT transaction_id, now()
        FROM status_records
        WHERE status = 'pending'
          AND expires_at > now()
          AND submitted_at < now() - make_interval(secs => $1)
        ON CONFLICT (transaction_id) DO NOTHING
        "#,
    )
    .bind(REQUEUE_AFTER_SECONDS)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(requeued)
}

#[tracing::instrument(skip_all)]
async fn sweep(pool: &PgPool) -> Result<(), sqlx::Error> {
    let markers = expire_dedup_markers(pool).await?;
    let records = expire_status_records(pool).await?;
    let requeued = requeue_stale_pending(pool).await?;
    if markers + records + requeued > 0 {
        tracing::info!(
            expired_markers = markers,
            expired_records = records,
            requeued,
            "sweep reclaimed rows"
        );
    }
    Ok(())
}

async fn sweep_loop(pool: &PgPool) -> Result<(), anyhow::Error> {
    loop {
        match sweep(pool).await {
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "sweep failed"
                );
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
            Ok(()) => tokio::time::sleep(SWEEP_PERIOD).await,
        }
    }
}

/// To be run as a separate worker, outside the main API.
pub async fn run_sweeper_until_stopped(cfg: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&cfg.database);
    sweep_loop(&pool).await
}
