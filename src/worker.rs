use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinSet;

use crate::configuration::Settings;
use crate::configuration::WorkerSettings;
use crate::metrics::RuntimeMetrics;
use crate::posting_client::PostingClient;
use crate::startup::get_connection_pool;
use crate::store::QueueEntry;
use crate::store::StatusRecord;
use crate::store::TransactionStore;

// short pop timeout keeps workers responsive to the running flag
const POP_TIMEOUT: Duration = Duration::from_secs(1);
const IDLE_SLEEP: Duration = Duration::from_millis(100);
const ERROR_SLEEP: Duration = Duration::from_secs(1);
// a failed POST may still have committed; wait this long before probing
const RECHECK_DELAY: Duration = Duration::from_secs(1);

/// Flips the pool's running flag. Workers finish the in-flight transaction
/// and exit on their next pop timeout; whatever is still queued survives in
/// the store for the next start.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn stop(&self) { self.0.store(false, Ordering::Relaxed); }
}

/// N independent delivery loops. Workers share nothing in-process; every
/// hand-off goes through the store, so a worker crash costs at most the
/// transaction it was holding.
pub struct WorkerPool {
    store: TransactionStore,
    posting_client: PostingClient,
    cfg: WorkerSettings,
    metrics: RuntimeMetrics,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        cfg: &Settings,
        metrics: RuntimeMetrics,
    ) -> Self {
        let pool = get_connection_pool(&cfg.database);
        let posting_client = PostingClient::new(
            cfg.posting_service.base_url.clone(),
            cfg.posting_service.timeout(),
        );
        Self {
            store: TransactionStore::new(pool),
            posting_client,
            cfg: cfg.worker.clone(),
            metrics,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle { ShutdownHandle(Arc::clone(&self.running)) }

    /// Spawn the loops and wait for all of them to exit (which they only do
    /// once the running flag drops).
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        tracing::info!(concurrency = self.cfg.concurrency, "starting worker pool");
        let mut workers = JoinSet::new();
        for worker_id in 0..self.cfg.concurrency {
            workers.spawn(worker_loop(
                worker_id,
                self.store.clone(),
                self.posting_client.clone(),
                self.cfg.clone(),
                self.metrics.clone(),
                Arc::clone(&self.running),
            ));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "worker task aborted"
                );
            }
        }
        tracing::info!("worker pool drained");
        Ok(())
    }
}

/// One worker: pop, process, repeat. Errors are logged and absorbed; nothing
/// that happens in here may take the loop (or the pool) down.
#[tracing::instrument(skip(store, posting_client, cfg, metrics, running))]
async fn worker_loop(
    worker_id: usize,
    store: TransactionStore,
    posting_client: PostingClient,
    cfg: WorkerSettings,
    metrics: RuntimeMetrics,
    running: Arc<AtomicBool>,
) {
    tracing::info!("worker started");
    while running.load(Ordering::Relaxed) {
        match store.dequeue_blocking(POP_TIMEOUT).await {
            Ok(Some(entry)) => {
                if let Err(e) =
                    process_transaction(&store, &posting_client, &cfg, &metrics, entry).await
                {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        "failed to process transaction"
                    );
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            }
            Ok(None) => tokio::time::sleep(IDLE_SLEEP).await,
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "could not pop the queue"
                );
                tokio::time::sleep(ERROR_SLEEP).await;
            }
        }
    }
    tracing::info!("worker stopped");
}

enum DeliveryOutcome {
    Completed,
    Failed(String),
}

/// This worker owns the id from the successful pop until the terminal status
/// write; nothing may touch the record afterwards.
#[tracing::instrument(skip_all, fields(transaction_id = %entry.transaction_id))]
async fn process_transaction(
    store: &TransactionStore,
    posting_client: &PostingClient,
    cfg: &WorkerSettings,
    metrics: &RuntimeMetrics,
    entry: QueueEntry,
) -> Result<(), anyhow::Error> {
    let record = match store
        .get_status_record(&entry.transaction_id)
        .await
        .context("could not load status record")?
    {
        Some(record) => record,
        None => {
            tracing::warn!("queued id has no status record, discarding");
            return Ok(());
        }
    };
    tracing::debug!(
        queue_wait_ms = (Utc::now() - entry.queued_at).num_milliseconds(),
        "picked up transaction"
    );

    // safety net: a terminal record should never be on the queue, but a
    // stale entry must not be re-delivered
    if record.state.is_terminal() {
        tracing::warn!(state = record.state.as_str(), "queued id already terminal");
        return Ok(());
    }
    if !store.mark_processing(&record.transaction_id).await? {
        tracing::warn!("record is not pending, discarding");
        return Ok(());
    }

    let _guard = metrics.delivery_started();
    let outcome = deliver(store, posting_client, cfg, &record).await?;
    match outcome {
        DeliveryOutcome::Completed => {
            store
                .mark_completed(&record.transaction_id, Utc::now())
                .await?;
            metrics.record_delivery(true);
            tracing::info!("transaction delivered");
        }
        DeliveryOutcome::Failed(error) => {
            store
                .mark_failed(&record.transaction_id, &error, Utc::now())
                .await?;
            metrics.record_delivery(false);
            tracing::error!(error = %error, "transaction failed permanently");
        }
    }
    Ok(())
}

/// The delivery state machine: probe for an existing record, post, and on a
/// failed post probe once more before counting the attempt, because the
/// downstream may have committed without us seeing the response. Retry
/// counts are durable, so a re-enqueued record resumes where it stopped.
#[tracing::instrument(skip_all, fields(transaction_id = %record.transaction_id))]
async fn deliver(
    store: &TransactionStore,
    posting_client: &PostingClient,
    cfg: &WorkerSettings,
    record: &StatusRecord,
) -> Result<DeliveryOutcome, anyhow::Error> {
    let id = &record.transaction_id;
    let mut attempt = record.retry_count;
    loop {
        // a prior worker may have posted and crashed before the status
        // write, or this id may be a resubmission past the dedup window
        if probe_exists(posting_client, id).await {
            return Ok(DeliveryOutcome::Completed);
        }

        let post_error = match posting_client.post(&record.payload).await {
            Ok(()) => return Ok(DeliveryOutcome::Completed),
            Err(e) => e,
        };

        tokio::time::sleep(RECHECK_DELAY).await;
        if probe_exists(posting_client, id).await {
            tracing::info!("post-write failure, record exists downstream");
            return Ok(DeliveryOutcome::Completed);
        }

        // confirmed pre-write failure
        attempt += 1;
        store
            .record_retry(id, attempt)
            .await
            .context("could not persist retry count")?;
        if attempt >= cfg.max_retries {
            return Ok(DeliveryOutcome::Failed(format!(
                "Max retries exceeded: {post_error}"
            )));
        }
        let backoff = cfg.retry_delay() * 2u32.pow((attempt as u32 - 1).min(16));
        tracing::warn!(
            attempt,
            backoff_seconds = backoff.as_secs(),
            error = %post_error,
            "pre-write failure, backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}

async fn probe_exists(
    posting_client: &PostingClient,
    transaction_id: &str,
) -> bool {
    match posting_client.get(transaction_id).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            tracing::warn!(
                error.cause_chain = ?e,
                "existence probe failed, assuming absent"
            );
            false
        }
    }
}
