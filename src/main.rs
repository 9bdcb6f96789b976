use std::fmt::Debug;
use std::fmt::Display;

use tokio::task::JoinError;
use transaction_relay::configuration::get_configuration;
use transaction_relay::metrics::RuntimeMetrics;
use transaction_relay::startup::Application;
use transaction_relay::store::run_sweeper_until_stopped;
use transaction_relay::telemetry::get_subscriber;
use transaction_relay::telemetry::init_subscriber;
use transaction_relay::worker::WorkerPool;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }
        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} failed"
            )
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "{name} task aborted"
            )
        }
    }
}

/// Initialise telemetry, load config, and run the three long-lived pieces:
/// the API, the delivery worker pool, and the expiry sweeper.
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("transaction-relay", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration()?;
    let metrics = RuntimeMetrics::new(cfg.worker.concurrency);

    let server = Application::build(cfg.clone(), metrics.clone())
        .await?
        .run_until_stopped();
    let worker_pool = WorkerPool::new(&cfg, metrics);
    let shutdown = worker_pool.shutdown_handle();
    let sweeper = run_sweeper_until_stopped(cfg);

    let server_task = tokio::spawn(server);
    let worker_task = tokio::spawn(worker_pool.run_until_stopped());
    let sweeper_task = tokio::spawn(sweeper);

    // ctrl-c drains the pool: workers finish their in-flight transaction and
    // exit on the next pop timeout; queued work survives in the store
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, draining workers");
            shutdown.stop();
        }
    });

    // returns when the first branch completes, cancelling the rest
    tokio::select! {
        o = server_task => report_exit("API", o),
        o = worker_task => report_exit("delivery worker pool", o),
        o = sweeper_task => report_exit("expiry sweeper", o),
    }

    Ok(())
}
