use std::time::Duration;

use once_cell::sync::Lazy;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use transaction_relay::configuration::get_configuration;
use transaction_relay::configuration::DatabaseSettings;
use transaction_relay::configuration::Settings;
use transaction_relay::metrics::RuntimeMetrics;
use transaction_relay::startup::get_connection_pool;
use transaction_relay::startup::Application;
use transaction_relay::telemetry::get_subscriber;
use transaction_relay::telemetry::init_subscriber;
use transaction_relay::worker::ShutdownHandle;
use transaction_relay::worker::WorkerPool;
use uuid::Uuid;
use wiremock::MockServer;

/// Init the tracing subscriber once only. Opt in to verbose logging with:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub struct TestApp {
    pub addr: String,
    pub pool: PgPool,
    /// Stands in for the downstream posting service.
    pub posting_server: MockServer,
    pub shutdown: ShutdownHandle,
}

impl TestApp {
    pub async fn post_transaction(
        &self,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/api/transactions", self.addr))
            .json(body)
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_status(
        &self,
        transaction_id: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}/api/transactions/{transaction_id}", self.addr))
            .send()
            .await
            .expect("execute request")
    }

    pub async fn get_health(&self) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}/api/health", self.addr))
            .send()
            .await
            .expect("execute request")
    }

    /// Poll the status endpoint until the record turns terminal. Panics if
    /// that does not happen inside `timeout`.
    pub async fn wait_for_terminal(
        &self,
        transaction_id: &str,
        timeout: Duration,
    ) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let resp = self.get_status(transaction_id).await;
            if resp.status().is_success() {
                let body: serde_json::Value = resp.json().await.unwrap();
                match body["status"].as_str() {
                    Some("completed") | Some("failed") => return body,
                    _ => {}
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "transaction {transaction_id} did not reach a terminal state within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn queue_depth(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM work_queue")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn dedup_marker_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM dedup_markers")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

/// Minimal valid submission body; tests override fields as needed.
pub fn transaction_body(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "amount": 100.0,
        "currency": "USD",
        "description": "test transaction",
    })
}

/// Create a db with a randomised name and run the migrations against it, so
/// every test is isolated.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running");

    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .unwrap();

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to migrate");
    pool
}

pub async fn spawn_app() -> TestApp { spawn_app_with(|_| {}).await }

/// Spawn the API plus a worker pool against a throwaway database and a
/// wiremock posting service. `customise` tweaks settings per test (retry
/// counts, queue capacity, ...).
pub async fn spawn_app_with(customise: impl FnOnce(&mut Settings)) -> TestApp {
    Lazy::force(&TRACING);

    let posting_server = MockServer::start().await;

    let cfg = {
        let mut cfg = get_configuration().unwrap();
        cfg.database.database_name = Uuid::new_v4().to_string();
        // port 0: the OS assigns a free one
        cfg.application.port = 0;
        cfg.posting_service.base_url = posting_server.uri();
        // keep the suite snappy
        cfg.worker.concurrency = 2;
        cfg.worker.retry_delay_seconds = 1;
        customise(&mut cfg);
        cfg
    };

    configure_database(&cfg.database).await;

    let metrics = RuntimeMetrics::new(cfg.worker.concurrency);
    let app = Application::build(cfg.clone(), metrics.clone())
        .await
        .unwrap();
    let addr = format!("http://127.0.0.1:{}", app.get_port());
    let pool = get_connection_pool(&cfg.database);
    tokio::spawn(app.run_until_stopped());

    let worker_pool = WorkerPool::new(&cfg, metrics);
    let shutdown = worker_pool.shutdown_handle();
    tokio::spawn(worker_pool.run_until_stopped());

    TestApp {
        addr,
        pool,
        posting_server,
        shutdown,
    }
}
