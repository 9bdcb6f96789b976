use std::net::TcpListener;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::metrics::RuntimeMetrics;
use crate::routes::get_transaction_status;
use crate::routes::health_check;
use crate::routes::submit_transaction;
use crate::store::TransactionStore;
use crate::submission::SubmissionService;

/// Wrapper for actix's `Server` with access to the bound port (the OS picks
/// one when the configured port is 0, as the test harness does).
pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(
        cfg: Settings,
        metrics: RuntimeMetrics,
    ) -> Result<Self, anyhow::Error> {
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();

        let pool = get_connection_pool(&cfg.database);
        let service = SubmissionService::new(
            TransactionStore::new(pool),
            cfg.application.queue_max_size,
            cfg.worker.status_ttl(),
            cfg.worker.dedup_ttl(),
        );
        let budget = IntakeBudget(Duration::from_millis(cfg.application.response_timeout_ms));

        let server = run(listener, service, metrics, budget)?;
        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// Consumes `self`; either `.await` it as the last call or hand it to
    /// `tokio::spawn`.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> { self.server.await }
}

/// `connect_lazy_with` defers the first connection until the pool is used,
/// so building the app does not require a reachable database.
pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// Wrapper for the intake latency budget (a raw `Duration` in `Data` would
/// collide with any other `Duration`).
#[derive(Clone, Copy)]
pub struct IntakeBudget(pub Duration);

/// Declares all API endpoints. The server only listens; binding is the
/// caller's job.
pub fn run(
    listener: TcpListener,
    service: SubmissionService,
    metrics: RuntimeMetrics,
    budget: IntakeBudget,
) -> Result<Server, anyhow::Error> {
    let service = Data::new(service);
    let metrics = Data::new(metrics);

    // the closure runs once per actix worker; everything it captures must be
    // cloneable
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/api/health", web::get().to(health_check))
            .route("/api/transactions", web::post().to(submit_transaction))
            .route(
                "/api/transactions/{transaction_id}",
                web::get().to(get_transaction_status),
            )
            .app_data(service.clone())
            .app_data(metrics.clone())
            .app_data(Data::new(budget))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
