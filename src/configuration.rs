use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::FileFormat;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;

/// Top-level settings, one section per component.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub posting_service: PostingServiceSettings,
    pub worker: WorkerSettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    // env vars arrive as strings; `deserialize_number_from_string` accepts both
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Soft intake latency budget. Exceeding it is logged, never enforced.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub response_timeout_ms: u64,
    /// Submissions are rejected with 503 once the queue reaches this depth.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub queue_max_size: i64,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    /// Connection to the server only; used by the test harness to create
    /// throwaway databases.
    pub fn connection_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
    }

    pub fn connection(&self) -> PgConnectOptions {
        self.connection_without_db().database(&self.database_name)
    }
}

/// The downstream posting service; only the base URL and the per-call I/O
/// timeout are configurable.
#[derive(Deserialize, Clone)]
pub struct PostingServiceSettings {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl PostingServiceSettings {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_milliseconds) }
}

#[derive(Deserialize, Clone)]
pub struct WorkerSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub concurrency: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: i32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_delay_seconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub status_ttl_hours: i64,
    /// Kept equal to `status_ttl_hours` by default. A shorter window lets a
    /// late resubmission enqueue the same id again; the worker's existence
    /// probe then short-circuits the duplicate downstream.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub dedup_ttl_hours: i64,
}

impl WorkerSettings {
    pub fn retry_delay(&self) -> Duration { Duration::from_secs(self.retry_delay_seconds) }

    pub fn status_ttl(&self) -> chrono::Duration { chrono::Duration::hours(self.status_ttl_hours) }

    pub fn dedup_ttl(&self) -> chrono::Duration { chrono::Duration::hours(self.dedup_ttl_hours) }
}

/// Load `configuration.yaml`, then apply `APP_`-prefixed environment
/// overrides (`__` separates section and field, e.g.
/// `APP_WORKER__CONCURRENCY=4`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = Config::builder()
        .add_source(config::File::new("configuration.yaml", FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize()
}
