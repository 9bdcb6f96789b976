pub mod configuration;
pub mod domain;
pub mod metrics;
pub mod posting_client;
pub mod routes;
pub mod startup;
pub mod store;
pub mod submission;
pub mod telemetry;
pub mod utils;
pub mod worker;
