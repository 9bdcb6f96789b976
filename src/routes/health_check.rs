use actix_web::web;
use actix_web::HttpResponse;
use serde::Serialize;

use crate::metrics::RuntimeMetrics;
use crate::metrics::WorkerStatus;
use crate::submission::SubmissionService;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    queue_depth: i64,
    error_rate: f64,
    uptime: f64,
    worker_status: WorkerStatus,
}

/// `GET /api/health`. The queue-depth read doubles as the store liveness
/// probe; external schedulers throttle on `queue_depth`.
pub async fn health_check(
    service: web::Data<SubmissionService>,
    metrics: web::Data<RuntimeMetrics>,
) -> HttpResponse {
    match service.queue_depth().await {
        Ok(queue_depth) => {
            let snapshot = metrics.snapshot();
            HttpResponse::Ok().json(HealthResponse {
                status: "healthy",
                queue_depth,
                error_rate: snapshot.error_rate,
                uptime: snapshot.uptime_seconds,
                worker_status: snapshot.worker_status,
            })
        }
        Err(e) => {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "health check could not reach the store"
            );
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }))
        }
    }
}
