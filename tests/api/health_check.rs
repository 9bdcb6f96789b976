use crate::helpers::spawn_app;

#[tokio::test]
async fn health_reports_queue_depth_and_worker_status() {
    let app = spawn_app().await;

    let resp = app.get_health().await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["error_rate"], 0.0);
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    // spawn_app runs two workers
    assert_eq!(body["worker_status"]["configured"], 2);
}

#[tokio::test]
async fn health_error_rate_counts_rejected_submissions() {
    let app = spawn_app().await;

    let resp = app
        .post_transaction(&serde_json::json!({
            "amount": -1,
            "currency": "USD",
            "description": "bad",
        }))
        .await;
    assert_eq!(resp.status().as_u16(), 422);

    let body: serde_json::Value = app.get_health().await.json().await.unwrap();
    assert_eq!(body["error_rate"], 100.0);
}
