use std::time::Duration;

use wiremock::matchers::body_partial_json;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::path_regex;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;
use crate::helpers::spawn_app_with;
use crate::helpers::transaction_body;

const TERMINAL_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn accepted_transaction_is_delivered_downstream() {
    let app = spawn_app().await;
    Mock::given(method("GET"))
        .and(path_regex("^/transactions/.+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&app.posting_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        // the wire body carries the contract fields
        .and(body_partial_json(serde_json::json!({
            "id": "t1",
            "amount": 100.0,
            "currency": "USD",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.posting_server)
        .await;

    app.post_transaction(&transaction_body("t1")).await;

    let terminal = app.wait_for_terminal("t1", TERMINAL_TIMEOUT).await;
    assert_eq!(terminal["status"], "completed");
    assert_eq!(terminal["retryCount"], 0);
    assert!(terminal["completedAt"].is_string());
    assert!(terminal["error"].is_null());
}

#[tokio::test]
async fn existing_downstream_record_short_circuits_delivery() {
    let app = spawn_app().await;
    // the downstream already holds the record (e.g. a prior worker posted
    // and crashed before updating status)
    Mock::given(method("GET"))
        .and(path("/transactions/t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "t2",
            "amount": 100.0,
        })))
        .mount(&app.posting_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.posting_server)
        .await;

    app.post_transaction(&transaction_body("t2")).await;

    let terminal = app.wait_for_terminal("t2", TERMINAL_TIMEOUT).await;
    assert_eq!(terminal["status"], "completed");
}

#[tokio::test]
async fn post_write_failure_is_resolved_by_the_recheck_probe() {
    let app = spawn_app().await;
    // first existence check: absent. mounted first, consumed first.
    Mock::given(method("GET"))
        .and(path("/transactions/t3"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&app.posting_server)
        .await;
    // recheck after the failed POST: the write did commit
    Mock::given(method("GET"))
        .and(path("/transactions/t3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "t3",
        })))
        .mount(&app.posting_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.posting_server)
        .await;

    app.post_transaction(&transaction_body("t3")).await;

    let terminal = app.wait_for_terminal("t3", TERMINAL_TIMEOUT).await;
    assert_eq!(terminal["status"], "completed");
    // the probe resolved the ambiguity; no retry was consumed
    assert_eq!(terminal["retryCount"], 0);
}

#[tokio::test]
async fn persistent_downstream_failure_marks_the_transaction_failed() {
    let app = spawn_app_with(|cfg| {
        cfg.worker.max_retries = 1;
    })
    .await;
    Mock::given(method("GET"))
        .and(path_regex("^/transactions/.+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&app.posting_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.posting_server)
        .await;

    app.post_transaction(&transaction_body("t4")).await;

    let terminal = app.wait_for_terminal("t4", TERMINAL_TIMEOUT).await;
    assert_eq!(terminal["status"], "failed");
    assert_eq!(terminal["retryCount"], 1);
    let error = terminal["error"].as_str().unwrap();
    assert!(
        error.contains("Max retries exceeded"),
        "unexpected error: {error}"
    );
}

#[tokio::test]
async fn the_pool_drains_many_distinct_transactions() {
    let app = spawn_app().await;
    let count = 20;
    Mock::given(method("GET"))
        .and(path_regex("^/transactions/.+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&app.posting_server)
        .await;
    // one create per distinct id, no duplicates
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(count)
        .mount(&app.posting_server)
        .await;

    for i in 0..count {
        let resp = app.post_transaction(&transaction_body(&format!("bulk-{i}"))).await;
        assert!(resp.status().is_success());
    }

    for i in 0..count {
        let terminal = app
            .wait_for_terminal(&format!("bulk-{i}"), TERMINAL_TIMEOUT)
            .await;
        assert_eq!(terminal["status"], "completed");
    }
    assert_eq!(app.queue_depth().await, 0);
}

#[tokio::test]
async fn stopped_workers_leave_queued_work_in_the_store() {
    let app = spawn_app().await;
    Mock::given(method("GET"))
        .and(path_regex("^/transactions/.+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&app.posting_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.posting_server)
        .await;

    // drain the pool, give the loops a pop-timeout's worth of time to exit
    app.shutdown.stop();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let resp = app.post_transaction(&transaction_body("t5")).await;
    assert!(resp.status().is_success());
    tokio::time::sleep(Duration::from_secs(2)).await;

    // nobody is popping: the entry stays durable and the record pending
    assert_eq!(app.queue_depth().await, 1);
    let status: serde_json::Value = app.get_status("t5").await.json().await.unwrap();
    assert_eq!(status["status"], "pending");
}
