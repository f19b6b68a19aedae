use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;

use tsdb_load::config::LoadConfig;
use tsdb_load::driver::{LoadDriver, Schedule};
use tsdb_load::read::{HttpQueryClient, QueryClientOptions};
use tsdb_load::rest::Status;
use tsdb_load::thresholds::{evaluate, sla_thresholds};
use tsdb_load::write::{NopRemoteWrite, SystemClock};

const VECTOR: &str = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;

fn config() -> LoadConfig {
    serde_json::from_value(serde_json::json!({
        "write_hostname": "write.example",
        "read_hostname": "read.example",
        "write_request_rate": 4,
        "write_series_per_request": 50,
        "read_series_per_request": 20,
        "read_request_rate": 2,
        "ha_replicas": 2,
        "duration_min": 1,
    }))
    .unwrap()
}

fn driver(server: &MockServer) -> Arc<LoadDriver> {
    let query_client = HttpQueryClient::new(QueryClientOptions {
        base_url: server.url("/prometheus/api/v1"),
        user_agent: "tsdb-load/test".to_string(),
        ..Default::default()
    })
    .unwrap();
    Arc::new(
        LoadDriver::new(
            &config(),
            Arc::new(NopRemoteWrite),
            Arc::new(query_client),
            Arc::new(SystemClock),
            42,
        )
        .unwrap()
        .with_schedules(
            Schedule::constant(40.0, Duration::from_secs(1)),
            Schedule::constant(20.0, Duration::from_secs(1)),
        ),
    )
}

#[tokio::test]
async fn healthy_backend_meets_thresholds() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/prometheus/api/v1/query");
            then.status(200)
                .header("content-type", "application/json")
                .body(VECTOR);
        })
        .await;
    let driver = driver(&server);
    let summary = driver.run().await;

    assert!(!summary.interrupted);
    assert!(summary.write.iterations > 0, "{summary:?}");
    assert!(summary.read.iterations > 0, "{summary:?}");
    assert_eq!(summary.write.iterations, summary.write.passed);
    assert_eq!(summary.read.iterations, summary.read.passed);
    assert_eq!(summary.read.iterations as usize, mock.hits_async().await);

    assert!(summary.dry_run);
    let results = evaluate(&sla_thresholds(), &summary);
    assert!(results.iter().all(|r| r.passed), "{results:?}");
    assert_eq!(2, results.iter().filter(|r| r.skipped).count());
}

#[tokio::test]
async fn failing_backend_fails_read_thresholds() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/prometheus/api/v1/query");
            then.status(503).body("overloaded");
        })
        .await;
    let driver = driver(&server);
    let summary = driver.run().await;

    assert!(summary.read.iterations > 0, "{summary:?}");
    assert_eq!(0, summary.read.passed);
    assert_eq!(summary.read.iterations, summary.read.failed);
    let results = evaluate(&sla_thresholds(), &summary);
    let failed = results.iter().filter(|r| !r.passed).count();
    assert_eq!(1, failed, "{results:?}");
}

#[tokio::test]
async fn status_endpoint_reports_the_run() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/prometheus/api/v1/query");
            then.status(200).body(VECTOR);
        })
        .await;
    let driver = driver(&server);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = tsdb_load::status_router(Arc::clone(&driver));
    tokio::spawn(async move { axum::serve(listener, app).await });

    let summary = driver.run().await;
    let client = reqwest::Client::new();
    let status: Status = client
        .get(format!("http://{addr}/"))
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary.run_id, status.run_id);
    assert!(status.finished);
    assert!(status.dry_run);
    assert_eq!(summary.write, status.write);
    assert_eq!(2, status.plan.ha_replicas);
    assert_eq!(8, status.plan.write_target_rate);

    let text = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.starts_with(&format!("tsdb-load run {}", summary.run_id)));
    assert!(text.contains("Finished after"));
}
