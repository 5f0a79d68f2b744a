//! Remote sync against a mock API.
//!
//! Run with: cargo test --features http

#![cfg(feature = "http")]

use run_metrics::config::SyncConfig;
use run_metrics::{EngineConfig, MemoryStore, RemoteClient, RunLog, StopReason, SyncDriver, SyncEvent, UnitSystem};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> SyncConfig {
    SyncConfig {
        base_url: server.uri(),
        per_page: 2,
        min_fetch_interval: Duration::from_millis(1),
        max_rate_limit_retries: 1,
        max_backoff: Duration::from_millis(5),
        ..SyncConfig::default()
    }
}

fn test_driver(server: &MockServer) -> (SyncDriver, UnboundedReceiver<SyncEvent>) {
    let config = test_config(server);
    let client = RemoteClient::new("test-access-token", &config).unwrap();
    let (tx, rx) = unbounded_channel();
    (SyncDriver::new(client, &config).with_events(tx), rx)
}

fn test_log() -> RunLog<MemoryStore> {
    RunLog::open(MemoryStore::new(), EngineConfig { units: UnitSystem::Metric, ..EngineConfig::default() }).unwrap()
}

fn activity(id: u64, kind: &str, day: u32) -> Value {
    json!({
        "id": id,
        "name": format!("Activity {}", id),
        "distance": 5000.0,
        "moving_time": 1500,
        "elapsed_time": 1620,
        "total_elevation_gain": 42.0,
        "start_date": format!("2024-06-{:02}T07:00:00Z", day),
        "type": kind,
        "sport_type": kind,
        "average_heartrate": 151.0
    })
}

/// Ten samples heading north, 30 s apart, keyed by type.
fn streams() -> Value {
    let latlng: Vec<[f64; 2]> = (0..10).map(|i| [40.0 + i as f64 * 0.001, -105.0]).collect();
    let time: Vec<f64> = (0..10).map(|i| i as f64 * 30.0).collect();
    let altitude: Vec<f64> = (0..10).map(|i| 1600.0 + i as f64).collect();
    let heartrate: Vec<f64> = (0..10).map(|i| 140.0 + i as f64 * 2.0).collect();
    json!({
        "latlng": { "data": latlng },
        "time": { "data": time },
        "altitude": { "data": altitude },
        "heartrate": { "data": heartrate }
    })
}

async fn mount_listing(server: &MockServer, pages: Vec<Vec<Value>>) {
    for (i, page) in pages.into_iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/athlete/activities"))
            .and(query_param("page", (i + 1).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(page)))
            .mount(server)
            .await;
    }
}

fn drain(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_sync_converts_runs_and_falls_back() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        vec![
            vec![activity(101, "Run", 3), activity(103, "Ride", 4)],
            vec![activity(102, "TrailRun", 5), activity(104, "Run", 6)],
            vec![],
        ],
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/activities/101/streams"))
        .and(header("Authorization", "Bearer test-access-token"))
        .and(query_param("key_by_type", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams()))
        .expect(1)
        .mount(&server)
        .await;

    // latlng and time disagree in length
    let mut mismatched = streams();
    mismatched["time"]["data"] = json!([0.0, 30.0]);
    Mock::given(method("GET"))
        .and(path("/activities/102/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mismatched))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/activities/104/streams"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (driver, mut rx) = test_driver(&server);
    let mut log = test_log();
    let summary = driver.run(&mut log).await.unwrap();

    assert_eq!(summary.listed, 4);
    assert_eq!(summary.runs, 3);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.fallbacks, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.stopped, None);
    assert!(summary.achievements_unlocked.contains(&"first_run"));

    let full = log.runs().iter().find(|r| r.remote_id == Some(101)).unwrap();
    assert_eq!(full.point_count(), 10);
    assert_eq!(full.source_file, "remote-101");
    assert_eq!(full.total_duration_seconds, 270.0);
    assert_eq!(full.average_heart_rate, Some(149.0));

    let coarse = log.runs().iter().find(|r| r.remote_id == Some(102)).unwrap();
    assert!(coarse.tracks.is_empty());
    assert_eq!(coarse.total_distance_meters, 5000.0);
    assert_eq!(coarse.total_duration_seconds, 1500.0);
    assert!(log.runs().iter().all(|r| r.remote_id != Some(103)));

    let events = drain(&mut rx);
    assert_eq!(events[0], SyncEvent::Listed { listed: 4, runs: 3, already_synced: 0 });
    assert_eq!(events[1], SyncEvent::Fetching { activity_id: 101, index: 1, total: 3 });
    assert_eq!(events[2], SyncEvent::Converted { activity_id: 101, coarse: false, inserted: true });
    assert_eq!(events[4], SyncEvent::Converted { activity_id: 102, coarse: true, inserted: true });
    assert!(matches!(events.last(), Some(SyncEvent::Finished(s)) if s.inserted == 3));

    // A second sync skips everything without fetching streams again
    let again = driver.run(&mut log).await.unwrap();
    assert_eq!(again.skipped, 3);
    assert_eq!(again.inserted, 0);
    assert_eq!(log.runs().len(), 3);
}

#[tokio::test]
async fn test_sync_recovers_from_single_rate_limit() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![vec![activity(201, "Run", 3)]]).await;

    Mock::given(method("GET"))
        .and(path("/activities/201/streams"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/activities/201/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams()))
        .mount(&server)
        .await;

    let (driver, mut rx) = test_driver(&server);
    let mut log = test_log();
    let summary = driver.run(&mut log).await.unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.fallbacks, 0);
    assert_eq!(summary.stopped, None);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, SyncEvent::RateLimited { attempt: 1, .. })));
}

#[tokio::test]
async fn test_persistent_rate_limit_stops_sync() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![vec![activity(301, "Run", 3), activity(302, "Run", 4)], vec![]]).await;

    Mock::given(method("GET"))
        .and(path("/activities/301/streams"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (driver, _rx) = test_driver(&server);
    let mut log = test_log();
    let summary = driver.run(&mut log).await.unwrap();

    assert_eq!(summary.stopped, Some(StopReason::RateLimited));
    assert_eq!(summary.inserted, 0);
    assert!(log.runs().is_empty());
}

#[tokio::test]
async fn test_cancelled_sync_inserts_nothing() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![vec![activity(401, "Run", 3)]]).await;

    Mock::given(method("GET"))
        .and(path("/activities/401/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams()))
        .expect(0)
        .mount(&server)
        .await;

    let (driver, mut rx) = test_driver(&server);
    driver.cancel_flag().cancel();
    let mut log = test_log();
    let summary = driver.run(&mut log).await.unwrap();

    assert_eq!(summary.stopped, Some(StopReason::Cancelled));
    assert_eq!(summary.runs, 1);
    assert_eq!(summary.inserted, 0);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], SyncEvent::Finished(_)));
}

#[tokio::test]
async fn test_listing_http_error_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/athlete/activities"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (driver, _rx) = test_driver(&server);
    let mut log = test_log();
    let err = driver.run(&mut log).await.unwrap_err();
    assert!(matches!(err, run_metrics::Error::Fetch(run_metrics::error::FetchError::Http { status: 401 })));
}
