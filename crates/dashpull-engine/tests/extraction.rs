//! End-to-end extraction against a mock dashboard.

use std::sync::Arc;

use dashpull_core::{EngineEvent, ReportSet};
use dashpull_engine::{
    Credentials, Engine, EngineConfig, JsonReportStore, MemorySink, StaticConfig, Trigger,
    TriggerOutcome,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RAW_CSV: &str = "id,total\n1,10\n2,20\n";

async fn dashboard(login_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/security/csrf_token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "tok-1" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/"))
        .and(header("X-CSRFToken", "tok-1"))
        .and(body_string_contains("username=analyst"))
        .respond_with(ResponseTemplate::new(login_status))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exports/daily.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RAW_CSV))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chart/data"))
        .and(header("X-CSRFToken", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{ "data": [
                { "region": "north", "sales": 5 },
                { "region": "south", "sales": 7 }
            ]}]
        })))
        .mount(&server)
        .await;
    server
}

fn write_store(dir: &std::path::Path, server: &MockServer) -> std::path::PathBuf {
    let store = dir.join("request.json");
    let body = json!({
        "A": { "request_url": format!("{}/exports/daily.csv", server.uri()), "payload": null },
        "B": { "request_url": "/api/v1/chart/data", "payload": { "queries": [{ "row_limit": 10 }] } }
    });
    std::fs::write(&store, serde_json::to_vec(&body).unwrap()).unwrap();
    store
}

fn config(server: &MockServer, output_dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        base_url: server.uri(),
        output_dir: output_dir.to_path_buf(),
        max_workers: 2,
        credentials: Credentials::new("analyst", "secret"),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_extracts_raw_and_tabular_reports() {
    let server = dashboard(200).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let store = write_store(dir.path(), &server);

    let sink = MemorySink::new();
    let engine = Engine::new(
        Arc::new(StaticConfig(config(&server, &out))),
        Arc::new(JsonReportStore::new(store)),
        Arc::new(sink.clone()),
    );

    let TriggerOutcome::Completed(summary) = engine.trigger(Trigger::Manual).await else {
        panic!("run did not start");
    };
    assert_eq!(summary.fatal, None);
    assert_eq!((summary.completed, summary.total), (2, 2));
    assert_eq!(summary.succeeded(), 2);

    let raw = std::fs::read_to_string(out.join("A.csv")).unwrap();
    assert_eq!(raw, RAW_CSV);
    let table = std::fs::read_to_string(out.join("B.csv")).unwrap();
    assert_eq!(table, "region,sales\nnorth,5\nsouth,7\n");

    let events = sink.events();
    let finished = events.iter().filter(|e| e.is_run_finished()).count();
    assert_eq!(finished, 1);
    let last_progress = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .last();
    assert_eq!(last_progress, Some(100));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_rejected_login_aborts_without_files() {
    let server = dashboard(401).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let store = write_store(dir.path(), &server);

    let sink = MemorySink::new();
    let engine = Engine::new(
        Arc::new(StaticConfig(config(&server, &out))),
        Arc::new(JsonReportStore::new(store)),
        Arc::new(sink.clone()),
    );

    let TriggerOutcome::Completed(summary) = engine.trigger(Trigger::Manual).await else {
        panic!("run did not start");
    };
    assert!(summary.is_fatal());
    assert_eq!(summary.completed, 0);
    assert!(!out.join("A.csv").exists());
    assert!(!out.join("B.csv").exists());
    assert_eq!(sink.events().iter().filter(|e| e.is_run_finished()).count(), 1);
}

#[tokio::test]
async fn test_failed_report_does_not_stop_the_others() {
    let server = dashboard(200).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let reports: ReportSet = ReportSet::from_store_json(
        &json!({
            "ok": { "request_url": format!("{}/exports/daily.csv", server.uri()), "payload": null },
            "missing": { "request_url": format!("{}/exports/gone.csv", server.uri()), "payload": null }
        })
        .to_string(),
    )
    .unwrap();

    let engine = Engine::new(
        Arc::new(StaticConfig(config(&server, &out))),
        Arc::new(reports),
        Arc::new(MemorySink::new()),
    );

    let TriggerOutcome::Completed(summary) = engine.trigger(Trigger::Manual).await else {
        panic!("run did not start");
    };
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.succeeded(), 1);
    let failed: Vec<_> = summary.outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].report_name, "missing");
    assert!(out.join("ok.csv").exists());
}
