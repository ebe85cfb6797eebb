//! Report retrieval.

use dashpull_core::{FetchResult, ReportDefinition};
use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::session::AuthSession;

/// Fetch one report over an authenticated session.
///
/// Raw CSV sources are plain GETs with no token and no body. Everything else
/// is a token-bearing POST carrying the payload as JSON, or no body at all
/// when the definition has none.
pub async fn fetch_report(
    session: &AuthSession,
    report: &ReportDefinition,
) -> Result<FetchResult, EngineError> {
    let url = report.resolve_url(session.base_url());

    if report.is_raw_csv() {
        debug!(report = %report.name, url = %url, "GET raw CSV");
        let response = session
            .client()
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::fetch(&report.name, e))?;
        let response = ensure_success(&report.name, response)?;
        let content = response
            .text()
            .await
            .map_err(|e| EngineError::fetch(&report.name, e))?;
        return Ok(FetchResult::RawCsv { content });
    }

    debug!(report = %report.name, url = %url, "POST report payload");
    let mut request = session.authorized(session.client().post(&url));
    if let Some(payload) = &report.payload {
        request = request.json(payload);
    }
    let response = request
        .send()
        .await
        .map_err(|e| EngineError::fetch(&report.name, e))?;
    let response = ensure_success(&report.name, response)?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| EngineError::fetch(&report.name, format!("invalid JSON response: {e}")))?;

    Ok(FetchResult::StructuredJson { body })
}

fn ensure_success(
    report: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(EngineError::fetch(report, format!("HTTP {status}")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::{ReportSession, CSRF_HEADER, CSRF_TOKEN_PATH};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    async fn logged_in(server: &MockServer) -> AuthSession {
        Mock::given(method("GET"))
            .and(path(CSRF_TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "tok"})))
            .mount(server)
            .await;
        let mut session = AuthSession::new(&server.uri(), Duration::from_secs(5)).unwrap();
        session.fetch_csrf_token().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_json_report_posts_payload_with_token() {
        let server = MockServer::start().await;
        let session = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chart/data"))
            .and(header(CSRF_HEADER, "tok"))
            .and(body_json(json!({"queries": [1]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
            .expect(1)
            .mount(&server)
            .await;

        let report = ReportDefinition::new("sales", "/api/v1/chart/data", Some(json!({"queries": [1]})));
        let result = fetch_report(&session, &report).await.unwrap();

        assert_eq!(
            result,
            FetchResult::StructuredJson {
                body: json!({"result": []})
            }
        );
    }

    #[tokio::test]
    async fn test_missing_payload_posts_empty_body() {
        let server = MockServer::start().await;
        let session = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chart/data"))
            .and(header(CSRF_HEADER, "tok"))
            .and(|req: &Request| {
                req.body.is_empty() && !req.headers.contains_key(reqwest::header::CONTENT_TYPE)
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
            .expect(1)
            .mount(&server)
            .await;

        let report = ReportDefinition::new("bare", "/api/v1/chart/data", None);
        let result = fetch_report(&session, &report).await.unwrap();

        assert_eq!(result.kind(), "json");
    }

    #[tokio::test]
    async fn test_raw_csv_skips_token_and_payload() {
        let server = MockServer::start().await;
        let session = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/exports/stock.csv"))
            .and(|req: &Request| !req.headers.contains_key(CSRF_HEADER) && req.body.is_empty())
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .expect(1)
            .mount(&server)
            .await;

        let report = ReportDefinition::new("stock", "/exports/stock.csv", Some(json!({"ignored": true})));
        let result = fetch_report(&session, &report).await.unwrap();

        assert_eq!(
            result,
            FetchResult::RawCsv {
                content: "a,b\n1,2\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        let session = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let report = ReportDefinition::new("broken", "/api/broken", None);
        let err = fetch_report(&session, &report).await.unwrap_err();

        match err {
            EngineError::Fetch { report, reason } => {
                assert_eq!(report, "broken");
                assert!(reason.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_fetch_error() {
        let server = MockServer::start().await;
        let session = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let report = ReportDefinition::new("html", "/api/html", None);
        let err = fetch_report(&session, &report).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch { .. }));
    }
}
