//! Authenticated dashboard session.

use std::time::Duration;

use async_trait::async_trait;
use dashpull_core::{FetchResult, ReportDefinition};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{Credentials, EngineConfig};
use crate::error::EngineError;
use crate::fetcher;

/// Path that hands out the anti-forgery token.
pub const CSRF_TOKEN_PATH: &str = "/api/v1/security/csrf_token/";
/// Form login endpoint.
pub const LOGIN_PATH: &str = "/login/";
/// Header carrying the anti-forgery token on authenticated requests.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Operations the coordinator needs from a session.
///
/// The two `&mut self` steps run strictly before any report is dispatched;
/// after that the session is shared read-only by every report task.
#[async_trait]
pub trait ReportSession: Send + Sync + 'static {
    /// Obtain and store the anti-forgery token.
    async fn fetch_csrf_token(&mut self) -> Result<String, EngineError>;

    /// Submit credentials. Returns true iff the dashboard accepted them.
    async fn login(&mut self, credentials: &Credentials) -> Result<bool, EngineError>;

    /// Retrieve one report.
    async fn fetch(&self, report: &ReportDefinition) -> Result<FetchResult, EngineError>;
}

/// Builds the session for each run.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: ReportSession;

    fn create(&self, config: &EngineConfig) -> Result<Self::Session, EngineError>;
}

/// Produces [`AuthSession`]s against the configured dashboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSessionFactory;

impl SessionFactory for HttpSessionFactory {
    type Session = AuthSession;

    fn create(&self, config: &EngineConfig) -> Result<AuthSession, EngineError> {
        AuthSession::from_config(config)
    }
}

/// HTTP session against the dashboard: one client, one cookie jar, one token.
///
/// A fresh session is built for every run and never reused.
pub struct AuthSession {
    client: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
}

impl AuthSession {
    /// Create a session with a cookie-keeping client.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            csrf_token: None,
        })
    }

    /// Create a session from a configuration snapshot.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Dashboard origin without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The token, once fetched.
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Attach the session token to a request.
    pub(crate) fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.csrf_token {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }
}

#[async_trait]
impl ReportSession for AuthSession {
    async fn fetch_csrf_token(&mut self) -> Result<String, EngineError> {
        let url = format!("{}{}", self.base_url, CSRF_TOKEN_PATH);
        debug!(url = %url, "Fetching CSRF token");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Auth(format!("CSRF request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Auth(format!(
                "CSRF endpoint returned HTTP {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Auth(format!("CSRF response is not JSON: {e}")))?;

        let token = body
            .get("result")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Auth("CSRF response lacks 'result'".to_string()))?
            .to_string();

        info!("CSRF token acquired");
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<bool, EngineError> {
        let token = self.csrf_token.clone().ok_or_else(|| {
            EngineError::Precondition("CSRF token must be fetched before login".to_string())
        })?;

        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        debug!(url = %url, username = %credentials.username, "Submitting login");

        let form = [
            ("csrf_token", token.as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .header(CSRF_HEADER, &token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await
            .map_err(|e| EngineError::Auth(format!("login request failed: {e}")))?;

        let accepted = response.status() == StatusCode::OK;
        info!(status = %response.status(), accepted, "Login response");
        Ok(accepted)
    }

    async fn fetch(&self, report: &ReportDefinition) -> Result<FetchResult, EngineError> {
        fetcher::fetch_report(self, report).await
    }
}
