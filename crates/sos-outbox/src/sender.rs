//! HTTP implementation of the remote session service.

use crate::{RemoteError, RemoteResult, RemoteService};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sos_database::{LocationReading, ReportPayload, Severity};
use std::time::Duration;
use tracing::debug;

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Base URL for the session API.
    pub api_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.rider-sos.app".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    note: &'a str,
}

#[derive(Debug, Serialize)]
struct LocationSampleRequest {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
struct ReportRequest<'a> {
    category: &'a str,
    severity: Severity,
    description: &'a str,
    location: &'a LocationReading,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: i64,
}

/// Remote service over JSON/HTTP with a bearer token.
pub struct HttpRemoteService {
    config: SenderConfig,
    client: Client,
    auth_token: RwLock<Option<String>>,
}

impl HttpRemoteService {
    pub fn new(config: SenderConfig, auth_token: Option<String>) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            auth_token: RwLock::new(auth_token),
        })
    }

    /// Replace the access token. `None` signs the client out.
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token.read().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// POST `body` to `path` and return the successful response.
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<reqwest::Response> {
        let token = self
            .auth_token
            .read()
            .clone()
            .ok_or_else(|| RemoteError::AuthorizationRequired("no access token".to_string()))?;

        let url = self.url(path);
        debug!(url = %url, "Sending request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), &body));
        }

        Ok(response)
    }

    async fn post_for_id<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<i64> {
        let response = self.post(path, body).await?;
        let parsed: IdResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn create_session(&self, note: &str) -> RemoteResult<i64> {
        self.post_for_id("/sessions", &CreateSessionRequest { note })
            .await
    }

    async fn close_session(&self, session_id: i64) -> RemoteResult<()> {
        self.post(&format!("/sessions/{session_id}/close"), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn append_location_sample(
        &self,
        session_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> RemoteResult<()> {
        self.post(
            &format!("/sessions/{session_id}/samples"),
            &LocationSampleRequest {
                latitude,
                longitude,
            },
        )
        .await?;
        Ok(())
    }

    async fn submit_report(&self, report: &ReportPayload) -> RemoteResult<i64> {
        let request = ReportRequest {
            category: &report.category,
            severity: report.severity,
            description: &report.description,
            location: &report.location,
        };
        self.post_for_id("/reports", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureClass;

    #[test]
    fn test_sender_config_default() {
        let config = SenderConfig::default();
        assert_eq!(config.api_url, "https://api.rider-sos.app");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let sender = HttpRemoteService::new(
            SenderConfig {
                api_url: "https://api.example.test/".to_string(),
                timeout_secs: 5,
            },
            None,
        )
        .unwrap();
        assert_eq!(sender.url("/sessions"), "https://api.example.test/sessions");
    }

    #[tokio::test]
    async fn test_missing_token_requires_authorization() {
        // Port 9 is discard; no request is made without a token anyway.
        let sender = HttpRemoteService::new(
            SenderConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
            },
            None,
        )
        .unwrap();
        assert!(!sender.has_auth_token());

        let err = sender.create_session("help").await.unwrap_err();
        assert_eq!(err.class(), FailureClass::AuthorizationRequired);
    }

    #[test]
    fn test_auth_token_update() {
        let sender = HttpRemoteService::new(SenderConfig::default(), None).unwrap();
        sender.set_auth_token(Some("token".to_string()));
        assert!(sender.has_auth_token());
        sender.set_auth_token(None);
        assert!(!sender.has_auth_token());
    }

    #[test]
    fn test_report_request_shape() {
        let location = LocationReading {
            latitude: 1.5,
            longitude: 2.5,
            recorded_at: chrono::DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        };
        let request = ReportRequest {
            category: "pothole",
            severity: Severity::High,
            description: "deep",
            location: &location,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["location"]["latitude"], 1.5);
        assert_eq!(json["category"], "pothole");
    }
}
