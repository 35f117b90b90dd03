//! External judgment service client
//!
//! The service receives the seed URL and the archive location and answers
//! with a free-text report and a boolean verdict.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Request body sent to the judgment service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentRequest {
    pub original_url: String,
    pub archive_location: String,
}

/// Response body expected from the judgment service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentResponse {
    pub completeness_report: String,
    pub is_complete: bool,
}

/// Errors from the judgment service
#[derive(Debug, Clone, Error)]
pub enum JudgmentError {
    #[error("Judgment service request failed: {0}")]
    Http(String),

    #[error("Judgment service returned HTTP {0}")]
    Status(u16),

    #[error("Judgment service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid judgment service response: {0}")]
    InvalidResponse(String),
}

/// A capability that judges whether an archive is complete
#[async_trait]
pub trait JudgmentService: Send + Sync {
    async fn judge(&self, request: &JudgmentRequest) -> Result<JudgmentResponse, JudgmentError>;
}

/// Judgment service reached by POSTing JSON to an endpoint
pub struct HttpJudgmentService {
    client: Client,
    endpoint: Url,
}

impl HttpJudgmentService {
    pub fn new(endpoint: Url, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl JudgmentService for HttpJudgmentService {
    async fn judge(&self, request: &JudgmentRequest) -> Result<JudgmentResponse, JudgmentError> {
        tracing::info!("Requesting completeness judgment from {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| JudgmentError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JudgmentError::Status(status.as_u16()));
        }

        response
            .json::<JudgmentResponse>()
            .await
            .map_err(|e| JudgmentError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> JudgmentRequest {
        JudgmentRequest {
            original_url: "https://example.com/".to_string(),
            archive_location: "/archives/example.com/20240101T000000Z".to_string(),
        }
    }

    async fn service(server: &MockServer) -> HttpJudgmentService {
        let endpoint = Url::parse(&format!("{}/assess", server.uri())).unwrap();
        HttpJudgmentService::new(endpoint, "web-archive-test").unwrap()
    }

    #[tokio::test]
    async fn test_posts_camel_case_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/assess"))
            .and(body_json(serde_json::json!({
                "originalUrl": "https://example.com/",
                "archiveLocation": "/archives/example.com/20240101T000000Z",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "completenessReport": "All pages present",
                "isComplete": true,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = service(&server).await.judge(&request()).await.unwrap();
        assert_eq!(response.completeness_report, "All pages present");
        assert!(response.is_complete);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = service(&server).await.judge(&request()).await.unwrap_err();
        assert!(matches!(err, JudgmentError::Status(503)));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = service(&server).await.judge(&request()).await.unwrap_err();
        assert!(matches!(err, JudgmentError::InvalidResponse(_)));
    }
}
