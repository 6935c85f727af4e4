//! NetSuite record client.
//!
//! One record-mutation call per invocation against the NetSuite REST record
//! endpoint. The create path POSTs the mapped record; the update path PATCHes
//! the known external id. Responses are classified into the shared error
//! taxonomy here so the orchestrator never sees raw HTTP.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::NetSuiteConfig;
use crate::mapper::MappedRecord;
use crate::remote::{RecordClient, RemoteError, UpsertOutcome};

const ITEM_RECORD_PATH: &str = "/services/rest/record/v1/inventoryitem";

/// Errors constructing the client, distinct from per-call failures.
#[derive(Debug, Error)]
pub enum NetSuiteClientError {
    #[error("missing NetSuite token")]
    MissingToken,
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct NetSuiteClient {
    http: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RecordResponse {
    id: String,
}

impl NetSuiteClient {
    pub fn new(cfg: &NetSuiteConfig) -> Result<Self, NetSuiteClientError> {
        let token = cfg
            .token
            .clone()
            .ok_or(NetSuiteClientError::MissingToken)?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.call_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    #[cfg(test)]
    fn with_base_url_for_tests(base_url: String) -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_millis(2000))
                .build()
                .expect("failed to build test HTTP client"),
            base_url,
            token: "test-token".to_string(),
        }
    }

    fn classify_transport(err: reqwest::Error) -> RemoteError {
        // Timeouts and connection failures are retryable by definition
        RemoteError::Transient {
            message: err.to_string(),
        }
    }

    async fn classify_response(
        response: reqwest::Response,
        expecting_body: bool,
        known_id: Option<&str>,
    ) -> Result<UpsertOutcome, RemoteError> {
        let status = response.status();

        if status.is_success() {
            if expecting_body {
                let body: RecordResponse =
                    response.json().await.map_err(|err| RemoteError::Transient {
                        message: format!("malformed success response: {}", err),
                    })?;
                return Ok(UpsertOutcome {
                    external_id: body.id,
                    created: true,
                });
            }
            return Ok(UpsertOutcome {
                // PATCH responses carry no body; the identity was already known
                external_id: known_id.unwrap_or_default().to_string(),
                created: false,
            });
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let message = response.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
                message,
                retry_after,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth { message },
            StatusCode::CONFLICT => RemoteError::Duplicate { message },
            s if s.is_client_error() => RemoteError::Validation { message },
            _ => RemoteError::Transient {
                message: format!("upstream returned {}: {}", status, message),
            },
        })
    }
}

#[async_trait]
impl RecordClient for NetSuiteClient {
    async fn upsert_record(
        &self,
        record: &MappedRecord,
        external_id: Option<&str>,
    ) -> Result<UpsertOutcome, RemoteError> {
        let result = match external_id {
            Some(id) => {
                let url = format!("{}{}/{}", self.base_url, ITEM_RECORD_PATH, id);
                self.http
                    .patch(&url)
                    .bearer_auth(&self.token)
                    .json(record)
                    .send()
                    .await
            }
            None => {
                let url = format!("{}{}", self.base_url, ITEM_RECORD_PATH);
                self.http
                    .post(&url)
                    .bearer_auth(&self.token)
                    .json(record)
                    .send()
                    .await
            }
        };

        match result {
            Ok(response) => {
                Self::classify_response(response, external_id.is_none(), external_id).await
            }
            Err(err) => Err(Self::classify_transport(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_record() -> MappedRecord {
        MappedRecord {
            item_id: "OPMS-42".to_string(),
            display_name: "Widget Deluxe".to_string(),
            vendor_id: "V-900".to_string(),
            vendor_name: "Acme Supply".to_string(),
            category_display: "Bulk/Hardware".to_string(),
            is_inactive: "F",
            is_taxable: "T",
            base_price: Some("19.50".to_string()),
            parent_item_id: None,
        }
    }

    #[tokio::test]
    async fn create_posts_record_and_returns_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ITEM_RECORD_PATH))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "9001" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let outcome = client.upsert_record(&sample_record(), None).await.unwrap();
        assert_eq!(outcome.external_id, "9001");
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn update_patches_known_identity() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/9001", ITEM_RECORD_PATH)))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let outcome = client
            .upsert_record(&sample_record(), Some("9001"))
            .await
            .unwrap();
        assert_eq!(outcome.external_id, "9001");
        assert!(!outcome.created);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "30")
                    .set_body_string("concurrency limit exceeded"),
            )
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let err = client
            .upsert_record(&sample_record(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::RateLimited {
                message: "concurrency limit exceeded".to_string(),
                retry_after: Some(30),
            }
        );
    }

    #[tokio::test]
    async fn validation_message_is_preserved_verbatim() {
        let server = MockServer::start().await;
        let body = r#"{"type":"error","detail":"Invalid value for field class"}"#;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(body))
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let err = client
            .upsert_record(&sample_record(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Validation {
                message: body.to_string()
            }
        );
    }

    #[tokio::test]
    async fn unauthorized_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let err = client
            .upsert_record(&sample_record(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Auth { .. }));
    }

    #[tokio::test]
    async fn conflict_is_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("record exists as 7777"))
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let err = client
            .upsert_record(&sample_record(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Duplicate {
                message: "record exists as 7777".to_string()
            }
        );
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        let err = client
            .upsert_record(&sample_record(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transient { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn request_body_uses_external_field_names() {
        let server = MockServer::start().await;
        let expected = serde_json::to_string(&sample_record()).unwrap();
        Mock::given(method("POST"))
            .and(body_json_string(&expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = NetSuiteClient::with_base_url_for_tests(server.uri());
        client.upsert_record(&sample_record(), None).await.unwrap();
    }
}
