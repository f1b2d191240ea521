//! Shared HTTP plumbing: auth header conventions and status mapping.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::{Error, ProviderError};
use crate::Result;

use super::{ProviderKind, RetryPolicy};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// How credentials are attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `x-api-key` plus `anthropic-version`.
    ApiKeyHeader,
    /// `Authorization: Bearer <key>`.
    Bearer,
}

/// JSON-over-HTTP client bound to one provider and base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    provider: ProviderKind,
    base_url: String,
    api_key: String,
    auth: AuthStyle,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        provider: ProviderKind,
        base_url: &str,
        api_key: &str,
        auth: AuthStyle,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            auth,
            retry,
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// POST `body` to `{base_url}{path}`, retrying per policy.
    pub async fn post_json(&self, path: &str, body: &Value) -> std::result::Result<Value, ProviderError> {
        self.retry
            .run(self.provider, || self.post_once(path, body))
            .await
    }

    /// POST and decode the body into `T`, retrying per policy.
    ///
    /// A 200 whose body does not have the expected shape counts as an
    /// upstream failure and is retried like one.
    pub async fn post_decoded<T>(&self, path: &str, body: &Value) -> std::result::Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let provider = self.provider;
        self.retry
            .run(provider, || async move {
                let value = self.post_once(path, body).await?;
                serde_json::from_value(value).map_err(|e| ProviderError::Upstream {
                    provider,
                    status: None,
                    message: format!("unexpected {path} response: {e}"),
                })
            })
            .await
    }

    /// Single attempt, no retries.
    pub async fn post_once(&self, path: &str, body: &Value) -> std::result::Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        trace!(provider = %self.provider, url = %url, "sending request");

        let request = self.client.post(&url).json(body);
        let request = match self.auth {
            AuthStyle::ApiKeyHeader => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
        };

        let response = request.send().await.map_err(|e| ProviderError::Transport {
            provider: self.provider,
            message: if e.is_timeout() {
                format!("request to {url} timed out")
            } else {
                e.to_string()
            },
        })?;

        if !response.status().is_success() {
            return Err(error_from_response(self.provider, response).await);
        }

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ProviderError::Transport {
            provider: self.provider,
            message: format!("failed to read response body: {e}"),
        })?;

        serde_json::from_str(&text).map_err(|e| ProviderError::Upstream {
            provider: self.provider,
            status: Some(status),
            message: format!("malformed response body: {e}"),
        })
    }
}

/// Map a non-success HTTP response onto the provider error taxonomy.
pub(crate) async fn error_from_response(provider: ProviderKind, response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);
    let body = response.text().await.unwrap_or_default();
    let message = vendor_reason(&body).unwrap_or_else(|| format!("HTTP {status}"));

    debug!(provider = %provider, status = %status, "received error response");
    classify(provider, status, message, retry_after)
}

pub(crate) fn classify(
    provider: ProviderKind,
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth { provider, message },
        402 | 429 => ProviderError::Quota {
            provider,
            message,
            retry_after,
        },
        408 => ProviderError::Transport { provider, message },
        400..=499 => {
            error!(provider = %provider, status = status.as_u16(), reason = %message, "provider rejected request");
            ProviderError::BadRequest { provider, message }
        }
        code => ProviderError::Upstream {
            provider,
            status: Some(code),
            message,
        },
    }
}

/// Pull the human-readable reason out of a vendor error body.
fn vendor_reason(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let found = [
            value.pointer("/error/message"),
            value.pointer("/message"),
            value.pointer("/msg"),
            value.pointer("/error"),
        ]
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string));
        if found.is_some() {
            return found;
        }
    }

    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, auth: AuthStyle) -> ApiClient {
        let retry = RetryPolicy {
            enabled: true,
            max_retries: 2,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        };
        ApiClient::new(ProviderKind::OpenAiCompatible, &server.uri(), "test_key", auth, retry).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server, AuthStyle::Bearer)
            .post_json("/chat/completions", &json!({}))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_api_key_header_convention() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, AuthStyle::ApiKeyHeader)
            .post_json("/v1/messages", &json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "invalid key"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "unknown field"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/quota"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let api = client(&server, AuthStyle::Bearer);
        let err = api.post_json("/auth", &json!({})).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Auth {
                provider: ProviderKind::OpenAiCompatible,
                message: "invalid key".into()
            }
        );

        let err = api.post_json("/bad", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::BadRequest { ref message, .. } if message == "unknown field"));

        let err = api.post_json("/quota", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Quota { retry_after: Some(d), .. } if d == Duration::ZERO));

        let err = api.post_json("/down", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { status: Some(503), ref message, .. } if message == "overloaded"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let err = client(&server, AuthStyle::Bearer)
            .post_once("/x", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let api = ApiClient::new(
            ProviderKind::AnthropicCompatible,
            "http://127.0.0.1:9",
            "k",
            AuthStyle::ApiKeyHeader,
            RetryPolicy::disabled(),
        )
        .unwrap();
        let err = api.post_json("/v1/messages", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }
}
