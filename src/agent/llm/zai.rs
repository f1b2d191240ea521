//! Z.AI (GLM Coding Plan) client.
//!
//! Besides chat, Z.AI exposes two non-chat endpoints used by the web tools:
//! `/web_search` and `/reader`. Every constructor here goes through the
//! [`CreditGate`], so a disabled gate fails before any network I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, ProviderError};
use crate::gate::CreditGate;
use crate::Result;

use super::chat::{Dialect, HttpChatClient};
use super::http::{ApiClient, AuthStyle};
use super::{GenerationParams, LlmClient, ProviderKind, RetryPolicy};

pub const ZAI_WEB_API_BASE: &str = "https://api.z.ai/api/paas/v4";
pub const DEFAULT_SEARCH_ENGINE: &str = "search-prime";

const FALLBACK_RESULT_COUNT: u8 = 5;

/// Which chat endpoint the coding plan is reached through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZaiChatApi {
    #[default]
    Anthropic,
    OpenAi,
}

/// Build the Z.AI chat client. Refused unless `tools.enable_zai_llm` is set.
pub fn chat_client(
    chat_api: ZaiChatApi,
    api_base: &str,
    api_key: &str,
    params: GenerationParams,
    retry: RetryPolicy,
    gate: &CreditGate,
) -> Result<HttpChatClient> {
    gate.require_llm()?;
    let dialect = match chat_api {
        ZaiChatApi::Anthropic => Dialect::Anthropic,
        ZaiChatApi::OpenAi => Dialect::OpenAi,
    };
    let client = HttpChatClient::new(ProviderKind::ZaiCodingPlan, dialect, api_base, api_key, params, retry)?;
    info!(model = %client.model(), base_url = %client.base_url(), "Initialized Z.ai chat client");
    Ok(client)
}

/// Search recency window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recency {
    #[default]
    NoLimit,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Recency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recency::NoLimit => "noLimit",
            Recency::OneDay => "oneDay",
            Recency::OneWeek => "oneWeek",
            Recency::OneMonth => "oneMonth",
        }
    }
}

impl FromStr for Recency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "noLimit" => Ok(Recency::NoLimit),
            "oneDay" => Ok(Recency::OneDay),
            "oneWeek" => Ok(Recency::OneWeek),
            "oneMonth" => Ok(Recency::OneMonth),
            other => Err(Error::Tool(format!(
                "Invalid recency '{other}': expected one of noLimit, oneDay, oneWeek, oneMonth"
            ))),
        }
    }
}

/// Body format requested from `/reader`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFormat {
    #[default]
    Markdown,
    Html,
    Text,
}

impl ReadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFormat::Markdown => "markdown",
            ReadFormat::Html => "html",
            ReadFormat::Text => "text",
        }
    }
}

impl FromStr for ReadFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "markdown" => Ok(ReadFormat::Markdown),
            "html" => Ok(ReadFormat::Html),
            "text" => Ok(ReadFormat::Text),
            other => Err(Error::Tool(format!(
                "Invalid format '{other}': expected one of markdown, html, text"
            ))),
        }
    }
}

/// Where a web-read body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Reader,
    WebSearchFallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Reader => "reader",
            ExtractionMethod::WebSearchFallback => "web_search_fallback",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchRequest {
    pub query: String,
    pub count: u8,
    pub engine: String,
    pub recency: Recency,
    pub domain_filter: Option<String>,
}

/// One search hit, in provider relevance order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultBlock {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub citations_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebReadResult {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub format: ReadFormat,
    pub word_count: usize,
    pub method: ExtractionMethod,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search_result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    link: String,
}

#[derive(Debug, Deserialize)]
struct ReaderResponse {
    reader_result: ReaderResult,
}

#[derive(Debug, Deserialize)]
struct ReaderResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

/// Client for the Z.AI web endpoints.
#[derive(Clone)]
pub struct ZaiClient {
    api: ApiClient,
    search_engine: String,
}

impl ZaiClient {
    /// Refused unless `tools.enable_zai_search` is set.
    pub fn new(
        api_key: &str,
        web_api_base: &str,
        search_engine: &str,
        retry: RetryPolicy,
        gate: &CreditGate,
    ) -> Result<Self> {
        gate.require_search()?;
        let base = if web_api_base.trim().is_empty() {
            ZAI_WEB_API_BASE
        } else {
            web_api_base.trim()
        };
        let api = ApiClient::new(ProviderKind::ZaiCodingPlan, base, api_key, AuthStyle::Bearer, retry)?;
        let search_engine = if search_engine.is_empty() {
            DEFAULT_SEARCH_ENGINE.to_string()
        } else {
            search_engine.to_string()
        };
        Ok(Self { api, search_engine })
    }

    pub fn from_config(config: &Config, gate: &CreditGate) -> Result<Self> {
        gate.require_search()?;
        Self::new(
            &config.zai_api_key(),
            &config.zai.web_api_base,
            &config.zai.search_engine,
            RetryPolicy::from_config(&config.retry),
            gate,
        )
    }

    pub fn search_engine(&self) -> &str {
        &self.search_engine
    }

    pub async fn web_search(
        &self,
        request: &WebSearchRequest,
    ) -> std::result::Result<Vec<SearchResultBlock>, ProviderError> {
        let mut body = json!({
            "search_engine": request.engine,
            "search_query": request.query,
            "count": request.count,
            "search_recency_filter": request.recency.as_str(),
        });
        if let Some(domain) = request.domain_filter.as_deref().filter(|d| !d.is_empty()) {
            body["search_domain_filter"] = json!(domain);
        }

        let response: SearchResponse = self.api.post_decoded("/web_search", &body).await?;

        Ok(response
            .search_result
            .into_iter()
            .map(|hit| SearchResultBlock {
                url: hit.link,
                title: hit.title,
                snippet: hit.content,
                citations_enabled: true,
            })
            .collect())
    }

    /// Read a page through `/reader`, falling back to a search summary when
    /// the reader fails. If the fallback fails too, the reader error is returned.
    pub async fn web_read(
        &self,
        url: &str,
        format: ReadFormat,
        include_images: bool,
    ) -> std::result::Result<WebReadResult, ProviderError> {
        match self.read_direct(url, format, include_images).await {
            Ok(result) => Ok(result),
            Err(reader_error) => {
                warn!(url = %url, error = %reader_error, "reader failed, falling back to web search");
                self.read_via_search(url, format).await.map_err(|search_error| {
                    warn!(url = %url, error = %search_error, "web search fallback failed");
                    reader_error
                })
            }
        }
    }

    async fn read_direct(
        &self,
        url: &str,
        format: ReadFormat,
        include_images: bool,
    ) -> std::result::Result<WebReadResult, ProviderError> {
        let body = json!({
            "url": url,
            "return_format": format.as_str(),
            "retain_images": include_images,
        });
        let response: ReaderResponse = self.api.post_decoded("/reader", &body).await?;
        let page = response.reader_result;

        Ok(WebReadResult {
            url: if page.url.is_empty() { url.to_string() } else { page.url },
            title: page.title,
            description: page.description,
            word_count: word_count(&page.content),
            content: page.content,
            format,
            method: ExtractionMethod::Reader,
        })
    }

    async fn read_via_search(&self, url: &str, format: ReadFormat) -> std::result::Result<WebReadResult, ProviderError> {
        let request = WebSearchRequest {
            query: format!("content summary {url}"),
            count: FALLBACK_RESULT_COUNT,
            engine: self.search_engine.clone(),
            recency: Recency::NoLimit,
            domain_filter: None,
        };
        let results = self.web_search(&request).await?;

        let content = results
            .iter()
            .map(|r| format!("## {}\n{}\n\n{}", r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(WebReadResult {
            url: url.to_string(),
            title: format!("Search summary for {url}"),
            description: format!("{} search result(s); the page itself could not be read", results.len()),
            word_count: word_count(&content),
            content,
            format,
            method: ExtractionMethod::WebSearchFallback,
        })
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ZaiClient {
        let retry = RetryPolicy {
            enabled: true,
            max_retries: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        };
        ZaiClient::new("zai-key", &server.uri(), "", retry, &CreditGate::new(true, false)).unwrap()
    }

    fn search_body(n: usize) -> Value {
        let hits: Vec<Value> = (1..=n)
            .map(|i| {
                json!({
                    "title": format!("Result {i}"),
                    "content": format!("snippet {i}"),
                    "link": format!("https://example.com/{i}"),
                })
            })
            .collect();
        json!({"id": "s1", "search_result": hits})
    }

    #[test]
    fn test_gate_refuses_before_network() {
        let err = ZaiClient::new("k", "", "", RetryPolicy::disabled(), &CreditGate::disabled())
            .err()
            .expect("gate must refuse");
        assert!(err.to_string().contains("tools.enable_zai_search"));

        let err = chat_client(
            ZaiChatApi::Anthropic,
            "",
            "k",
            GenerationParams::new("glm-4.6"),
            RetryPolicy::disabled(),
            &CreditGate::new(true, false),
        )
        .err()
        .expect("llm flag is separate");
        assert!(err.to_string().contains("tools.enable_zai_llm"));
    }

    #[test]
    fn test_recency_and_format_parsing() {
        assert_eq!("oneWeek".parse::<Recency>().unwrap(), Recency::OneWeek);
        assert!("yesterday".parse::<Recency>().is_err());
        assert_eq!("html".parse::<ReadFormat>().unwrap(), ReadFormat::Html);
        assert_eq!(ExtractionMethod::WebSearchFallback.to_string(), "web_search_fallback");
    }

    #[tokio::test]
    async fn test_web_search_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/web_search"))
            .and(header("authorization", "Bearer zai-key"))
            .and(body_partial_json(json!({
                "search_engine": "search-prime",
                "search_query": "Python asyncio",
                "count": 3,
                "search_recency_filter": "oneMonth",
                "search_domain_filter": "docs.python.org"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(3)))
            .expect(1)
            .mount(&server)
            .await;

        let zai = client(&server);
        let results = zai
            .web_search(&WebSearchRequest {
                query: "Python asyncio".into(),
                count: 3,
                engine: zai.search_engine().to_string(),
                recency: Recency::OneMonth,
                domain_filter: Some("docs.python.org".into()),
            })
            .await
            .unwrap();

        let titles: Vec<&str> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Result 1", "Result 2", "Result 3"]);
        assert_eq!(results[1].url, "https://example.com/2");
        assert!(results[0].citations_enabled);
    }

    #[tokio::test]
    async fn test_malformed_search_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/web_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"search_result": "oops"})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/web_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(2)))
            .expect(1)
            .mount(&server)
            .await;

        let zai = client(&server);
        let results = zai
            .web_search(&WebSearchRequest {
                query: "tokio".into(),
                count: 2,
                engine: zai.search_engine().to_string(),
                recency: Recency::NoLimit,
                domain_filter: None,
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_reader_body_fails_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reader"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reader_result": 7})))
            .expect(2)
            .mount(&server)
            .await;

        let zai = client(&server);
        let err = zai.read_direct("https://example.com", ReadFormat::Markdown, false).await.unwrap_err();
        assert!(matches!(err, ProviderError::Upstream { status: None, .. }));
    }

    #[tokio::test]
    async fn test_web_read_direct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reader"))
            .and(body_partial_json(json!({"url": "https://example.com/a", "return_format": "text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "reader_result": {
                    "title": "A page",
                    "description": "about a",
                    "content": "one two three",
                    "url": "https://example.com/a"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .web_read("https://example.com/a", ReadFormat::Text, false)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::Reader);
        assert_eq!(result.title, "A page");
        assert_eq!(result.word_count, 3);
    }

    #[tokio::test]
    async fn test_reader_4xx_falls_back_to_search() {
        let server = MockServer::start().await;
        Mock::given(path("/reader"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {"message": "blocked"}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/web_search"))
            .and(body_partial_json(json!({"search_query": "content summary https://example.com/p"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(2)))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .web_read("https://example.com/p", ReadFormat::Markdown, false)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::WebSearchFallback);
        assert!(!result.content.is_empty());
        assert!(result.content.contains("snippet 2"));
    }

    #[tokio::test]
    async fn test_fallback_with_no_results_has_empty_content() {
        let server = MockServer::start().await;
        Mock::given(path("/reader"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/web_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_body(0)))
            .mount(&server)
            .await;

        let result = client(&server)
            .web_read("https://example.com/gone", ReadFormat::Markdown, false)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::WebSearchFallback);
        assert!(result.content.is_empty());
        assert_eq!(result.word_count, 0);
    }

    #[tokio::test]
    async fn test_failed_fallback_surfaces_reader_error() {
        let server = MockServer::start().await;
        Mock::given(path("/reader"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "reader forbidden"})))
            .mount(&server)
            .await;
        Mock::given(path("/web_search"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "search broken"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .web_read("https://example.com/x", ReadFormat::Markdown, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth { ref message, .. } if message == "reader forbidden"));
    }
}
