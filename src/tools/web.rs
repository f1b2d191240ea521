//! Web tools - Z.AI search and page reading
//!
//! Both tools render self-describing output (query or URL, engine or
//! extraction method, result or word count, fetch timestamp) so later
//! turns can tell what has already been fetched.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use url::Url;

use super::{optional_i64, optional_str, required_str, truncate_chars, Tool, ToolArgs, ToolContext, UnknownArgs, WEB_CHAR_BUDGET};
use crate::agent::llm::zai::{ExtractionMethod, ReadFormat, Recency, SearchResultBlock, WebReadResult, WebSearchRequest};
use crate::agent::llm::ZaiClient;
use crate::error::Error;
use crate::gate::CreditGate;
use crate::Result;

pub const DEFAULT_MAX_RESULTS: i64 = 5;
pub const MAX_RESULTS_RANGE: (i64, i64) = (1, 10);

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Web search through Z.AI `/web_search`
pub struct ZaiWebSearchTool {
    client: ZaiClient,
}

impl ZaiWebSearchTool {
    /// Refused unless the credit gate admits Z.AI search.
    pub fn new(client: ZaiClient, gate: &CreditGate) -> Result<Self> {
        gate.require_search()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for ZaiWebSearchTool {
    fn name(&self) -> &str {
        "zai_web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs, and short summaries in relevance order; \
         use zai_web_reader to fetch a page body."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results, 1-10 (default 5)"
                },
                "recency": {
                    "type": "string",
                    "enum": ["noLimit", "oneDay", "oneWeek", "oneMonth"],
                    "description": "Only return results from this window (default noLimit)"
                }
            },
            "required": ["query"]
        })
    }

    fn unknown_args(&self) -> UnknownArgs {
        UnknownArgs::Ignore
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<String> {
        let query = required_str(args, "query")?.trim();
        if query.is_empty() {
            return Err(Error::Tool("query must not be empty".to_string()));
        }
        let requested = optional_i64(args, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS);
        let count = requested.clamp(MAX_RESULTS_RANGE.0, MAX_RESULTS_RANGE.1);
        let recency = match optional_str(args, "recency")? {
            Some(value) => value.parse::<Recency>()?,
            None => Recency::default(),
        };

        let request = WebSearchRequest {
            query: query.to_string(),
            count: count as u8,
            engine: self.client.search_engine().to_string(),
            recency,
            domain_filter: None,
        };
        let results = self.client.web_search(&request).await?;

        Ok(render_search(&request, requested, &results))
    }
}

fn render_search(request: &WebSearchRequest, requested: i64, results: &[SearchResultBlock]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Web search: \"{}\"", request.query);
    let _ = write!(out, "Engine: {} | max_results: {}", request.engine, request.count);
    if requested != i64::from(request.count) {
        let _ = write!(out, " (requested {requested}, clamped to 1-10)");
    }
    let _ = writeln!(
        out,
        " | Recency: {} | Sources: {} | Fetched: {}",
        request.recency.as_str(),
        results.len(),
        timestamp()
    );

    if results.is_empty() {
        out.push_str("\nNo results found.");
        return out;
    }

    for (i, result) in results.iter().enumerate() {
        let _ = write!(out, "\n{}. {}\n   URL: {}\n", i + 1, result.title, result.url);
        if !result.snippet.is_empty() {
            let _ = writeln!(out, "   {}", result.snippet.trim());
        }
    }

    truncate_chars(out.trim_end(), WEB_CHAR_BUDGET)
}

/// Page reader through Z.AI `/reader`, with search fallback
pub struct ZaiWebReaderTool {
    client: ZaiClient,
}

impl ZaiWebReaderTool {
    /// Refused unless the credit gate admits Z.AI search.
    pub fn new(client: ZaiClient, gate: &CreditGate) -> Result<Self> {
        gate.require_search()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for ZaiWebReaderTool {
    fn name(&self) -> &str {
        "zai_web_reader"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its main content. Long pages are truncated."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http(s) URL to read"
                },
                "format": {
                    "type": "string",
                    "enum": ["markdown", "html", "text"],
                    "description": "Body format (default markdown)"
                }
            },
            "required": ["url"]
        })
    }

    fn unknown_args(&self) -> UnknownArgs {
        UnknownArgs::Ignore
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<String> {
        let raw_url = required_str(args, "url")?.trim();
        let url = Url::parse(raw_url).map_err(|e| Error::Tool(format!("Invalid URL '{raw_url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Tool(format!(
                "Unsupported URL scheme '{}': only http and https can be read",
                url.scheme()
            )));
        }
        let format = match optional_str(args, "format")? {
            Some(value) => value.parse::<ReadFormat>()?,
            None => ReadFormat::default(),
        };

        let page = self.client.web_read(url.as_str(), format, false).await?;
        Ok(render_page(&page))
    }
}

fn render_page(page: &WebReadResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Web page: {}", page.url);
    if !page.title.is_empty() {
        let _ = writeln!(out, "Title: {}", page.title);
    }
    if !page.description.is_empty() {
        let _ = writeln!(out, "Description: {}", page.description);
    }
    let _ = writeln!(
        out,
        "Method: {} | Format: {} | Words: {} | Fetched: {}",
        page.method,
        page.format.as_str(),
        page.word_count,
        timestamp()
    );
    if page.method == ExtractionMethod::WebSearchFallback {
        out.push_str("Note: the page could not be read directly; the content below is a web search summary.\n");
    }
    out.push('\n');

    if page.content.is_empty() {
        out.push_str("(no content)");
    } else {
        out.push_str(&truncate_chars(&page.content, WEB_CHAR_BUDGET));
    }
    out
}
