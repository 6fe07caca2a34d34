//! Web search passthrough.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{str_arg, ParamKind, ParamSpec, Tool, ToolError};

const DDG_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const MAX_RESULTS: usize = 5;

/// Search the web through DuckDuckGo's HTML endpoint (no API key needed).
pub struct WebSearch {
    endpoint: String,
    timeout: Duration,
}

impl WebSearch {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(DDG_HTML_ENDPOINT, timeout)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn fetch(&self, query: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));

        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; SheetAnalyst/1.0)")
            .timeout(self.timeout)
            .build()?;

        client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web for information."
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "query",
            ParamKind::String,
            "The search query",
        )]
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let query = str_arg(args, "query")?;
        tracing::info!("Searching the web for: {}", query);

        let html = self
            .fetch(query)
            .await
            .map_err(|e| ToolError::SearchUnavailable(e.to_string()))?;

        let results = extract_ddg_results(&html);
        if results.is_empty() {
            Ok(format!("No results found for: {}", query))
        } else {
            Ok(results.join("\n\n"))
        }
    }
}

/// Pull the text between the first `>` and the next `<` after `marker`.
fn field_after<'a>(chunk: &'a str, marker: &str) -> Option<&'a str> {
    chunk
        .split(marker)
        .nth(1)
        .and_then(|s| s.split('>').nth(1))
        .and_then(|s| s.split('<').next())
        .map(str::trim)
}

/// Extract search results from DuckDuckGo HTML.
fn extract_ddg_results(html: &str) -> Vec<String> {
    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = field_after(chunk, "class=\"result__a\"").filter(|t| !t.is_empty())?;
            let snippet = field_after(chunk, "class=\"result__snippet\"").unwrap_or("");
            let url = field_after(chunk, "class=\"result__url\"").unwrap_or("");
            Some(format!(
                "**{}**\n{}\nURL: {}",
                html_decode(title),
                html_decode(snippet),
                url
            ))
        })
        .take(MAX_RESULTS)
        .collect()
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
