//! web_search：DuckDuckGo HTML 搜索
//!
//! GET 请求带超时与 User-Agent，从结果页中提取标题与摘要；
//! 结果超过 max_result_chars 时截断并追加 ...[truncated]，没有结果时返回 "No search results found."。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::{Tool, ToolOutput};

pub const NO_RESULTS: &str = "No search results found.";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const MAX_RESULTS: usize = 8;

static TITLE_RE: OnceLock<Regex> = OnceLock::new();
static SNIPPET_RE: OnceLock<Regex> = OnceLock::new();

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(cfg: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            max_result_chars: cfg.max_result_chars,
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("Search error: request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("Search error: HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Search error: read body: {e}"))?;
        Ok(format_results(&body, self.max_result_chars))
    }
}

/// HTML 片段转纯文本（去标签、解实体），失败时退回原文
fn fragment_text(fragment: &str) -> String {
    match from_read(fragment.as_bytes(), 1000) {
        Ok(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        Err(_) => fragment.trim().to_string(),
    }
}

/// 从结果页提取 "标题\n摘要" 列表并按字符上限截断
pub fn format_results(html: &str, max_chars: usize) -> String {
    let title_re = TITLE_RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*>(.*?)</a>"#).unwrap()
    });
    let snippet_re = SNIPPET_RE.get_or_init(|| {
        Regex::new(r#"(?s)<(?:a|div|td)[^>]*class="result__snippet"[^>]*>(.*?)</(?:a|div|td)>"#)
            .unwrap()
    });

    let titles: Vec<String> = title_re
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| fragment_text(m.as_str())))
        .collect();
    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| fragment_text(m.as_str())))
        .collect();

    let entries: Vec<String> = titles
        .iter()
        .enumerate()
        .take(MAX_RESULTS)
        .map(|(i, title)| match snippets.get(i) {
            Some(snippet) if !snippet.is_empty() => format!("{title}\n{snippet}"),
            _ => title.clone(),
        })
        .filter(|e| !e.trim().is_empty())
        .collect();
    if entries.is_empty() {
        return NO_RESULTS.to_string();
    }

    let text = entries.join("\n\n");
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for real-time information. Params: {\"query\": \"search terms\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string", "description": "Search query"}},
            "required": ["query"]
        })
    }

    async fn invoke(&self, params: Value) -> ToolOutput {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return ToolOutput::failed("Search error: missing query");
        }
        tracing::info!(query = %query, "web search");
        match self.search(query).await {
            Ok(text) => ToolOutput::ok(text),
            Err(e) => ToolOutput::failed(e),
        }
    }
}
