//! `citation_aware_visit`: fetches a webpage and records it as a visited
//! citation, grounded on `tools/citation_aware_visit_tool.py`.

use std::sync::Arc;
use std::sync::LazyLock;

use asupersync::Cx;
use handlemail_core::{CitationSource, Error, Result};
use regex::Regex;
use serde_json::Value as Json;

use crate::capability::PageFetcher;
use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

pub struct CitationAwareVisitTool {
    fetcher: Arc<dyn PageFetcher>,
}

impl CitationAwareVisitTool {
    #[must_use]
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }
}

static TITLE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<title>(.*?)</title>").expect("valid regex"));
static H1_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<h1[^>]*>(.*?)</h1>").expect("valid regex"));
static MARKDOWN_HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^# (.*)$").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Extract a display title from fetched content, falling back to the URL
/// itself — mirrors the source's `<title>` / `<h1>` / markdown-heading
/// fallback chain.
fn extract_title(content: &str, url: &str) -> String {
    let captured = TITLE_TAG
        .captures(content)
        .or_else(|| H1_TAG.captures(content))
        .or_else(|| MARKDOWN_HEADING.captures(content))
        .map(|c| c[1].to_string());
    match captured {
        Some(raw) => {
            let stripped = HTML_TAG.replace_all(&raw, "").trim().to_string();
            if stripped.is_empty() { format!("Webpage: {url}") } else { stripped }
        }
        None => format!("Webpage: {url}"),
    }
}

impl Tool for CitationAwareVisitTool {
    fn name(&self) -> &'static str {
        names::CITATION_AWARE_VISIT
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let url = args.get("url").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::CITATION_AWARE_VISIT.to_string(),
                message: "missing required string argument 'url'".to_string(),
            })?;
            let page = self.fetcher.fetch(url)?;
            let title = if page.title.trim().is_empty() { extract_title(&page.content, url) } else { page.title };

            Ok(ToolOutputWithCitations {
                content: format!("**{title}**\n\n{}", page.content),
                citations: vec![CitationSource::WebPage { url: url.to_string(), title, visited: true }],
                metadata: Some(serde_json::json!({"url": url, "content_length": page.content.len()})),
            })
        })
    }
}
