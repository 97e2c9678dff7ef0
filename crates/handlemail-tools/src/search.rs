//! `web_search` / `wikipedia_search` / `google_search` / `ddg_search` /
//! `brave_search` / `news_search`: one `Tool` shape over a pluggable
//! [`SearchProvider`], grounded on `tools/web_search/google_search.py`'s
//! result formatting — markdown-bulleted hits, each one a web citation.

use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::{CitationSource, Error, Result};
use serde_json::Value as Json;

use crate::capability::SearchProvider;
use crate::registry::{BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

/// A `Tool` for one named search engine, backed by a provider. The same
/// struct serves `web_search`/`wikipedia_search`/`google_search`/
/// `ddg_search`/`brave_search`/`news_search` — they differ only in name and
/// backend, matching the source's family of near-identical search tool
/// classes.
pub struct SearchTool {
    tool_name: &'static str,
    provider: Arc<dyn SearchProvider>,
}

impl SearchTool {
    #[must_use]
    pub fn new(tool_name: &'static str, provider: Arc<dyn SearchProvider>) -> Self {
        Self { tool_name, provider }
    }
}

impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        self.tool_name
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let query = args.get("query").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: self.tool_name.to_string(),
                message: "missing required string argument 'query'".to_string(),
            })?;
            let hits = self.provider.search(query)?;
            if hits.is_empty() {
                return Ok(ToolOutputWithCitations::text(format!("No results found for '{query}'.")));
            }

            let mut lines = vec!["## Search Results".to_string(), String::new()];
            let mut citations = Vec::with_capacity(hits.len());
            for (i, hit) in hits.iter().enumerate() {
                lines.push(format!("{}. **{}**\n   {}\n   URL: {}", i + 1, hit.title, hit.snippet, hit.url));
                citations.push(CitationSource::SearchResult {
                    url: hit.url.clone(),
                    title: hit.title.clone(),
                    snippet: hit.snippet.clone(),
                });
            }

            Ok(ToolOutputWithCitations {
                content: lines.join("\n"),
                citations,
                metadata: Some(serde_json::json!({"query": query, "total_results": hits.len()})),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;
    static REQUEST: LazyLock<handlemail_core::models::EmailRequest> = LazyLock::new(crate::test_support::sample_request);
    use crate::capability::{SearchHit, UnconfiguredSearch};
    use asupersync::runtime::RuntimeBuilder;

    struct FixedProvider(Vec<SearchHit>);

    impl SearchProvider for FixedProvider {
        fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(self.0.clone())
        }
    }

    fn ctx<'a>(attachments: &'a crate::attachments::AttachmentStore, ledger: &'a crate::citation::CitationLedger) -> ToolContext<'a> {
        ToolContext { attachments, sender_email: "alice@example.com", ledger, source_request: &REQUEST, task_store: None }
    }

    #[test]
    fn formats_hits_and_returns_search_citations() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let provider = FixedProvider(vec![SearchHit {
            title: "Rust Book".into(),
            url: "https://doc.rust-lang.org/book/".into(),
            snippet: "The Rust Programming Language".into(),
        }]);
        let tool = SearchTool::new("web_search", Arc::new(provider));
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let out = rt.block_on(tool.call(&cx, serde_json::json!({"query": "rust book"}), &ctx(&store, &ledger))).unwrap();
        assert!(out.content.contains("Rust Book"));
        assert_eq!(out.citations.len(), 1);
    }

    #[test]
    fn unconfigured_provider_surfaces_tool_error() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let tool = SearchTool::new("google_search", Arc::new(UnconfiguredSearch { engine: "google_search" }));
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let result = rt.block_on(tool.call(&cx, serde_json::json!({"query": "x"}), &ctx(&store, &ledger)));
        assert!(result.is_err());
    }
}
