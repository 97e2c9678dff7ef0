//! `references_generator`: renders the ledger's current References section.
//!
//! Grounded on `tools/references_generator_tool.py`, which is called at the
//! end of a research run to compile everything cited so far. Reads the
//! ledger snapshot handed to it via [`ToolContext`]; never mutates it.

use asupersync::Cx;
use handlemail_core::Result;
use serde_json::Value as Json;

use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

pub struct ReferencesGeneratorTool;

impl Tool for ReferencesGeneratorTool {
    fn name(&self) -> &'static str {
        names::REFERENCES_GENERATOR
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let include_in_content = args.get("include_in_content").and_then(Json::as_bool).unwrap_or(true);

            if !ctx.ledger.has_citations() {
                return Ok(ToolOutputWithCitations {
                    content: "No citations were collected during this session.".to_string(),
                    citations: Vec::new(),
                    metadata: Some(serde_json::json!({"total_citations": 0, "has_references": false})),
                });
            }

            let references_section = ctx.ledger.render();
            let content =
                if include_in_content { references_section.clone() } else { "References section generated successfully.".to_string() };

            Ok(ToolOutputWithCitations {
                content,
                citations: Vec::new(),
                metadata: Some(serde_json::json!({
                    "has_references": true,
                    "references_section": references_section,
                })),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::LazyLock;
    static REQUEST: LazyLock<handlemail_core::models::EmailRequest> = LazyLock::new(crate::test_support::sample_request);

    #[test]
    fn reports_no_citations_when_ledger_is_empty() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let tool = ReferencesGeneratorTool;
        let ctx = ToolContext { attachments: &store, sender_email: "alice@example.com", ledger: &ledger, source_request: &REQUEST, task_store: None };
        let out = rt.block_on(tool.call(&cx, serde_json::json!({}), &ctx)).unwrap();
        assert_eq!(out.content, "No citations were collected during this session.");
    }

    #[test]
    fn renders_references_section_when_include_in_content_is_true() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let mut ledger = crate::citation::CitationLedger::new();
        ledger.add_web("https://a.com", "A", true);
        let tool = ReferencesGeneratorTool;
        let ctx = ToolContext { attachments: &store, sender_email: "alice@example.com", ledger: &ledger, source_request: &REQUEST, task_store: None };
        let out = rt.block_on(tool.call(&cx, serde_json::json!({"include_in_content": true}), &ctx)).unwrap();
        assert!(out.content.contains("#### Visited Pages"));
    }

    #[test]
    fn omits_body_when_include_in_content_is_false() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let mut ledger = crate::citation::CitationLedger::new();
        ledger.add_web("https://a.com", "A", true);
        let tool = ReferencesGeneratorTool;
        let ctx = ToolContext { attachments: &store, sender_email: "alice@example.com", ledger: &ledger, source_request: &REQUEST, task_store: None };
        let out = rt.block_on(tool.call(&cx, serde_json::json!({"include_in_content": false}), &ctx)).unwrap();
        assert_eq!(out.content, "References section generated successfully.");
    }
}
