//! `azure_visualizer`: answers a question about an image attachment.
//!
//! Grounded on `tools/visual_qa_tool.py`: resolve the named attachment,
//! confirm it's image content (by declared type, falling back to a
//! filename-based guess), then hand the bytes to an [`ImageAnalyzer`].

use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::{CitationSource, Error, Result};
use serde_json::Value as Json;

use crate::capability::ImageAnalyzer;
use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

pub struct VisualQaTool {
    analyzer: Arc<dyn ImageAnalyzer>,
}

impl VisualQaTool {
    #[must_use]
    pub fn new(analyzer: Arc<dyn ImageAnalyzer>) -> Self {
        Self { analyzer }
    }
}

fn looks_like_image(content_type: &str, filename: &str) -> bool {
    if content_type.starts_with("image/") {
        return true;
    }
    mime_guess_from_extension(filename).is_some()
}

fn mime_guess_from_extension(filename: &str) -> Option<&'static str> {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".png") {
        Some("image/png")
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        Some("image/jpeg")
    } else if lower.ends_with(".gif") {
        Some("image/gif")
    } else if lower.ends_with(".webp") {
        Some("image/webp")
    } else {
        None
    }
}

impl Tool for VisualQaTool {
    fn name(&self) -> &'static str {
        names::AZURE_VISUALIZER
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let filename = args.get("filename").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::AZURE_VISUALIZER.to_string(),
                message: "missing required string argument 'filename'".to_string(),
            })?;
            let question = args.get("question").and_then(Json::as_str);

            let attachment = ctx.attachments.get(filename).ok_or_else(|| Error::ToolError {
                tool_name: names::AZURE_VISUALIZER.to_string(),
                message: format!("attachment '{filename}' not found"),
            })?;
            if !looks_like_image(&attachment.content_type, filename) {
                return Err(Error::ToolError {
                    tool_name: names::AZURE_VISUALIZER.to_string(),
                    message: format!("'{filename}' is not an image (type: {})", attachment.content_type),
                });
            }

            let answer = self.analyzer.analyze(&attachment.bytes, &attachment.content_type, question)?;
            Ok(ToolOutputWithCitations {
                content: answer,
                citations: vec![CitationSource::Attachment { filename: filename.to_string() }],
                metadata: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;
    static REQUEST: LazyLock<handlemail_core::models::EmailRequest> = LazyLock::new(crate::test_support::sample_request);
    use crate::capability::UnconfiguredImageAnalyzer;
    use asupersync::runtime::RuntimeBuilder;

    struct FixedAnalyzer;

    impl ImageAnalyzer for FixedAnalyzer {
        fn analyze(&self, _bytes: &[u8], _mime_type: &str, question: Option<&str>) -> Result<String> {
            Ok(format!("answer to: {}", question.unwrap_or("describe this image")))
        }
    }

    fn ctx<'a>(attachments: &'a crate::attachments::AttachmentStore, ledger: &'a crate::citation::CitationLedger) -> ToolContext<'a> {
        ToolContext { attachments, sender_email: "alice@example.com", ledger, source_request: &REQUEST, task_store: None }
    }

    #[test]
    fn analyzes_declared_image_content() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let mut store = crate::attachments::AttachmentStore::new();
        store.insert("cat.png", "image/png", vec![0u8; 16]);
        let ledger = crate::citation::CitationLedger::new();
        let tool = VisualQaTool::new(Arc::new(FixedAnalyzer));
        let out = rt
            .block_on(tool.call(&cx, serde_json::json!({"filename": "cat.png", "question": "what is this?"}), &ctx(&store, &ledger)))
            .unwrap();
        assert_eq!(out.content, "answer to: what is this?");
    }

    #[test]
    fn rejects_non_image_attachment() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let mut store = crate::attachments::AttachmentStore::new();
        store.insert("report.pdf", "application/pdf", vec![0u8; 16]);
        let ledger = crate::citation::CitationLedger::new();
        let tool = VisualQaTool::new(Arc::new(UnconfiguredImageAnalyzer));
        let result = rt.block_on(tool.call(&cx, serde_json::json!({"filename": "report.pdf"}), &ctx(&store, &ledger)));
        assert!(result.is_err());
    }
}
