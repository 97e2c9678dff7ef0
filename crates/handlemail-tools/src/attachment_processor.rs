//! `attachment_processor` tool: summarizes an in-memory attachment.
//!
//! Grounded on `tools/attachment_processing_tool.py`'s role in the agent
//! loop — text/CSV/JSON content is decoded and handed back verbatim (up to a
//! preview cap) so the model can reason over it directly; binary content
//! (images, PDFs, archives) gets a descriptive placeholder instead, since
//! decoding those formats is a provider-backed capability (`azure_visualizer`
//! for images; nothing upstream of this tool renders PDF text extraction).

use asupersync::Cx;
use handlemail_core::{CitationSource, Error, Result};
use serde_json::Value as Json;

use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

/// Attachments over this size are summarized rather than inlined in full,
/// to keep the tool-call payload bounded.
const INLINE_PREVIEW_BYTES: usize = 8192;

const TEXT_LIKE_CONTENT_TYPES: &[&str] =
    &["text/plain", "text/csv", "text/markdown", "application/json", "text/html"];

pub struct AttachmentProcessorTool;

impl Tool for AttachmentProcessorTool {
    fn name(&self) -> &'static str {
        names::ATTACHMENT_PROCESSOR
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let filename = args.get("filename").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::ATTACHMENT_PROCESSOR.to_string(),
                message: "missing required string argument 'filename'".to_string(),
            })?;
            let attachment = ctx.attachments.get(filename).ok_or_else(|| Error::ToolError {
                tool_name: names::ATTACHMENT_PROCESSOR.to_string(),
                message: format!("attachment '{filename}' not found"),
            })?;

            let content = if TEXT_LIKE_CONTENT_TYPES.contains(&attachment.content_type.as_str()) {
                match std::str::from_utf8(&attachment.bytes) {
                    Ok(text) if text.len() <= INLINE_PREVIEW_BYTES => text.to_string(),
                    Ok(text) => format!(
                        "{}...\n[truncated, {} of {} bytes shown]",
                        &text[..INLINE_PREVIEW_BYTES.min(text.len())],
                        INLINE_PREVIEW_BYTES.min(text.len()),
                        text.len()
                    ),
                    Err(_) => format!(
                        "'{filename}' declares content type '{}' but is not valid UTF-8 ({} bytes)",
                        attachment.content_type,
                        attachment.bytes.len()
                    ),
                }
            } else {
                format!(
                    "'{filename}' is a {} byte {} attachment; binary content requires a dedicated tool (e.g. azure_visualizer for images)",
                    attachment.bytes.len(),
                    attachment.content_type
                )
            };

            Ok(ToolOutputWithCitations {
                content,
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
    use crate::attachments::AttachmentStore;
    use crate::citation::CitationLedger;
    use asupersync::runtime::RuntimeBuilder;

    fn ctx<'a>(attachments: &'a AttachmentStore, ledger: &'a CitationLedger) -> ToolContext<'a> {
        ToolContext { attachments, sender_email: "alice@example.com", ledger, source_request: &REQUEST, task_store: None }
    }

    #[test]
    fn inlines_small_text_attachments() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let mut store = AttachmentStore::new();
        store.insert("notes.txt", "text/plain", b"hello world".to_vec());
        let ledger = CitationLedger::new();
        let tool = AttachmentProcessorTool;
        let out = rt
            .block_on(tool.call(&cx, serde_json::json!({"filename": "notes.txt"}), &ctx(&store, &ledger)))
            .expect("tool call succeeds");
        assert_eq!(out.content, "hello world");
        assert!(matches!(&out.citations[0], CitationSource::Attachment { filename } if filename == "notes.txt"));
    }

    #[test]
    fn describes_binary_attachments_without_inlining() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let mut store = AttachmentStore::new();
        store.insert("photo.png", "image/png", vec![0u8; 128]);
        let ledger = CitationLedger::new();
        let tool = AttachmentProcessorTool;
        let out = rt
            .block_on(tool.call(&cx, serde_json::json!({"filename": "photo.png"}), &ctx(&store, &ledger)))
            .expect("tool call succeeds");
        assert!(out.content.contains("128 byte"));
        assert!(out.content.contains("azure_visualizer"));
    }

    #[test]
    fn errors_on_missing_attachment() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = AttachmentStore::new();
        let ledger = CitationLedger::new();
        let tool = AttachmentProcessorTool;
        let result = rt.block_on(tool.call(&cx, serde_json::json!({"filename": "missing.txt"}), &ctx(&store, &ledger)));
        assert!(result.is_err());
    }
}
