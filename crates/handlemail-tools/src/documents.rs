//! `pdf_export` and `meeting_creator`: document-rendering tools.
//!
//! Both produce bytes the Worker attaches to the outbound reply and hands to
//! `EmailDeliverer`; neither tool delivers anything itself.

use std::sync::Arc;

use asupersync::Cx;
use base64::Engine as _;
use handlemail_core::{Error, Result};
use serde_json::Value as Json;

use crate::capability::{IcsRenderer, PdfRenderer};
use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

/// `pdf_export`: renders the provided markdown body to a PDF, grounded on
/// `tools/pdf_export_tool.py`'s markdown-to-PDF conversion step.
pub struct PdfExportTool {
    renderer: Arc<dyn PdfRenderer>,
}

impl PdfExportTool {
    #[must_use]
    pub fn new(renderer: Arc<dyn PdfRenderer>) -> Self {
        Self { renderer }
    }
}

impl Tool for PdfExportTool {
    fn name(&self) -> &'static str {
        names::PDF_EXPORT
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let title = args.get("title").and_then(Json::as_str).unwrap_or("Report");
            let body = args.get("content").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::PDF_EXPORT.to_string(),
                message: "missing required string argument 'content'".to_string(),
            })?;
            let pdf_bytes = self.renderer.render(title, body)?;
            Ok(ToolOutputWithCitations {
                content: format!("Generated a {}-byte PDF titled '{title}'.", pdf_bytes.len()),
                citations: Vec::new(),
                metadata: Some(serde_json::json!({
                    "filename": format!("{title}.pdf"),
                    "content_type": "application/pdf",
                    "size_bytes": pdf_bytes.len(),
                    "content_base64": base64::engine::general_purpose::STANDARD.encode(&pdf_bytes),
                })),
            })
        })
    }
}

/// `meeting_creator`: renders a single-event `.ics` body from the model's
/// extracted summary/time/duration. No external dependency is needed, so
/// this is always backed by the concrete [`crate::capability::IcalendarRenderer`]
/// rather than an injectable provider.
pub struct MeetingCreatorTool {
    renderer: Arc<dyn IcsRenderer>,
}

impl MeetingCreatorTool {
    #[must_use]
    pub fn new(renderer: Arc<dyn IcsRenderer>) -> Self {
        Self { renderer }
    }
}

impl Tool for MeetingCreatorTool {
    fn name(&self) -> &'static str {
        names::MEETING_CREATOR
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let summary = args.get("summary").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::MEETING_CREATOR.to_string(),
                message: "missing required string argument 'summary'".to_string(),
            })?;
            let description = args.get("description").and_then(Json::as_str).unwrap_or_default();
            let start_str = args.get("start_time").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::MEETING_CREATOR.to_string(),
                message: "missing required string argument 'start_time' (ISO 8601, naive local time)".to_string(),
            })?;
            let start = chrono::NaiveDateTime::parse_from_str(start_str, "%Y-%m-%dT%H:%M:%S").map_err(|e| {
                Error::ToolError {
                    tool_name: names::MEETING_CREATOR.to_string(),
                    message: format!("invalid start_time '{start_str}': {e}"),
                }
            })?;
            let duration_minutes = args.get("duration_minutes").and_then(Json::as_i64).unwrap_or(30);

            let ics = self.renderer.render(summary, description, start, duration_minutes);
            Ok(ToolOutputWithCitations {
                content: format!("Created a calendar invite for '{summary}' starting {start_str}."),
                citations: Vec::new(),
                metadata: Some(serde_json::json!({
                    "filename": "invite.ics",
                    "content_type": "text/calendar",
                    "ics_body": ics,
                })),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;
    static REQUEST: LazyLock<handlemail_core::models::EmailRequest> = LazyLock::new(crate::test_support::sample_request);
    use crate::capability::IcalendarRenderer;
    use asupersync::runtime::RuntimeBuilder;

    struct FixedPdfRenderer;

    impl PdfRenderer for FixedPdfRenderer {
        fn render(&self, _title: &str, body: &str) -> Result<Vec<u8>> {
            Ok(body.as_bytes().to_vec())
        }
    }

    fn ctx<'a>(attachments: &'a crate::attachments::AttachmentStore, ledger: &'a crate::citation::CitationLedger) -> ToolContext<'a> {
        ToolContext { attachments, sender_email: "alice@example.com", ledger, source_request: &REQUEST, task_store: None }
    }

    #[test]
    fn pdf_export_reports_size_and_metadata() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let tool = PdfExportTool::new(Arc::new(FixedPdfRenderer));
        let out = rt
            .block_on(tool.call(&cx, serde_json::json!({"title": "Weekly Report", "content": "hello"}), &ctx(&store, &ledger)))
            .unwrap();
        assert!(out.content.contains("5-byte PDF"));
        let metadata = out.metadata.unwrap();
        assert_eq!(metadata["content_type"], "application/pdf");
        let encoded = metadata["content_base64"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn meeting_creator_builds_ics_with_requested_duration() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let tool = MeetingCreatorTool::new(Arc::new(IcalendarRenderer));
        let out = rt
            .block_on(tool.call(
                &cx,
                serde_json::json!({"summary": "Sync", "start_time": "2026-08-01T09:00:00", "duration_minutes": 45}),
                &ctx(&store, &ledger),
            ))
            .unwrap();
        let ics = out.metadata.unwrap()["ics_body"].as_str().unwrap().to_string();
        assert!(ics.contains("DTEND:20260801T094500"));
    }

    #[test]
    fn meeting_creator_rejects_unparseable_start_time() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = asupersync::Cx::for_testing();
        let store = crate::attachments::AttachmentStore::new();
        let ledger = crate::citation::CitationLedger::new();
        let tool = MeetingCreatorTool::new(Arc::new(IcalendarRenderer));
        let result = rt.block_on(tool.call(
            &cx,
            serde_json::json!({"summary": "Sync", "start_time": "not-a-date"}),
            &ctx(&store, &ledger),
        ));
        assert!(result.is_err());
    }
}
