//! The tool-calling agent loop and the direct-research variant.
//!
//! The tool-calling agent loop, with prompt-composition detail from
//! `original_source/mxtoai/agents/email_agent.py` (`_create_task`,
//! `_process_agent_result`'s signature-stripping/failure-fallback shape)
//! and `research_agent.py` (the single-call, no-tool-loop variant for the
//! `research` handle).

use std::sync::Arc;

use asupersync::Cx;
use base64::Engine as _;
use handlemail_core::config::{AGENT_MAX_STEPS, AGENT_PLANNING_INTERVAL};
use handlemail_core::models::{EmailAttachment, EmailRequest, ProcessingInstructions};
use serde_json::Value as Json;

use handlemail_tools::attachments::AttachmentStore;
use handlemail_tools::citation::CitationLedger;
use handlemail_tools::registry::{ToolContext, ToolRegistry};

use crate::model_client::{ChatMessage, RoutedModelClient, ToolSpec};
use crate::prompts::{attachment_task, build_task_prompt, email_context};
use crate::report_formatter::{ReportFormat, ReportFormatter};

/// Short human-readable description surfaced to the model for each tool
/// name; the source's `smolagents` wrapper derives these from each tool's
/// own docstring, which this registry's `Tool` trait doesn't carry, so they
/// are restated here instead.
fn tool_description(name: &str) -> &'static str {
    match name {
        "attachment_processor" => "Read and summarize the content of an email attachment by filename.",
        "citation_aware_visit" => "Fetch a URL's page content and record it as a visited citation.",
        "python_interpreter" => "Evaluate a basic arithmetic expression.",
        "wikipedia_search" => "Search Wikipedia for a query and return summarized results.",
        "references_generator" => "Render the accumulated citations as a references section.",
        "azure_visualizer" => "Describe the contents of an image attachment.",
        "ddg_search" => "Search the web via DuckDuckGo.",
        "brave_search" => "Search the web via Brave Search.",
        "google_search" => "Search the web via Google.",
        "web_search" => "Search the web for a query.",
        "news_search" => "Search recent news articles for a query.",
        "deep_research" => "Perform in-depth multi-source research on a topic.",
        "meeting_creator" => "Create a calendar invite (.ics) from meeting details.",
        "pdf_export" => "Export the current content as a PDF document.",
        "scheduled_tasks" => "Create a new scheduled (recurring or future-dated) task.",
        "delete_scheduled_tasks" => "Cancel a previously scheduled task.",
        "linkedin_fresh_data" => "Fetch fresh LinkedIn profile/company data.",
        "linkedin_data_api" => "Fetch cached LinkedIn profile/company data.",
        _ => "A handlemail tool.",
    }
}

fn tool_specs(registry: &ToolRegistry, allowed: &[String]) -> Vec<ToolSpec> {
    registry
        .resolve(allowed)
        .into_iter()
        .map(|tool| ToolSpec {
            name: tool.name().to_string(),
            description: tool_description(tool.name()).to_string(),
            parameters: serde_json::json!({"type": "object", "additionalProperties": true}),
        })
        .collect()
}

/// Per-attachment detail line used both in the prompt and as the filename
/// lookup key into `AttachmentStore`, matching `_create_task`'s
/// `"- {filename} (Type: {content_type}, Size: {size} bytes)"` listing.
fn attachment_detail_lines(attachments: &[EmailAttachment]) -> Vec<String> {
    attachments.iter().map(|a| format!("- {} (Type: {}, Size: {} bytes)", a.filename, a.content_type, a.size_bytes)).collect()
}

/// The agent's final output before delivery formatting is applied by the
/// Worker. `ReportFormatter` is applied here; attaching generated files
/// (.ics/PDF bytes) is the caller's job once `generated_files` is read.
#[derive(Debug, Clone, Default)]
pub struct DetailedEmailProcessingResult {
    pub handle: String,
    pub text_body: String,
    pub html_body: String,
    pub errors: Vec<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Raw bytes for any file a tool produced this run (filename, mime,
    /// bytes) — e.g. a `.ics` invite or an exported PDF.
    pub generated_files: Vec<(String, String, Vec<u8>)>,
}

impl DetailedEmailProcessingResult {
    fn apology(handle: &str, error: impl Into<String>) -> Self {
        let formatter = ReportFormatter::new();
        let message = "I apologize, but I encountered an error while processing your request. Please try again later or contact support if this issue persists.";
        Self {
            handle: handle.to_string(),
            text_body: formatter.format_report(message, ReportFormat::PlainText, true),
            html_body: formatter.format_report(message, ReportFormat::Html, true),
            errors: vec![error.into()],
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            generated_files: Vec::new(),
        }
    }
}

/// Drives either the bounded tool-calling loop or the direct-research
/// single-call path, picked by `instructions.uses_agent_loop`.
pub struct Agent {
    model_client: Arc<RoutedModelClient>,
    tool_registry: Arc<ToolRegistry>,
}

impl Agent {
    #[must_use]
    pub fn new(model_client: Arc<RoutedModelClient>, tool_registry: Arc<ToolRegistry>) -> Self {
        Self { model_client, tool_registry }
    }

    /// `process_email(request, instructions) -> DetailedResult`.
    /// Never returns `Err`: any failure inside is caught and turned into an
    /// apology result, matching the source's top-level try/except shape.
    pub async fn process_email(&self, cx: &Cx, request: &EmailRequest, instructions: &ProcessingInstructions, attachment_store: &AttachmentStore) -> DetailedEmailProcessingResult {
        match self.run(cx, request, instructions, attachment_store).await {
            Ok(result) => result,
            Err(error) => DetailedEmailProcessingResult::apology(&instructions.handle, error.to_string()),
        }
    }

    async fn run(
        &self,
        cx: &Cx,
        request: &EmailRequest,
        instructions: &ProcessingInstructions,
        attachment_store: &AttachmentStore,
    ) -> handlemail_core::Result<DetailedEmailProcessingResult> {
        let mut ledger = CitationLedger::new();
        let attachment_details = if instructions.process_attachments { attachment_detail_lines(&request.attachments) } else { Vec::new() };
        let context = email_context(request, &attachment_details);
        let task = build_task_prompt(
            &instructions.handle,
            &context,
            request.distilled_instructions.as_deref(),
            instructions.deep_research_mandatory,
            attachment_task(&attachment_details).as_deref(),
            &instructions.task_template,
        );

        let mut generated_files = Vec::new();
        let (content, usage) = if instructions.uses_agent_loop {
            self.run_tool_calling_loop(cx, request, instructions, attachment_store, &mut ledger, &mut generated_files, &task).await?
        } else {
            self.run_direct_research(cx, instructions, &task).await?
        };

        let mut content = content;
        if ledger.has_citations() && !has_references_header(&content) {
            content.push_str("\n\n");
            content.push_str(&ledger.render());
        }

        let formatter = ReportFormatter::new();
        Ok(DetailedEmailProcessingResult {
            handle: instructions.handle.clone(),
            text_body: formatter.format_report(&content, ReportFormat::PlainText, true),
            html_body: formatter.format_report(&content, ReportFormat::Html, true),
            errors: Vec::new(),
            prompt_tokens: usage.0,
            completion_tokens: usage.1,
            total_tokens: usage.2,
            generated_files,
        })
    }

    /// Bounded tool-calling loop: `max_steps` rounds, model emits a final
    /// message or a tool call each round; tool output text feeds back in as
    /// the next user turn.
    #[allow(clippy::too_many_arguments)]
    async fn run_tool_calling_loop(
        &self,
        cx: &Cx,
        request: &EmailRequest,
        instructions: &ProcessingInstructions,
        attachment_store: &AttachmentStore,
        ledger: &mut CitationLedger,
        generated_files: &mut Vec<(String, String, Vec<u8>)>,
        task: &str,
    ) -> handlemail_core::Result<(String, (u64, u64, u64))> {
        let tools = tool_specs(&self.tool_registry, &instructions.allowed_tools);
        let mut messages = vec![ChatMessage::system(instructions.output_template.clone()), ChatMessage::user(task.to_string())];
        let mut prompt_tokens = 0u64;
        let mut completion_tokens = 0u64;
        let mut total_tokens = 0u64;
        let mut last_content = String::new();

        for step in 0..AGENT_MAX_STEPS {
            if step > 0 && step % AGENT_PLANNING_INTERVAL == 0 {
                messages.push(ChatMessage::system("Reassess progress so far and plan the remaining steps before continuing.".to_string()));
            }

            let output = self.model_client.generate(cx, &messages, &instructions.target_model_group, None, Some(&tools)).await?;
            prompt_tokens += output.usage.prompt;
            completion_tokens += output.usage.completion;
            total_tokens += output.usage.total;

            let Some(call) = output.tool_call else {
                last_content = output.content;
                break;
            };

            messages.push(ChatMessage::assistant(format!("Calling tool `{}` with arguments {}", call.name, call.arguments)));

            let ctx = ToolContext { attachments: attachment_store, sender_email: &request.from_email, ledger, source_request: request, task_store: None };
            let tool_result = self.tool_registry.call(cx, &call.name, call.arguments, &ctx).await;
            let tool_text = match tool_result {
                Ok(output) => {
                    ledger.merge(&output.citations);
                    if let Some(metadata) = &output.metadata {
                        if let Some(file) = generated_file(metadata) {
                            generated_files.push(file);
                        }
                    }
                    output.content
                }
                Err(error) => format!("Tool `{}` failed: {error}", call.name),
            };
            messages.push(ChatMessage::tool(tool_text));
            last_content = output.content;
        }

        Ok((last_content, (prompt_tokens, completion_tokens, total_tokens)))
    }

    /// Direct-research variant: one call to the target model group, no
    /// tool loop, used by the `research` handle since deep-research models
    /// perform their own browsing internally.
    async fn run_direct_research(&self, cx: &Cx, instructions: &ProcessingInstructions, task: &str) -> handlemail_core::Result<(String, (u64, u64, u64))> {
        let messages = vec![ChatMessage::system(instructions.output_template.clone()), ChatMessage::user(task.to_string())];
        let output = self.model_client.generate(cx, &messages, &instructions.target_model_group, None, None).await?;
        Ok((output.content, (output.usage.prompt, output.usage.completion, output.usage.total)))
    }
}

/// Extracts `(filename, content_type, bytes)` from a tool's `metadata`, if
/// it carries a generated file. `meeting_creator` puts its rendered text
/// body straight into `ics_body`; `pdf_export` base64-encodes its binary
/// output into `content_base64` since ICS text and PDF bytes need different
/// encodings in a JSON value.
fn generated_file(metadata: &Json) -> Option<(String, String, Vec<u8>)> {
    let filename = metadata.get("filename")?.as_str()?.to_string();
    let content_type = metadata.get("content_type")?.as_str()?.to_string();
    if let Some(ics_body) = metadata.get("ics_body").and_then(Json::as_str) {
        return Some((filename, content_type, ics_body.as_bytes().to_vec()));
    }
    if let Some(encoded) = metadata.get("content_base64").and_then(Json::as_str) {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        return Some((filename, content_type, bytes));
    }
    None
}

fn has_references_header(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    lower.contains("## references") || lower.contains("### references") || lower.contains("## sources") || lower.contains("### sources")
}

#[cfg(test)]
mod tests {
    use super::*;
    use handlemail_tools::registry::{BoxFuture, Tool, ToolOutputWithCitations};

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "attachment_processor"
        }

        fn call<'a>(&'a self, _cx: &'a Cx, args: Json, _ctx: &'a ToolContext<'a>) -> BoxFuture<'a, handlemail_core::Result<ToolOutputWithCitations>> {
            Box::pin(async move { Ok(ToolOutputWithCitations::text(format!("echoed {args}"))) })
        }
    }

    #[test]
    fn attachment_detail_lines_format_matches_expected_shape() {
        let attachment = EmailAttachment { filename: "a.pdf".to_string(), content_type: "application/pdf".to_string(), size_bytes: 100, content: None, stored_path: None };
        let lines = attachment_detail_lines(std::slice::from_ref(&attachment));
        assert_eq!(lines[0], "- a.pdf (Type: application/pdf, Size: 100 bytes)");
    }

    #[test]
    fn generated_file_decodes_base64_content() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 fake");
        let metadata = serde_json::json!({"filename": "Report.pdf", "content_type": "application/pdf", "size_bytes": 13, "content_base64": encoded});
        let (filename, content_type, bytes) = generated_file(&metadata).expect("file present");
        assert_eq!(filename, "Report.pdf");
        assert_eq!(content_type, "application/pdf");
        assert_eq!(bytes, b"%PDF-1.4 fake");
    }

    #[test]
    fn generated_file_reads_plain_text_ics_body() {
        let metadata = serde_json::json!({"filename": "invite.ics", "content_type": "text/calendar", "ics_body": "BEGIN:VCALENDAR"});
        let (filename, content_type, bytes) = generated_file(&metadata).expect("file present");
        assert_eq!(filename, "invite.ics");
        assert_eq!(content_type, "text/calendar");
        assert_eq!(bytes, b"BEGIN:VCALENDAR");
    }

    #[test]
    fn generated_file_is_none_without_recoverable_bytes() {
        let metadata = serde_json::json!({"filename": "x", "content_type": "y"});
        assert!(generated_file(&metadata).is_none());
    }

    #[test]
    fn has_references_header_detects_common_markers() {
        assert!(has_references_header("body\n\n## References\n1. x"));
        assert!(has_references_header("body\n\n### Sources\n- y"));
        assert!(!has_references_header("just a plain reply"));
    }

    #[test]
    fn tool_specs_only_includes_registered_and_allowed_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let allowed = vec!["attachment_processor".to_string(), "nonexistent".to_string()];
        let specs = tool_specs(&registry, &allowed);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "attachment_processor");
    }
}
