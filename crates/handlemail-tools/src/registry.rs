//! The `Tool` trait and `ToolRegistry`, the agent loop's dispatch surface.
//!
//! Tool names mirror the source's `ToolName` enum exactly (string values),
//! and the `COMMON_TOOLS` / `SEARCH_TOOLS` / `RESEARCH_TOOLS` clusters are
//! grounded on `original_source/mxtoai/email_handles.py`, which composes
//! every handle's `allowed_tools` from these three groups.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::models::EmailRequest;
use handlemail_core::{CitationSource, Error, Result};
use handlemail_db::TaskStore;
use serde_json::Value as Json;

use crate::attachments::AttachmentStore;
use crate::citation::CitationLedger;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exact string values of `original_source/mxgo/schemas.py::ToolName`.
pub mod names {
    pub const ATTACHMENT_PROCESSOR: &str = "attachment_processor";
    pub const CITATION_AWARE_VISIT: &str = "citation_aware_visit";
    pub const PYTHON_INTERPRETER: &str = "python_interpreter";
    pub const WIKIPEDIA_SEARCH: &str = "wikipedia_search";
    pub const REFERENCES_GENERATOR: &str = "references_generator";
    pub const AZURE_VISUALIZER: &str = "azure_visualizer";

    pub const DDG_SEARCH: &str = "ddg_search";
    pub const BRAVE_SEARCH: &str = "brave_search";
    pub const GOOGLE_SEARCH: &str = "google_search";
    pub const WEB_SEARCH: &str = "web_search";
    pub const NEWS_SEARCH: &str = "news_search";

    pub const DEEP_RESEARCH: &str = "deep_research";
    pub const MEETING_CREATOR: &str = "meeting_creator";
    pub const PDF_EXPORT: &str = "pdf_export";
    pub const SCHEDULED_TASKS: &str = "scheduled_tasks";
    pub const DELETE_SCHEDULED_TASKS: &str = "delete_scheduled_tasks";

    pub const LINKEDIN_FRESH_DATA: &str = "linkedin_fresh_data";
    pub const LINKEDIN_DATA_API: &str = "linkedin_data_api";
}

/// Tool clusters used to compose `ProcessingInstructions.allowed_tools`,
/// grounded on the source's `COMMON_TOOLS`/`SEARCH_TOOLS`/`RESEARCH_TOOLS`.
pub const COMMON_TOOLS: &[&str] = &[
    names::ATTACHMENT_PROCESSOR,
    names::CITATION_AWARE_VISIT,
    names::PYTHON_INTERPRETER,
    names::REFERENCES_GENERATOR,
    names::AZURE_VISUALIZER,
    names::PDF_EXPORT,
];

pub const SEARCH_TOOLS: &[&str] = &[names::WEB_SEARCH, names::WIKIPEDIA_SEARCH, names::GOOGLE_SEARCH];

pub const RESEARCH_TOOLS: &[&str] =
    &[names::DEEP_RESEARCH, names::LINKEDIN_FRESH_DATA, names::LINKEDIN_DATA_API];

/// Everything a `Tool` implementation needs besides its own arguments: the
/// request-scoped attachment blobs and the sender's address (for tools like
/// `scheduled_tasks` that must record an owner).
pub struct ToolContext<'a> {
    pub attachments: &'a AttachmentStore,
    pub sender_email: &'a str,
    /// Snapshot of the citations collected so far this run, for tools like
    /// `generate_references` that render the ledger mid-conversation. Tools
    /// never mutate it directly — new citations flow back through the
    /// returned `ToolOutputWithCitations.citations` and are merged by the
    /// agent loop.
    pub ledger: &'a CitationLedger,
    /// The `EmailRequest` driving this agent run — needed by
    /// `scheduled_tasks`/`delete_scheduled_tasks` to read `scheduled_task_id`
    /// (the recursion guard) and to build the persisted task template.
    pub source_request: &'a EmailRequest,
    /// Present only for handles whose `allowed_tools` includes
    /// `scheduled_tasks`/`delete_scheduled_tasks`; `None` for every other
    /// handle's run, since most tool calls have no business touching the
    /// scheduler.
    pub task_store: Option<&'a TaskStore>,
}

/// Structured tool output, merged into the agent's `CitationLedger` by the
/// caller. Mirrors the wire shape in:
/// `{content, citations?:{sources[]}, metadata?}`.
#[derive(Debug, Clone, Default)]
pub struct ToolOutputWithCitations {
    pub content: String,
    pub citations: Vec<CitationSource>,
    pub metadata: Option<Json>,
}

impl ToolOutputWithCitations {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), citations: Vec::new(), metadata: None }
    }
}

/// A single callable capability exposed to the agent loop. Implementations
/// are request-independent (registered once at startup) and receive
/// per-request state through `ToolContext`.
pub trait Tool: Send + Sync {
    /// The `ToolName` string this implementation answers to.
    fn name(&self) -> &'static str;

    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>>;
}

/// Read-mostly name -> `Tool` map, shared read-only across workers.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any existing registration under the same
    /// name, matching a reload of the same tool set.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve the subset of `allowed` names that are actually registered,
    /// in the order given — the Agent exposes only this intersection to the
    /// model.
    #[must_use]
    pub fn resolve(&self, allowed: &[String]) -> Vec<Arc<dyn Tool>> {
        allowed.iter().filter_map(|name| self.get(name)).collect()
    }

    /// Dispatch a call by name, erroring with `ToolError` if unregistered.
    pub async fn call(
        &self,
        cx: &Cx,
        name: &str,
        args: Json,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputWithCitations> {
        let tool = self.get(name).ok_or_else(|| Error::ToolError {
            tool_name: name.to_string(),
            message: "no such tool registered".to_string(),
        })?;
        tool.call(cx, args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn call<'a>(
            &'a self,
            _cx: &'a Cx,
            args: Json,
            _ctx: &'a ToolContext<'a>,
        ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
            Box::pin(async move { Ok(ToolOutputWithCitations::text(args.to_string())) })
        }
    }

    #[test]
    fn register_and_get_roundtrips() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn resolve_preserves_order_and_drops_unregistered() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let allowed = vec!["missing".to_string(), "echo".to_string()];
        let resolved = registry.resolve(&allowed);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name(), "echo");
    }

    #[test]
    fn common_tools_cluster_matches_source() {
        assert!(COMMON_TOOLS.contains(&names::ATTACHMENT_PROCESSOR));
        assert!(COMMON_TOOLS.contains(&names::PDF_EXPORT));
        assert_eq!(COMMON_TOOLS.len(), 6);
    }

    #[test]
    fn research_tools_cluster_matches_source() {
        assert_eq!(RESEARCH_TOOLS, &[names::DEEP_RESEARCH, names::LINKEDIN_FRESH_DATA, names::LINKEDIN_DATA_API]);
    }
}
