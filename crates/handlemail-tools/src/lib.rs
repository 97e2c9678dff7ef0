//! Tool layer: the registry and individual tool implementations the agent
//! loop dispatches `tool_call`s through, plus the attachment store and
//! citation ledger every tool reads and writes against.
//!
//! Grounded on a tool/dispatch split
//! (`fastmcp_server`/`mcp-agent-mail-tools`), generalized from its
//! agent-coordination tool set to the search/fetch/document/scheduling tools
//! `original_source/mxtoai/tools` defines.

pub mod attachment_processor;
pub mod attachments;
pub mod capability;
pub mod citation;
pub mod citation_aware_visit;
pub mod compute;
pub mod delete_scheduled_tasks;
pub mod documents;
pub mod external_data;
pub mod references;
pub mod registry;
pub mod scheduled_tasks;
pub mod search;
pub mod visual;

#[cfg(test)]
pub(crate) mod test_support;

pub use attachment_processor::AttachmentProcessorTool;
pub use attachments::{validate_attachments, AttachmentStore, StoredAttachment};
pub use capability::{
    ExternalDataProvider, ExternalDataResult, FetchedPage, IcalendarRenderer, IcsRenderer, ImageAnalyzer,
    NullScheduler, PageFetcher, PdfRenderer, PlanOracle, SchedulerHandle, SearchHit, SearchProvider,
    UnconfiguredExternalData, UnconfiguredFetcher, UnconfiguredImageAnalyzer, UnconfiguredPdfRenderer,
    UnconfiguredPlanOracle, UnconfiguredSearch,
};
pub use citation::CitationLedger;
pub use citation_aware_visit::CitationAwareVisitTool;
pub use compute::PythonInterpreterTool;
pub use delete_scheduled_tasks::DeleteScheduledTasksTool;
pub use documents::{MeetingCreatorTool, PdfExportTool};
pub use external_data::ExternalDataTool;
pub use references::ReferencesGeneratorTool;
pub use registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations, ToolRegistry, COMMON_TOOLS, RESEARCH_TOOLS, SEARCH_TOOLS};
pub use scheduled_tasks::ScheduledTasksTool;
pub use search::SearchTool;
pub use visual::VisualQaTool;
