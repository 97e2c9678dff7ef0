//! External-service capability traits.
//!
//! Individual tool implementations (web search, LinkedIn lookup, PDF
//! rendering, image QA, calendar ICS construction) sit behind interfaces the
//! tool layer composes rather than reimplements, the same way
//! `EmailDeliverer`/`PlanOracle` are capabilities the server layer composes.
//! Each trait here is the seam a real provider plugs into; the `Unconfigured`
//! implementation is what's wired up absent an API key, matching the
//! source's own behavior of raising when a provider's key is missing
//! (`tools/web_search/google_search.py`: "Google Search API not configured").

use handlemail_core::{Error, Result};

/// One hit from a web search provider.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A search engine backend (Google/SerpAPI, Brave, DuckDuckGo, Wikipedia, news).
pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Always errors, naming the engine, matching the source's "API not
/// configured" `ValueError` path when no provider key is present.
pub struct UnconfiguredSearch {
    pub engine: &'static str,
}

impl SearchProvider for UnconfiguredSearch {
    fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Err(Error::ToolError {
            tool_name: self.engine.to_string(),
            message: format!("{} is not configured: no provider key available", self.engine),
        })
    }
}

/// A fetched webpage's extracted content and title.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: String,
    pub content: String,
}

/// Fetches and extracts readable content from a URL (`citation_aware_visit`'s
/// inner `VisitWebpageTool`).
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

pub struct UnconfiguredFetcher;

impl PageFetcher for UnconfiguredFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Err(Error::ToolError {
            tool_name: "citation_aware_visit".to_string(),
            message: format!("no page fetcher configured to visit {url}"),
        })
    }
}

/// Structured payload from a paid external data API (LinkedIn fresh-data /
/// data-api, deep-research aggregators), grounded on
/// `tools/external_data/linkedin`'s RapidAPI-backed shape.
#[derive(Debug, Clone)]
pub struct ExternalDataResult {
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
}

pub trait ExternalDataProvider: Send + Sync {
    /// `source` names the specific provider (e.g. `"linkedin_fresh_data"`)
    /// so one `Unconfigured` impl can serve every provider-backed tool.
    fn fetch(&self, source: &str, query: &str) -> Result<ExternalDataResult>;
}

pub struct UnconfiguredExternalData;

impl ExternalDataProvider for UnconfiguredExternalData {
    fn fetch(&self, source: &str, _query: &str) -> Result<ExternalDataResult> {
        Err(Error::ToolError {
            tool_name: source.to_string(),
            message: format!("{source} is not configured: no RapidAPI key available"),
        })
    }
}

/// Answers a question about image bytes (`visual_qa_tool.py`'s Azure/OpenAI
/// visualizer backends).
pub trait ImageAnalyzer: Send + Sync {
    fn analyze(&self, bytes: &[u8], mime_type: &str, question: Option<&str>) -> Result<String>;
}

pub struct UnconfiguredImageAnalyzer;

impl ImageAnalyzer for UnconfiguredImageAnalyzer {
    fn analyze(&self, _bytes: &[u8], _mime_type: &str, _question: Option<&str>) -> Result<String> {
        Err(Error::ToolError {
            tool_name: "azure_visualizer".to_string(),
            message: "no image analysis backend configured".to_string(),
        })
    }
}

/// Renders a PDF document body to bytes (`pdf_export_tool.py`'s
/// markdown-to-PDF pipeline; `ReportFormatter` supplies the markdown).
pub trait PdfRenderer: Send + Sync {
    fn render(&self, title: &str, markdown_body: &str) -> Result<Vec<u8>>;
}

pub struct UnconfiguredPdfRenderer;

impl PdfRenderer for UnconfiguredPdfRenderer {
    fn render(&self, _title: &str, _markdown_body: &str) -> Result<Vec<u8>> {
        Err(Error::ToolError { tool_name: "pdf_export".to_string(), message: "no PDF renderer configured".to_string() })
    }
}

/// Renders an iCalendar (`.ics`) event body (`meeting_creator`'s output).
pub trait IcsRenderer: Send + Sync {
    fn render(&self, summary: &str, description: &str, start: chrono::NaiveDateTime, duration_minutes: i64) -> String;
}

/// A minimal, always-available RFC 5545 writer — no external dependency is
/// needed to emit a valid single-event `.ics` body, so this is the default
/// rather than an `Unconfigured` stub.
pub struct IcalendarRenderer;

impl IcsRenderer for IcalendarRenderer {
    fn render(&self, summary: &str, description: &str, start: chrono::NaiveDateTime, duration_minutes: i64) -> String {
        let end = start + chrono::Duration::minutes(duration_minutes);
        let fmt = "%Y%m%dT%H%M%S";
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//handlemail//meeting//EN\r\nBEGIN:VEVENT\r\nSUMMARY:{summary}\r\nDESCRIPTION:{description}\r\nDTSTART:{start}\r\nDTEND:{end}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            summary = ics_escape(summary),
            description = ics_escape(description),
            start = start.format(fmt),
            end = end.format(fmt),
        )
    }
}

/// Registers/deregisters a live cron job with the running `Scheduler` as
/// part of the create-task sequence. `handlemail-tools` doesn't own the cron
/// runtime — that lives in the
/// server crate alongside the rest of the `Scheduler` — so this is the seam
/// the `scheduled_tasks`/`delete_scheduled_tasks` tools call through.
pub trait SchedulerHandle: Send + Sync {
    /// Registers a job for `task_id` on `cron_expression`, returning an
    /// opaque `scheduler_job_id` to persist alongside the row.
    fn register(&self, task_id: uuid::Uuid, cron_expression: &str) -> Result<String>;

    /// Deregisters a previously-registered job. Idempotent: deregistering
    /// an unknown or already-removed id is not an error.
    fn deregister(&self, scheduler_job_id: &str);
}

/// A handle with nothing live behind it yet — registration succeeds and
/// hands back a synthetic id, but no job actually fires. Useful until the
/// server crate's real cron-backed `Scheduler` is wired in, and in tests.
pub struct NullScheduler;

impl SchedulerHandle for NullScheduler {
    fn register(&self, task_id: uuid::Uuid, _cron_expression: &str) -> Result<String> {
        Ok(format!("null-job-{task_id}"))
    }

    fn deregister(&self, _scheduler_job_id: &str) {}
}

/// Resolves a sender's subscription plan for the rate limiter. Backed by a
/// payment provider in a real deployment; the server composes this the same
/// way it composes `EmailDeliverer`.
pub trait PlanOracle: Send + Sync {
    fn plan_for(&self, email: &str) -> handlemail_core::config::RateLimitPlan;
}

/// No payment-provider integration wired up: every sender is treated as
/// BETA. Matches the source's own fallback when a plan lookup fails or the
/// account has no PRO product id on file — unlike the other `Unconfigured*`
/// stubs in this file, absence here is not an error condition.
pub struct UnconfiguredPlanOracle;

impl PlanOracle for UnconfiguredPlanOracle {
    fn plan_for(&self, _email: &str) -> handlemail_core::config::RateLimitPlan {
        handlemail_core::config::RateLimitPlan::Beta
    }
}

fn ics_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace(',', "\\,").replace(';', "\\;").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_search_errors_by_engine_name() {
        let provider = UnconfiguredSearch { engine: "google_search" };
        let err = provider.search("rust").unwrap_err();
        assert!(matches!(err, Error::ToolError { tool_name, .. } if tool_name == "google_search"));
    }

    #[test]
    fn unconfigured_plan_oracle_falls_back_to_beta() {
        assert_eq!(UnconfiguredPlanOracle.plan_for("anyone@example.com"), handlemail_core::config::RateLimitPlan::Beta);
    }

    #[test]
    fn icalendar_renderer_produces_matched_dtstart_dtend() {
        let start = chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let ics = IcalendarRenderer.render("Sync", "Weekly sync", start, 30);
        assert!(ics.contains("DTSTART:20260801T090000"));
        assert!(ics.contains("DTEND:20260801T093000"));
        assert!(ics.starts_with("BEGIN:VCALENDAR"));
    }

    #[test]
    fn ics_escape_handles_special_characters() {
        assert_eq!(ics_escape("a, b; c\nd"), "a\\, b\\; c\\nd");
    }
}
