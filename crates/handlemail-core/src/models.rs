//! Core data model shared across the pipeline: the inbound email request,
//! its attachments, the per-handle processing instructions, scheduled
//! tasks/runs, citation sources, and the whitelist row shape.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single email attachment as received by the ingress gateway.
///
/// Valid iff it carries inline bytes or a resolvable on-disk path — never
/// neither, per the source's attachment invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Inline bytes, present until the attachment has been persisted to disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// Path on disk under the attachments store, populated once persisted.
    pub stored_path: Option<String>,
}

impl EmailAttachment {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.content.is_some() || self.stored_path.is_some()
    }
}

/// A normalized inbound email, after parsing but before validation.
///
/// Field set grounded on the source's data model: the canonical in-flight
/// message carries enough of the original envelope (`cc`, `headers`,
/// `in_reply_to`) to thread a reply, plus the scheduler's recursion-guard
/// fields (`scheduled_task_id`, `parent_message_id`) and the distilled
/// re-injection fields a scheduled firing stashes for itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub message_id: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub bcc: Option<Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<EmailAttachment>,
    /// Present when this request was generated by a scheduled task run
    /// rather than an inbound message; used to block recursive scheduling.
    pub scheduled_task_id: Option<Uuid>,
    /// The message-id of the original request a scheduled task was created
    /// from. Required whenever `scheduled_task_id` is set.
    pub parent_message_id: Option<String>,
    /// Instructions distilled from the original creating request, stashed so
    /// a re-injected firing can run without the original attachments.
    pub distilled_instructions: Option<String>,
    /// The handle a re-injected firing should run under — always `ask` for
    /// scheduled re-injections.
    pub distilled_alias: Option<String>,
}

impl EmailRequest {
    /// The raw local-part taken from `to_email`, unnormalized. The
    /// `HandleResolver` is responsible for lower-casing and stripping any
    /// `+`-suffix before lookup.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.to_email.split('@').next().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn sender_domain(&self) -> Option<&str> {
        self.from_email.rsplit('@').next().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn total_attachment_bytes(&self) -> u64 {
        self.attachments.iter().map(|a| a.size_bytes).sum()
    }

    /// `scheduled_task_id` implies `parent_message_id`.
    #[must_use]
    pub fn has_valid_scheduling_linkage(&self) -> bool {
        self.scheduled_task_id.is_none() || self.parent_message_id.is_some()
    }
}

/// Per-handle behavior, resolved once per request by the `HandleResolver`.
///
/// Field set grounded on `original_source/mxtoai/email_handles.py`'s
/// `EmailHandleInstructions`, cross-checked against the smaller, older
/// `original_source/handle_configuration.py::EmailHandleInstructions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInstructions {
    pub handle: String,
    pub process_attachments: bool,
    pub deep_research_mandatory: bool,
    pub allowed_tools: Vec<String>,
    pub task_template: String,
    pub output_template: String,
    pub target_model_group: String,
    pub requires_language_detection: bool,
    pub requires_schedule_extraction: bool,
    /// Sent back to the sender instead of processing, when set (e.g. the
    /// `delete` handle never runs the agent loop).
    pub rejection_message: Option<String>,
    pub specific_research_instructions: Option<String>,
    pub add_summary: bool,
    /// Whether this handle runs the bounded tool-calling loop (`true`) or
    /// the single-shot direct-research path (`false`). 
    pub uses_agent_loop: bool,
}

/// Status of a scheduled task. State machine:
/// `Initialised -> Active -> {Executing <-> Active} -> {Finished | Deleted}`.
/// `Finished` and `Deleted` are terminal; a task in either stops firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskStatus {
    Initialised,
    Active,
    Executing,
    Finished,
    Deleted,
}

impl ScheduledTaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Deleted)
    }
}

/// A recurring or one-shot task created by the `schedule` handle.
///
/// `email_request` is the stored request to rehydrate at each firing: a
/// fresh `message_id` is stamped and `parent_message_id` set from the
/// original on each re-injection, but the template itself is persisted
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub owner_email: String,
    pub cron_expression: String,
    pub scheduler_job_id: Option<String>,
    pub status: ScheduledTaskStatus,
    pub email_request: EmailRequest,
    pub start_time: Option<NaiveDateTime>,
    pub expiry_time: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ScheduledTask {
    /// Eligible to fire at `now` per the active-task invariant: active,
    /// within its start/expiry window. Cron-match is checked separately by
    /// the caller (the `ScheduledTask` itself doesn't own a cron evaluator).
    #[must_use]
    pub fn eligible_at(&self, now: NaiveDateTime) -> bool {
        self.status == ScheduledTaskStatus::Active
            && self.start_time.is_none_or(|start| start <= now)
            && self.expiry_time.is_none_or(|expiry| now <= expiry)
    }
}

/// Outcome of a single scheduled task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Initialised,
    InProgress,
    Completed,
    Errored,
}

/// A record of one firing of a `ScheduledTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub status: TaskRunStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
}

impl TaskRun {
    /// A newly opened run, immediately `InProgress`.
    #[must_use]
    pub fn new_started(task_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_id,
            status: TaskRunStatus::InProgress,
            started_at: Utc::now().naive_utc(),
            finished_at: None,
            error_message: None,
        }
    }
}

/// A source cited by an agent run, tracked by the `CitationLedger`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CitationSource {
    WebPage { url: String, title: String, visited: bool },
    SearchResult { url: String, title: String, snippet: String },
    Attachment { filename: String },
    Api { title: String, url: Option<String> },
}

/// A row in the whitelist table. Grounded on `original_source/mxgo/whitelist.py`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistRow {
    pub email: String,
    pub verified: bool,
    pub verification_token: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> EmailRequest {
        EmailRequest {
            message_id: "abc@mail.example.com".into(),
            from_email: "alice@example.com".into(),
            to_email: "Summarize@handlemail.ai".into(),
            subject: "hi".into(),
            text_body: "body".into(),
            html_body: None,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
            cc: Vec::new(),
            bcc: None,
            headers: BTreeMap::new(),
            attachments: vec![
                EmailAttachment {
                    filename: "a.pdf".into(),
                    content_type: "application/pdf".into(),
                    size_bytes: 100,
                    content: None,
                    stored_path: Some("/data/a.pdf".into()),
                },
                EmailAttachment {
                    filename: "b.pdf".into(),
                    content_type: "application/pdf".into(),
                    size_bytes: 200,
                    content: Some(vec![1, 2, 3]),
                    stored_path: None,
                },
            ],
            scheduled_task_id: None,
            parent_message_id: None,
            distilled_instructions: None,
            distilled_alias: None,
        }
    }

    #[test]
    fn handle_is_taken_verbatim_from_local_part() {
        let req = sample_request();
        assert_eq!(req.handle(), Some("Summarize"));
    }

    #[test]
    fn sender_domain_extracted_after_at() {
        let req = sample_request();
        assert_eq!(req.sender_domain(), Some("example.com"));
    }

    #[test]
    fn total_attachment_bytes_sums_all_parts() {
        let req = sample_request();
        assert_eq!(req.total_attachment_bytes(), 300);
    }

    #[test]
    fn handle_is_none_for_malformed_address() {
        let mut req = sample_request();
        req.to_email = "@handlemail.ai".into();
        assert_eq!(req.handle(), None);
    }

    #[test]
    fn attachment_requires_content_or_path() {
        let missing_both = EmailAttachment {
            filename: "c.pdf".into(),
            content_type: "application/pdf".into(),
            size_bytes: 0,
            content: None,
            stored_path: None,
        };
        assert!(!missing_both.is_valid());
    }

    #[test]
    fn scheduling_linkage_requires_parent_message_id() {
        let mut req = sample_request();
        assert!(req.has_valid_scheduling_linkage());
        req.scheduled_task_id = Some(Uuid::new_v4());
        assert!(!req.has_valid_scheduling_linkage());
        req.parent_message_id = Some("orig@mail.example.com".into());
        assert!(req.has_valid_scheduling_linkage());
    }

    #[test]
    fn task_run_new_started_is_in_progress() {
        let run = TaskRun::new_started(Uuid::new_v4());
        assert_eq!(run.status, TaskRunStatus::InProgress);
        assert!(run.finished_at.is_none());
        assert!(run.error_message.is_none());
    }

    #[test]
    fn scheduled_task_status_terminal_states() {
        assert!(!ScheduledTaskStatus::Active.is_terminal());
        assert!(!ScheduledTaskStatus::Executing.is_terminal());
        assert!(ScheduledTaskStatus::Finished.is_terminal());
        assert!(ScheduledTaskStatus::Deleted.is_terminal());
    }

    #[test]
    fn scheduled_task_eligible_only_within_window_and_active() {
        let now = Utc::now().naive_utc();
        let base = ScheduledTask {
            task_id: Uuid::new_v4(),
            owner_email: "alice@example.com".into(),
            cron_expression: "0 9 * * 1".into(),
            scheduler_job_id: None,
            status: ScheduledTaskStatus::Active,
            email_request: sample_request(),
            start_time: None,
            expiry_time: None,
            created_at: now,
            updated_at: now,
        };
        assert!(base.eligible_at(now));

        let mut not_started = base.clone();
        not_started.start_time = Some(now + chrono::Duration::hours(1));
        assert!(!not_started.eligible_at(now));

        let mut expired = base.clone();
        expired.expiry_time = Some(now - chrono::Duration::hours(1));
        assert!(!expired.eligible_at(now));

        let mut finished = base;
        finished.status = ScheduledTaskStatus::Finished;
        assert!(!finished.eligible_at(now));
    }
}
