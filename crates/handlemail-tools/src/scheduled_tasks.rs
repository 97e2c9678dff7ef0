//! `scheduled_tasks`: creates a recurring or one-shot task from the `schedule`
//! handle.
//!
//! No Python tool file in the source covers this path (schedule extraction
//! there lives in the handle's processing pipeline, not a callable tool), so
//! this is grounded directly on the create-task sequence: validate
//! the cron expression and its minimum firing interval, enforce the per-owner
//! task ceiling and the recursion guard, then persist
//! `Initialised -> register job -> Active`.

use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::config::{SCHEDULED_TASKS_MAX_PER_EMAIL, SCHEDULED_TASKS_MINIMUM_INTERVAL_HOURS};
use handlemail_core::models::{EmailRequest, ScheduledTask, ScheduledTaskStatus};
use handlemail_core::{Error, Result};
use handlemail_db::TaskStore;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::capability::SchedulerHandle;
use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

/// Computes the shortest interval (in minutes) between firings implied by a
/// 5-field cron expression, under the simplified "standard interpretation"
/// this module enforces: a wildcard or complex pattern in a field is treated
/// as firing on every tick of that field's granularity; a `*/n` step is
/// treated as firing every `n` units; anything pinned down is read at the
/// next coarser granularity.
fn minimum_interval_minutes(cron: &str) -> std::result::Result<u64, String> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return Err(format!("cron expression '{cron}' must have exactly 5 fields, got {}", fields.len()));
    };

    if *minute == "*" || is_wildcard_list(minute) {
        return Ok(1);
    }
    if let Some(step) = step_value(minute) {
        return Ok(step);
    }
    // Minute is pinned to a fixed value from here on.
    if *hour == "*" || is_wildcard_list(hour) {
        return Ok(60);
    }
    if let Some(step) = step_value(hour) {
        return Ok(step * 60);
    }
    // Both minute and hour are pinned: fires at most once per day, unless
    // day-of-month/day-of-week narrow it further.
    if *dom == "*" && *dow == "*" {
        return Ok(24 * 60);
    }
    if *dow != "*" {
        return Ok(7 * 24 * 60);
    }
    if *month == "*" {
        return Ok(30 * 24 * 60);
    }
    Ok(365 * 24 * 60)
}

fn is_wildcard_list(field: &str) -> bool {
    field.contains(',') || field.contains('-')
}

fn step_value(field: &str) -> Option<u64> {
    field.strip_prefix("*/").and_then(|n| n.parse().ok())
}

pub struct ScheduledTasksTool {
    task_store: Arc<TaskStore>,
    scheduler: Arc<dyn SchedulerHandle>,
}

impl ScheduledTasksTool {
    #[must_use]
    pub fn new(task_store: Arc<TaskStore>, scheduler: Arc<dyn SchedulerHandle>) -> Self {
        Self { task_store, scheduler }
    }
}

impl Tool for ScheduledTasksTool {
    fn name(&self) -> &'static str {
        names::SCHEDULED_TASKS
    }

    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            if ctx.source_request.scheduled_task_id.is_some() {
                return Err(Error::RecursiveSchedulingNotAllowed);
            }

            let cron_expression = args.get("cron_expression").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::SCHEDULED_TASKS.to_string(),
                message: "missing required string argument 'cron_expression'".to_string(),
            })?;
            let task_description = args.get("task_description").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::SCHEDULED_TASKS.to_string(),
                message: "missing required string argument 'task_description'".to_string(),
            })?;

            let interval_minutes = minimum_interval_minutes(cron_expression).map_err(|message| Error::ToolError {
                tool_name: names::SCHEDULED_TASKS.to_string(),
                message,
            })?;
            let min_interval_secs = SCHEDULED_TASKS_MINIMUM_INTERVAL_HOURS * 3600;
            if interval_minutes * 60 < min_interval_secs {
                return Err(Error::ScheduledTaskTooFrequent {
                    cron: cron_expression.to_string(),
                    min_interval_secs,
                });
            }

            let start_time = parse_optional_naive(&args, "start_time")?;
            let expiry_time = parse_optional_naive(&args, "expiry_time")?;

            let owner_email = ctx.sender_email.to_string();
            let task_store = ctx.task_store.unwrap_or_else(|| self.task_store.as_ref());
            let active_count = task_store.count_active_for_owner(cx, &owner_email).await.map_err(db_err)?;
            if active_count >= SCHEDULED_TASKS_MAX_PER_EMAIL {
                return Err(Error::TaskLimitReached {
                    owner_email,
                    count: active_count,
                    limit: SCHEDULED_TASKS_MAX_PER_EMAIL,
                });
            }

            let mut template: EmailRequest = ctx.source_request.clone();
            template.distilled_instructions = Some(task_description.to_string());
            template.distilled_alias = Some("ask".to_string());
            template.scheduled_task_id = None;
            template.parent_message_id = Some(ctx.source_request.message_id.clone());

            let now = chrono::Utc::now().naive_utc();
            let task_id = Uuid::new_v4();
            let mut task = ScheduledTask {
                task_id,
                owner_email: ctx.sender_email.to_string(),
                cron_expression: cron_expression.to_string(),
                scheduler_job_id: None,
                status: ScheduledTaskStatus::Initialised,
                email_request: template,
                start_time,
                expiry_time,
                created_at: now,
                updated_at: now,
            };
            task_store.create(cx, &task).await.map_err(db_err)?;

            let job_id = self.scheduler.register(task_id, cron_expression)?;
            task_store.set_scheduler_job_id(cx, task_id, &job_id).await.map_err(db_err)?;
            task_store.set_status(cx, task_id, ScheduledTaskStatus::Active).await.map_err(db_err)?;
            task.scheduler_job_id = Some(job_id);

            Ok(ToolOutputWithCitations::text(format!(
                "Scheduled task {task_id} created with cron '{cron_expression}' (minimum interval {interval_minutes} min)."
            )))
        })
    }
}

fn parse_optional_naive(args: &Json, key: &str) -> Result<Option<chrono::NaiveDateTime>> {
    let Some(raw) = args.get(key).and_then(Json::as_str) else {
        return Ok(None);
    };
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(Some)
        .map_err(|e| Error::ToolError {
            tool_name: names::SCHEDULED_TASKS.to_string(),
            message: format!("invalid {key} '{raw}': {e}"),
        })
}

fn db_err(e: handlemail_db::DbError) -> Error {
    Error::ToolError { tool_name: names::SCHEDULED_TASKS.to_string(), message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NullScheduler;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::LazyLock;

    static REQUEST: LazyLock<EmailRequest> = LazyLock::new(crate::test_support::sample_request);

    fn ctx<'a>(
        attachments: &'a crate::attachments::AttachmentStore,
        ledger: &'a crate::citation::CitationLedger,
        request: &'a EmailRequest,
        task_store: &'a TaskStore,
    ) -> ToolContext<'a> {
        ToolContext {
            attachments,
            sender_email: "alice@example.com",
            ledger,
            source_request: request,
            task_store: Some(task_store),
        }
    }

    fn rt_cx() -> (asupersync::runtime::Runtime, Cx) {
        (RuntimeBuilder::current_thread().build().expect("build runtime"), Cx::for_testing())
    }

    /// A single-connection in-memory pool: `SQLite`'s `:memory:` database is
    /// private to the connection that opened it, so the pool must be pinned
    /// to exactly one connection for every acquire in a test to see the same
    /// data.
    fn memory_pool() -> handlemail_db::DbPool {
        let config = handlemail_db::DbPoolConfig {
            database_url: "sqlite://:memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout_ms: 5_000,
            max_lifetime_ms: 60_000,
        };
        handlemail_db::DbPool::new(&config).expect("build in-memory pool")
    }

    #[test]
    fn every_minute_cron_is_too_frequent() {
        assert!(minimum_interval_minutes("* * * * *").unwrap() < SCHEDULED_TASKS_MINIMUM_INTERVAL_HOURS * 60);
    }

    #[test]
    fn step_minute_cron_reports_step_as_interval() {
        assert_eq!(minimum_interval_minutes("*/15 * * * *").unwrap(), 15);
    }

    #[test]
    fn daily_cron_is_one_day() {
        assert_eq!(minimum_interval_minutes("30 9 * * *").unwrap(), 24 * 60);
    }

    #[test]
    fn weekly_cron_via_day_of_week() {
        assert_eq!(minimum_interval_minutes("0 9 * * 1").unwrap(), 7 * 24 * 60);
    }

    #[test]
    fn malformed_cron_is_rejected() {
        assert!(minimum_interval_minutes("* * *").is_err());
    }

    #[test]
    fn creates_task_and_activates_it() {
        let (rt, cx) = rt_cx();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let tool = ScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let out = tool
                .call(
                    &cx,
                    serde_json::json!({"cron_expression": "0 9 * * *", "task_description": "send me a daily digest"}),
                    &ctx(&attachments, &ledger, &REQUEST, &store),
                )
                .await
                .unwrap();
            assert!(out.content.contains("Scheduled task"));
            let count = store.count_active_for_owner(&cx, "alice@example.com").await.unwrap();
            assert_eq!(count, 1);
        });
    }

    #[test]
    fn rejects_too_frequent_cron() {
        let (rt, cx) = rt_cx();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let tool = ScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let result = tool
                .call(
                    &cx,
                    serde_json::json!({"cron_expression": "* * * * *", "task_description": "spam me"}),
                    &ctx(&attachments, &ledger, &REQUEST, &store),
                )
                .await;
            assert!(matches!(result, Err(Error::ScheduledTaskTooFrequent { .. })));
        });
    }

    #[test]
    fn refuses_recursive_scheduling() {
        let (rt, cx) = rt_cx();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let mut request = crate::test_support::sample_request();
            request.scheduled_task_id = Some(Uuid::new_v4());
            request.parent_message_id = Some("orig@handlemail.ai".to_string());
            let tool = ScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let result = tool
                .call(
                    &cx,
                    serde_json::json!({"cron_expression": "0 9 * * *", "task_description": "again"}),
                    &ctx(&attachments, &ledger, &request, &store),
                )
                .await;
            assert!(matches!(result, Err(Error::RecursiveSchedulingNotAllowed)));
        });
    }
}
