//! `delete_scheduled_tasks`: cancels a task owned by the requesting sender.
//!
//! Verifies ownership, soft-deletes the row, deregisters the cron job. Both
//! steps are idempotent: deleting an already-deleted or
//! unknown-to-the-scheduler task is not an error.

use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::{Error, Result};
use handlemail_db::TaskStore;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::capability::SchedulerHandle;
use crate::registry::{names, BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

pub struct DeleteScheduledTasksTool {
    task_store: Arc<TaskStore>,
    scheduler: Arc<dyn SchedulerHandle>,
}

impl DeleteScheduledTasksTool {
    #[must_use]
    pub fn new(task_store: Arc<TaskStore>, scheduler: Arc<dyn SchedulerHandle>) -> Self {
        Self { task_store, scheduler }
    }
}

impl Tool for DeleteScheduledTasksTool {
    fn name(&self) -> &'static str {
        names::DELETE_SCHEDULED_TASKS
    }

    fn call<'a>(
        &'a self,
        cx: &'a Cx,
        args: Json,
        ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let task_id_str = args.get("task_id").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: names::DELETE_SCHEDULED_TASKS.to_string(),
                message: "missing required string argument 'task_id'".to_string(),
            })?;
            let task_id = Uuid::parse_str(task_id_str).map_err(|e| Error::ToolError {
                tool_name: names::DELETE_SCHEDULED_TASKS.to_string(),
                message: format!("invalid task_id '{task_id_str}': {e}"),
            })?;

            let task_store = ctx.task_store.unwrap_or_else(|| self.task_store.as_ref());
            let task = task_store.get(cx, task_id).await.map_err(db_err)?.ok_or_else(|| Error::ToolError {
                tool_name: names::DELETE_SCHEDULED_TASKS.to_string(),
                message: format!("scheduled task {task_id} not found"),
            })?;
            if task.owner_email != ctx.sender_email {
                return Err(Error::ToolError {
                    tool_name: names::DELETE_SCHEDULED_TASKS.to_string(),
                    message: format!("scheduled task {task_id} is not owned by {}", ctx.sender_email),
                });
            }

            task_store.soft_delete(cx, task_id).await.map_err(db_err)?;
            if let Some(job_id) = &task.scheduler_job_id {
                self.scheduler.deregister(job_id);
            }

            Ok(ToolOutputWithCitations::text(format!("Scheduled task {task_id} deleted.")))
        })
    }
}

fn db_err(e: handlemail_db::DbError) -> Error {
    Error::ToolError { tool_name: names::DELETE_SCHEDULED_TASKS.to_string(), message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NullScheduler;
    use asupersync::runtime::RuntimeBuilder;
    use handlemail_core::models::{EmailRequest, ScheduledTask, ScheduledTaskStatus};
    use std::sync::LazyLock;

    static REQUEST: LazyLock<EmailRequest> = LazyLock::new(crate::test_support::sample_request);

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

    fn ctx<'a>(
        attachments: &'a crate::attachments::AttachmentStore,
        ledger: &'a crate::citation::CitationLedger,
        task_store: &'a TaskStore,
    ) -> ToolContext<'a> {
        ToolContext {
            attachments,
            sender_email: "alice@example.com",
            ledger,
            source_request: &REQUEST,
            task_store: Some(task_store),
        }
    }

    async fn seed_task(store: &TaskStore, owner_email: &str) -> Uuid {
        let task_id = Uuid::new_v4();
        let now = chrono::Utc::now().naive_utc();
        let cx = Cx::for_testing();
        let task = ScheduledTask {
            task_id,
            owner_email: owner_email.to_string(),
            cron_expression: "0 9 * * *".to_string(),
            scheduler_job_id: Some("job-1".to_string()),
            status: ScheduledTaskStatus::Active,
            email_request: REQUEST.clone(),
            start_time: None,
            expiry_time: None,
            created_at: now,
            updated_at: now,
        };
        store.create(&cx, &task).await.unwrap();
        task_id
    }

    #[test]
    fn deletes_a_task_owned_by_the_sender() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let task_id = seed_task(&store, "alice@example.com").await;
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let tool = DeleteScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let out = tool
                .call(&cx, serde_json::json!({"task_id": task_id.to_string()}), &ctx(&attachments, &ledger, &store))
                .await
                .unwrap();
            assert!(out.content.contains("deleted"));
            let count = store.count_active_for_owner(&cx, "alice@example.com").await.unwrap();
            assert_eq!(count, 0);
        });
    }

    #[test]
    fn refuses_to_delete_another_owners_task() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let task_id = seed_task(&store, "mallory@example.com").await;
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let tool = DeleteScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let result = tool
                .call(&cx, serde_json::json!({"task_id": task_id.to_string()}), &ctx(&attachments, &ledger, &store))
                .await;
            assert!(result.is_err());
            let count = store.count_active_for_owner(&cx, "mallory@example.com").await.unwrap();
            assert_eq!(count, 1);
        });
    }

    #[test]
    fn errors_on_unknown_task_id() {
        let rt = RuntimeBuilder::current_thread().build().expect("build runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let pool = memory_pool();
            let store = TaskStore::new(pool.clone());
            let attachments = crate::attachments::AttachmentStore::new();
            let ledger = crate::citation::CitationLedger::new();
            let tool = DeleteScheduledTasksTool::new(Arc::new(TaskStore::new(pool.clone())), Arc::new(NullScheduler));
            let result = tool
                .call(&cx, serde_json::json!({"task_id": Uuid::new_v4().to_string()}), &ctx(&attachments, &ledger, &store))
                .await;
            assert!(result.is_err());
        });
    }
}
