//! The worker pool: leases jobs off [`WorkQueueStore`], runs the shared
//! [`Agent`] against each, and delivers or retries the result.
//!
//! Blocking entrypoint in the same shape as [`crate::ingress::run_http`]:
//! one dedicated runtime, connected once at startup, serving until the
//! process is killed. No separate daemon-thread/shutdown-flag pair here —
//! `main` is expected to run the gateway and the worker pool as two
//! blocking calls on two threads (or two processes), exactly as it runs
//! `run_http` on its own thread today.

use std::sync::Arc;
use std::time::Duration;

use asupersync::runtime::RuntimeBuilder;
use asupersync::time::wall_now;
use asupersync::{Budget, Cx};
use handlemail_agent::{Agent, HandleResolver, RoutedModelClient};
use handlemail_core::config::Config;
use handlemail_core::models::EmailRequest;
use handlemail_core::{Error, Result};
use handlemail_db::{DbPool, DbPoolConfig, LeasedJob, TaskStore, WorkQueueStore};
use handlemail_kv::{IdempotencyStore, KvClient};
use handlemail_tools::{
    names, AttachmentProcessorTool, AttachmentStore, CitationAwareVisitTool, DeleteScheduledTasksTool,
    ExternalDataTool, IcalendarRenderer, MeetingCreatorTool, NullScheduler, PdfExportTool,
    PythonInterpreterTool, ReferencesGeneratorTool, ScheduledTasksTool, SearchTool, ToolRegistry,
    UnconfiguredExternalData, UnconfiguredFetcher, UnconfiguredImageAnalyzer, UnconfiguredPdfRenderer,
    UnconfiguredSearch, VisualQaTool,
};
use uuid::Uuid;

use crate::delivery::{EmailDeliverer, LoggingDeliverer, OutgoingAttachment, OutgoingReply};

/// Everything one lease-process-ack cycle needs, built once at startup and
/// shared behind an `Arc` across every iteration of the poll loop.
struct WorkerState {
    config: Config,
    work_queue: WorkQueueStore,
    handles: HandleResolver,
    agent: Agent,
    idempotency: IdempotencyStore,
    deliverer: Box<dyn EmailDeliverer>,
}

impl WorkerState {
    async fn connect(cx: &Cx, config: Config) -> Result<Self> {
        let idempotency_kv = KvClient::connect(cx, &config.kv_url()).await?;
        let db_pool = DbPool::new(&DbPoolConfig::from_database_url(config.database_url()))
            .map_err(|e| Error::Internal(format!("db pool init failed: {e}")))?;

        let task_store = Arc::new(TaskStore::new(db_pool.clone()));
        let model_client = Arc::new(RoutedModelClient::load(&config.model_config_path, &config.default_model_group)?);
        let tool_registry = Arc::new(build_tool_registry(task_store));

        // Same dry-run-until-a-relay-exists posture as `AppState::connect`.
        let deliverer: Box<dyn EmailDeliverer> = Box::new(LoggingDeliverer);

        Ok(Self {
            work_queue: WorkQueueStore::new(db_pool),
            handles: HandleResolver::with_defaults(),
            agent: Agent::new(model_client, tool_registry),
            idempotency: IdempotencyStore::new(idempotency_kv),
            deliverer,
            config,
        })
    }
}

/// Registers one `Tool` per name any handle's `allowed_tools` can resolve
/// to (`COMMON_TOOLS` ∪ `SEARCH_TOOLS` ∪ `RESEARCH_TOOLS` ∪ the two
/// scheduling tools), backed by `Unconfigured*` providers where this
/// deployment carries no real API credentials.
fn build_tool_registry(task_store: Arc<TaskStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(AttachmentProcessorTool));
    registry.register(Arc::new(CitationAwareVisitTool::new(Arc::new(UnconfiguredFetcher))));
    registry.register(Arc::new(PythonInterpreterTool));
    registry.register(Arc::new(ReferencesGeneratorTool));
    registry.register(Arc::new(VisualQaTool::new(Arc::new(UnconfiguredImageAnalyzer))));
    registry.register(Arc::new(PdfExportTool::new(Arc::new(UnconfiguredPdfRenderer))));

    registry.register(Arc::new(SearchTool::new(names::WEB_SEARCH, Arc::new(UnconfiguredSearch { engine: names::WEB_SEARCH }))));
    registry.register(Arc::new(SearchTool::new(
        names::WIKIPEDIA_SEARCH,
        Arc::new(UnconfiguredSearch { engine: names::WIKIPEDIA_SEARCH }),
    )));
    registry.register(Arc::new(SearchTool::new(
        names::GOOGLE_SEARCH,
        Arc::new(UnconfiguredSearch { engine: names::GOOGLE_SEARCH }),
    )));

    registry.register(Arc::new(ExternalDataTool::new(names::DEEP_RESEARCH, Arc::new(UnconfiguredExternalData))));
    registry.register(Arc::new(ExternalDataTool::new(names::LINKEDIN_FRESH_DATA, Arc::new(UnconfiguredExternalData))));
    registry.register(Arc::new(ExternalDataTool::new(names::LINKEDIN_DATA_API, Arc::new(UnconfiguredExternalData))));

    registry.register(Arc::new(MeetingCreatorTool::new(Arc::new(IcalendarRenderer))));

    // `NullScheduler` here is not a placeholder: the worker process and
    // `scheduler::run_scheduler`'s process share nothing but the
    // `scheduled_tasks` table, so a job id minted here by `register()` would
    // never reach the process that actually ticks. `ScheduledTasksTool` only
    // needs an opaque id to persist; `Scheduler::sync_active_tasks` is what
    // actually discovers and registers the new row once it's `Active`.
    let scheduler = Arc::new(NullScheduler);
    registry.register(Arc::new(ScheduledTasksTool::new(Arc::clone(&task_store), Arc::clone(&scheduler))));
    registry.register(Arc::new(DeleteScheduledTasksTool::new(task_store, scheduler)));

    registry
}

/// `asupersync` exposes `timeout` but no bare sleep; awaiting a
/// never-resolving future against a timeout gets the same effect without
/// inventing a timer primitive the runtime doesn't have.
async fn sleep(duration: Duration) {
    let never = std::future::pending::<()>();
    let _ = asupersync::time::timeout(wall_now(), duration, never).await;
}

fn request_cx(timeout_secs: u64) -> Cx {
    let budget = if timeout_secs == 0 {
        Budget::INFINITE
    } else {
        Budget::new().with_deadline(wall_now() + Duration::from_secs(timeout_secs))
    };
    Cx::for_request_with_budget(budget)
}

/// Rebuild the `AttachmentStore` for one leased job by reading each
/// attachment's bytes back off disk via its `stored_path` (`None`/`inline`
/// entries are skipped — a handle that didn't persist attachments never set
/// `stored_path`, and the agent run for that handle doesn't read them).
fn load_attachments(request: &EmailRequest) -> AttachmentStore {
    let mut store = AttachmentStore::new();
    for attachment in &request.attachments {
        let Some(path) = attachment.stored_path.as_deref() else { continue };
        match std::fs::read(path) {
            Ok(bytes) => store.insert(attachment.filename.clone(), attachment.content_type.clone(), bytes),
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to read attachment off disk; skipping");
            }
        }
    }
    store
}

/// Build the final outbound reply from a completed agent run, adapting
/// `validators::reply_shell`'s envelope-threading shape to the agent's
/// richer result (body plus any generated files).
fn build_reply(request: &EmailRequest, result: &handlemail_agent::DetailedEmailProcessingResult) -> OutgoingReply {
    let message_id = (!request.message_id.is_empty()).then(|| request.message_id.clone());
    OutgoingReply {
        to: request.from_email.clone(),
        from: request.to_email.clone(),
        subject: format!("Re: {}", request.subject),
        in_reply_to: message_id.clone(),
        references: message_id.into_iter().collect(),
        text: result.text_body.clone(),
        html: result.html_body.clone(),
        attachments: result
            .generated_files
            .iter()
            .map(|(filename, mime, bytes)| OutgoingAttachment::new(filename.clone(), mime.clone(), bytes))
            .collect(),
    }
}

/// Backoff applied on `nack`: grows with attempt count so a flaky
/// downstream (model router, delivery relay) gets progressively more room
/// before the next retry, capped at the job time limit itself so a backoff
/// is never longer than just re-running the job would take anyway.
fn backoff_for_attempt(attempts: u32) -> u64 {
    let base = handlemail_core::config::WORK_QUEUE_MIN_BACKOFF_SECS;
    base.saturating_mul(1 << attempts.min(4)).min(handlemail_core::config::WORK_QUEUE_JOB_TIME_LIMIT_SECS)
}

/// Process one leased job end to end: resolve its handle, run the agent
/// (bounded by `WORK_QUEUE_JOB_TIME_LIMIT_SECS`), deliver the reply, and
/// ack/nack/fail the queue row based on the outcome.
async fn process_job(state: &WorkerState, cx: &Cx, job: LeasedJob) {
    let job_id = job.job_id;
    let request = job.email_request;

    let Some(local_part) = request.handle() else {
        tracing::error!(%job_id, "leased job has an unresolvable handle; failing permanently");
        let _ = state.work_queue.fail_permanently(cx, job_id, "to_email has no local part").await;
        return;
    };
    let Some(instructions) = state.handles.resolve(local_part) else {
        tracing::error!(%job_id, handle = local_part, "leased job's handle no longer resolves; failing permanently");
        let _ = state.work_queue.fail_permanently(cx, job_id, &format!("unknown handle '{local_part}'")).await;
        return;
    };
    let instructions = instructions.clone();

    let attachments = load_attachments(&request);

    let process_future = Box::pin(state.agent.process_email(cx, &request, &instructions, &attachments));
    let result = match asupersync::time::timeout(
        wall_now(),
        Duration::from_secs(handlemail_core::config::WORK_QUEUE_JOB_TIME_LIMIT_SECS),
        process_future,
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%job_id, "agent run exceeded the job time limit");
            nack_or_fail(state, cx, job_id, job.attempts, "agent run timed out").await;
            return;
        }
    };

    let reply = build_reply(&request, &result);
    if let Err(e) = state.deliverer.send(cx, &reply).await {
        tracing::warn!(%job_id, error = %e, "delivery failed");
        nack_or_fail(state, cx, job_id, job.attempts, &e.to_string()).await;
        return;
    }

    if !request.message_id.is_empty() {
        state.idempotency.try_mark_processed(cx, &request.message_id).await;
    }
    if let Err(e) = state.work_queue.ack(cx, job_id).await {
        tracing::error!(%job_id, error = %e, "failed to ack completed job");
    }
}

async fn nack_or_fail(state: &WorkerState, cx: &Cx, job_id: Uuid, attempts: u32, error: &str) {
    if attempts >= handlemail_core::config::WORK_QUEUE_RETRY_MAX {
        if let Err(e) = state.work_queue.fail_permanently(cx, job_id, error).await {
            tracing::error!(%job_id, error = %e, "failed to mark job permanently failed");
        }
        return;
    }
    let backoff = backoff_for_attempt(attempts);
    if let Err(e) = state.work_queue.nack(cx, job_id, backoff, error).await {
        tracing::error!(%job_id, error = %e, "failed to nack job");
    }
}

/// Blocking entrypoint: connects every dependency, then polls the queue
/// until the process is killed. One poll iteration leases at most one job
/// (a single-worker pool is enough load for this service's traffic; running
/// several of these processes behind the same database is how this scales
/// out, matching the source's own Celery-worker-count knob).
pub fn run_worker(config: Config) -> std::io::Result<()> {
    let runtime = RuntimeBuilder::new().build().map_err(|e| std::io::Error::other(format!("asupersync error: {e}")))?;

    runtime.block_on(async move {
        let cx = Cx::for_request_with_budget(Budget::INFINITE);
        let state = WorkerState::connect(&cx, config)
            .await
            .map_err(|e| std::io::Error::other(format!("startup failed: {e}")))?;

        let poll_interval = Duration::from_secs(state.config.work_queue_poll_interval_seconds.max(1));
        let reclaim_interval = Duration::from_secs(state.config.work_queue_reclaim_interval_seconds.max(1));
        let lease_seconds = state.config.work_queue_lease_seconds;
        let mut since_last_reclaim = Duration::ZERO;

        loop {
            let cx = request_cx(0);
            match state.work_queue.lease_next(&cx, lease_seconds).await {
                Ok(Some(job)) => {
                    process_job(&state, &cx, job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "failed to lease next job"),
            }

            if since_last_reclaim >= reclaim_interval {
                match state.work_queue.reclaim_expired_leases(&cx).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(reclaimed = n, "reclaimed expired leases"),
                    Err(e) => tracing::error!(error = %e, "failed to reclaim expired leases"),
                }
                since_last_reclaim = Duration::ZERO;
            }

            sleep(poll_interval).await;
            since_last_reclaim += poll_interval;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps_at_the_job_time_limit() {
        assert_eq!(backoff_for_attempt(0), handlemail_core::config::WORK_QUEUE_MIN_BACKOFF_SECS);
        assert!(backoff_for_attempt(2) > backoff_for_attempt(0));
        assert_eq!(backoff_for_attempt(10), handlemail_core::config::WORK_QUEUE_JOB_TIME_LIMIT_SECS);
    }

    #[test]
    fn load_attachments_skips_entries_without_a_stored_path() {
        let request = EmailRequest {
            message_id: "a@1".into(),
            from_email: "a@example.com".into(),
            to_email: "ask@handlemail.example".into(),
            subject: String::new(),
            text_body: String::new(),
            html_body: None,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
            cc: Vec::new(),
            bcc: None,
            headers: Default::default(),
            attachments: vec![handlemail_core::models::EmailAttachment {
                filename: "a.pdf".into(),
                content_type: "application/pdf".into(),
                size_bytes: 3,
                content: Some(vec![1, 2, 3]),
                stored_path: None,
            }],
            scheduled_task_id: None,
            parent_message_id: None,
            distilled_instructions: None,
            distilled_alias: None,
        };
        let store = load_attachments(&request);
        assert!(store.is_empty());
    }

    #[test]
    fn build_reply_maps_generated_files_to_attachments() {
        let request = EmailRequest {
            message_id: "a@1".into(),
            from_email: "sender@example.com".into(),
            to_email: "ask@handlemail.example".into(),
            subject: "hello".into(),
            text_body: String::new(),
            html_body: None,
            date: None,
            in_reply_to: None,
            references: Vec::new(),
            cc: Vec::new(),
            bcc: None,
            headers: Default::default(),
            attachments: Vec::new(),
            scheduled_task_id: None,
            parent_message_id: None,
            distilled_instructions: None,
            distilled_alias: None,
        };
        let result = handlemail_agent::DetailedEmailProcessingResult {
            handle: "ask".into(),
            text_body: "hi".into(),
            html_body: "<p>hi</p>".into(),
            errors: Vec::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            generated_files: vec![("invite.ics".into(), "text/calendar".into(), vec![1, 2, 3])],
        };
        let reply = build_reply(&request, &result);
        assert_eq!(reply.to, "sender@example.com");
        assert_eq!(reply.subject, "Re: hello");
        assert_eq!(reply.attachments.len(), 1);
        assert_eq!(reply.attachments[0].filename, "invite.ics");
    }
}
