//! CRUD operations for scheduled tasks, task runs, and the whitelist table.
//!
//! These are the only place in the codebase that embeds raw SQL; callers
//! go through `TaskStore` / `WhitelistStore` rather than touching `DbConn`
//! directly.

use crate::error::{DbError, DbResult};
use crate::pool::DbPool;
use crate::timestamps::{micros_to_naive, naive_to_micros, now_micros};
use asupersync::{Cx, Outcome};
use handlemail_core::models::{
    EmailRequest, ScheduledTask, ScheduledTaskStatus, TaskRun, TaskRunStatus, WhitelistRow,
};
use sqlmodel_core::{Connection, Error as SqlError, Value};
use uuid::Uuid;

fn status_str(status: ScheduledTaskStatus) -> &'static str {
    match status {
        ScheduledTaskStatus::Initialised => "initialised",
        ScheduledTaskStatus::Active => "active",
        ScheduledTaskStatus::Executing => "executing",
        ScheduledTaskStatus::Finished => "finished",
        ScheduledTaskStatus::Deleted => "deleted",
    }
}

fn parse_status(raw: &str) -> DbResult<ScheduledTaskStatus> {
    match raw {
        "initialised" => Ok(ScheduledTaskStatus::Initialised),
        "active" => Ok(ScheduledTaskStatus::Active),
        "executing" => Ok(ScheduledTaskStatus::Executing),
        "finished" => Ok(ScheduledTaskStatus::Finished),
        "deleted" => Ok(ScheduledTaskStatus::Deleted),
        other => Err(DbError::Schema(format!("unknown scheduled_tasks.status '{other}'"))),
    }
}

fn run_status_str(status: TaskRunStatus) -> &'static str {
    match status {
        TaskRunStatus::Initialised => "initialised",
        TaskRunStatus::InProgress => "in_progress",
        TaskRunStatus::Completed => "completed",
        TaskRunStatus::Errored => "errored",
    }
}

fn parse_run_status(raw: &str) -> DbResult<TaskRunStatus> {
    match raw {
        "initialised" => Ok(TaskRunStatus::Initialised),
        "in_progress" => Ok(TaskRunStatus::InProgress),
        "completed" => Ok(TaskRunStatus::Completed),
        "errored" => Ok(TaskRunStatus::Errored),
        other => Err(DbError::Schema(format!("unknown task_runs.status '{other}'"))),
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn int(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::BigInt(n)) => Some(*n),
        Some(Value::Int(n)) => Some(i64::from(*n)),
        _ => None,
    }
}

fn map_sql_err(e: SqlError) -> DbError {
    DbError::Sqlite(e.to_string())
}

/// Durable storage for scheduled tasks and their execution history.
pub struct TaskStore {
    pool: DbPool,
}

impl TaskStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Count active tasks owned by `owner_email`, for enforcing the
    /// per-owner ceiling (`N_MAX_TASKS`) before inserting a new one.
    pub async fn count_active_for_owner(&self, cx: &Cx, owner_email: &str) -> DbResult<usize> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let rows = match conn
            .query(
                cx,
                "SELECT COUNT(*) AS n FROM scheduled_tasks WHERE owner_email = ?1 AND status = 'active'",
                &[Value::Text(owner_email.to_string())],
            )
            .await
        {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        let count = rows.first().and_then(|r| int(r.get_by_name("n"))).unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Insert a new scheduled task. Caller is responsible for enforcing the
    /// per-owner limit and minimum-interval rule before calling this, and
    /// for persisting it with `status = Initialised` before flipping it to
    /// `Active` once the cron job is registered.
    pub async fn create(&self, cx: &Cx, task: &ScheduledTask) -> DbResult<()> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let email_request_json = serde_json::to_string(&task.email_request)?;
        let params = [
            Value::Text(task.task_id.to_string()),
            Value::Text(task.owner_email.clone()),
            Value::Text(task.cron_expression.clone()),
            task.scheduler_job_id.clone().map_or(Value::Null, Value::Text),
            Value::Text(status_str(task.status).to_string()),
            Value::Text(email_request_json),
            task.start_time.map_or(Value::Null, |t| Value::BigInt(naive_to_micros(t))),
            task.expiry_time.map_or(Value::Null, |t| Value::BigInt(naive_to_micros(t))),
            Value::BigInt(naive_to_micros(task.created_at)),
            Value::BigInt(naive_to_micros(task.updated_at)),
        ];
        match conn
            .execute(
                cx,
                "INSERT INTO scheduled_tasks \
                 (task_id, owner_email, cron_expression, scheduler_job_id, status, email_request, \
                  start_time, expiry_time, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                &params,
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("insert cancelled".into())),
        }
    }

    pub async fn get(&self, cx: &Cx, task_id: Uuid) -> DbResult<Option<ScheduledTask>> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let row = match conn
            .query_one(
                cx,
                "SELECT * FROM scheduled_tasks WHERE task_id = ?1",
                &[Value::Text(task_id.to_string())],
            )
            .await
        {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_task(&row)?))
    }

    /// Transition a task's status, bumping `updated_at`. Used both for the
    /// `Initialised -> Active` promotion and the `Active <-> Executing`
    /// firing transitions.
    pub async fn set_status(&self, cx: &Cx, task_id: Uuid, status: ScheduledTaskStatus) -> DbResult<()> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        match conn
            .execute(
                cx,
                "UPDATE scheduled_tasks SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
                &[
                    Value::Text(status_str(status).to_string()),
                    Value::BigInt(now_micros()),
                    Value::Text(task_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }

    /// Soft-delete: flip status to `Deleted` rather than removing the row,
    /// so `task_runs` retains a valid foreign key for history.
    pub async fn soft_delete(&self, cx: &Cx, task_id: Uuid) -> DbResult<()> {
        self.set_status(cx, task_id, ScheduledTaskStatus::Deleted).await
    }

    pub async fn set_scheduler_job_id(&self, cx: &Cx, task_id: Uuid, scheduler_job_id: &str) -> DbResult<()> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        match conn
            .execute(
                cx,
                "UPDATE scheduled_tasks SET scheduler_job_id = ?1, updated_at = ?2 WHERE task_id = ?3",
                &[
                    Value::Text(scheduler_job_id.to_string()),
                    Value::BigInt(now_micros()),
                    Value::Text(task_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }

    /// Tasks currently `Active` and within their start/expiry window, for
    /// re-registering cron jobs on startup.
    pub async fn active_tasks(&self, cx: &Cx) -> DbResult<Vec<ScheduledTask>> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let rows = match conn
            .query(cx, "SELECT * FROM scheduled_tasks WHERE status = 'active'", &[])
            .await
        {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        rows.iter().map(row_to_task).collect()
    }

    pub async fn record_run_start(&self, cx: &Cx, run: &TaskRun) -> DbResult<()> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        match conn
            .execute(
                cx,
                "INSERT INTO task_runs (run_id, task_id, status, started_at) VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Text(run.run_id.to_string()),
                    Value::Text(run.task_id.to_string()),
                    Value::Text(run_status_str(run.status).to_string()),
                    Value::BigInt(naive_to_micros(run.started_at)),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("insert cancelled".into())),
        }
    }

    pub async fn record_run_finish(
        &self,
        cx: &Cx,
        run_id: Uuid,
        status: TaskRunStatus,
        error_message: Option<&str>,
    ) -> DbResult<()> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        match conn
            .execute(
                cx,
                "UPDATE task_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE run_id = ?4",
                &[
                    Value::BigInt(now_micros()),
                    Value::Text(run_status_str(status).to_string()),
                    error_message.map_or(Value::Null, |m| Value::Text(m.to_string())),
                    Value::Text(run_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }
}

fn row_to_task(row: &sqlmodel_core::Row) -> DbResult<ScheduledTask> {
    let task_id_str = text(row.get_by_name("task_id")).ok_or_else(|| DbError::Schema("task_id missing".into()))?;
    let task_id = Uuid::parse_str(&task_id_str).map_err(|e| DbError::Schema(format!("bad task_id uuid: {e}")))?;
    let status_str = text(row.get_by_name("status")).ok_or_else(|| DbError::Schema("status missing".into()))?;
    let email_request_json =
        text(row.get_by_name("email_request")).ok_or_else(|| DbError::Schema("email_request missing".into()))?;
    let email_request: EmailRequest = serde_json::from_str(&email_request_json)?;
    Ok(ScheduledTask {
        task_id,
        owner_email: text(row.get_by_name("owner_email")).unwrap_or_default(),
        cron_expression: text(row.get_by_name("cron_expression")).unwrap_or_default(),
        scheduler_job_id: text(row.get_by_name("scheduler_job_id")),
        status: parse_status(&status_str)?,
        email_request,
        start_time: int(row.get_by_name("start_time")).map(micros_to_naive),
        expiry_time: int(row.get_by_name("expiry_time")).map(micros_to_naive),
        created_at: micros_to_naive(int(row.get_by_name("created_at")).unwrap_or(0)),
        updated_at: micros_to_naive(int(row.get_by_name("updated_at")).unwrap_or(0)),
    })
}

/// Durable storage for the email whitelist. Grounded on
/// `original_source/mxgo/whitelist.py`'s Supabase-backed `whitelisted_emails` table.
pub struct WhitelistStore {
    pool: DbPool,
}

impl WhitelistStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Returns `(exists, verified)`, matching `is_email_whitelisted`'s shape
    /// in the original source.
    pub async fn is_whitelisted(&self, cx: &Cx, email: &str) -> DbResult<(bool, bool)> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let row = match conn
            .query_one(
                cx,
                "SELECT verified FROM whitelisted_emails WHERE email = ?1",
                &[Value::Text(email.to_ascii_lowercase())],
            )
            .await
        {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        match row {
            None => Ok((false, false)),
            Some(row) => {
                let verified = matches!(row.get_by_name("verified"), Some(Value::Int(1)) | Some(Value::BigInt(1)));
                Ok((true, verified))
            }
        }
    }

    /// Upsert an unverified row and return the verification token, mirroring
    /// `trigger_automatic_verification`'s uuid4-token generation.
    pub async fn trigger_verification(&self, cx: &Cx, email: &str) -> DbResult<Uuid> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        let token = Uuid::new_v4();
        match conn
            .execute(
                cx,
                "INSERT INTO whitelisted_emails (email, verified, verification_token, created_at) \
                 VALUES (?1, 0, ?2, ?3) \
                 ON CONFLICT(email) DO UPDATE SET verification_token = excluded.verification_token",
                &[
                    Value::Text(email.to_ascii_lowercase()),
                    Value::Text(token.to_string()),
                    Value::BigInt(now_micros()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(token),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("upsert cancelled".into())),
        }
    }

    pub async fn mark_verified(&self, cx: &Cx, token: Uuid) -> DbResult<Option<WhitelistRow>> {
        let conn = match self.pool.acquire(cx).await {
            Outcome::Ok(c) => c,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("pool acquire cancelled".into())),
        };
        match conn
            .execute(
                cx,
                "UPDATE whitelisted_emails SET verified = 1 WHERE verification_token = ?1",
                &[Value::Text(token.to_string())],
            )
            .await
        {
            Outcome::Ok(0) => return Ok(None),
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("update cancelled".into())),
        }
        let row = match conn
            .query_one(
                cx,
                "SELECT * FROM whitelisted_emails WHERE verification_token = ?1",
                &[Value::Text(token.to_string())],
            )
            .await
        {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        Ok(row.map(|r| WhitelistRow {
            email: text(r.get_by_name("email")).unwrap_or_default(),
            verified: true,
            verification_token: Some(token),
            created_at: micros_to_naive(int(r.get_by_name("created_at")).unwrap_or(0)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_string_form() {
        for s in [
            ScheduledTaskStatus::Initialised,
            ScheduledTaskStatus::Active,
            ScheduledTaskStatus::Executing,
            ScheduledTaskStatus::Finished,
            ScheduledTaskStatus::Deleted,
        ] {
            assert_eq!(parse_status(status_str(s)).unwrap(), s);
        }
    }

    #[test]
    fn run_status_roundtrips_through_string_form() {
        for s in [
            TaskRunStatus::Initialised,
            TaskRunStatus::InProgress,
            TaskRunStatus::Completed,
            TaskRunStatus::Errored,
        ] {
            assert_eq!(parse_run_status(run_status_str(s)).unwrap(), s);
        }
    }

    #[test]
    fn parse_status_rejects_unknown_value() {
        assert!(parse_status("bogus").is_err());
    }

    #[test]
    fn parse_run_status_rejects_unknown_value() {
        assert!(parse_run_status("bogus").is_err());
    }
}
