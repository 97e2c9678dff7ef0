//! Durable FIFO-by-availability work queue backing the ingress gateway and
//! the worker pool. Grounded on `original_source/mxtoai/tasks.py`'s
//! Celery-backed `process_email_task`: a job is enqueued once validated,
//! leased by a worker for the duration of processing, and acked/nacked on
//! completion.
//!
//! A job becomes eligible again once `available_at` has passed, whether
//! because it was never leased or because a prior lease expired without an
//! ack (worker crash) or was explicitly nacked with a backoff.

use crate::error::{DbError, DbResult};
use crate::pool::DbPool;
use crate::timestamps::now_micros;
use asupersync::{Cx, Outcome};
use handlemail_core::models::EmailRequest;
use sqlmodel_core::{Connection, Error as SqlError, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Leased,
    Done,
    Failed,
}

impl JobStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> DbResult<Self> {
        match raw {
            "queued" => Ok(Self::Queued),
            "leased" => Ok(Self::Leased),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(DbError::Schema(format!("unknown work_queue.status '{other}'"))),
        }
    }
}

/// One row leased off the queue for a worker to process.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job_id: Uuid,
    pub email_request: EmailRequest,
    pub attempts: u32,
}

fn map_sql_err(e: SqlError) -> DbError {
    DbError::Sqlite(e.to_string())
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

pub struct WorkQueueStore {
    pool: DbPool,
}

impl WorkQueueStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn acquire(&self, cx: &Cx) -> DbResult<sqlmodel_pool::PooledConnection<crate::DbConn>> {
        match self.pool.acquire(cx).await {
            Outcome::Ok(c) => Ok(c),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("pool acquire cancelled".into())),
        }
    }

    /// Enqueue a validated request, immediately eligible for lease.
    pub async fn enqueue(&self, cx: &Cx, job_id: Uuid, request: &EmailRequest) -> DbResult<()> {
        let conn = self.acquire(cx).await?;
        let body = serde_json::to_string(request)?;
        let now = now_micros();
        match conn
            .execute(
                cx,
                "INSERT INTO work_queue \
                 (job_id, email_request, status, attempts, available_at, leased_until, created_at, updated_at) \
                 VALUES (?1, ?2, 'queued', 0, ?3, NULL, ?3, ?3)",
                &[Value::Text(job_id.to_string()), Value::Text(body), Value::BigInt(now)],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("insert cancelled".into())),
        }
    }

    /// Lease the oldest eligible job (`status = queued` and due), marking it
    /// `leased` with a deadline `lease_seconds` out. Returns `None` if
    /// nothing is ready.
    pub async fn lease_next(&self, cx: &Cx, lease_seconds: u64) -> DbResult<Option<LeasedJob>> {
        let conn = self.acquire(cx).await?;
        let now = now_micros();
        let row = match conn
            .query_one(
                cx,
                "SELECT * FROM work_queue WHERE status = 'queued' AND available_at <= ?1 \
                 ORDER BY available_at ASC LIMIT 1",
                &[Value::BigInt(now)],
            )
            .await
        {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        let Some(row) = row else { return Ok(None) };

        let job_id_str = text(row.get_by_name("job_id")).ok_or_else(|| DbError::Schema("job_id missing".into()))?;
        let job_id = Uuid::parse_str(&job_id_str).map_err(|e| DbError::Schema(format!("bad job_id uuid: {e}")))?;
        let attempts = u32::try_from(int(row.get_by_name("attempts")).unwrap_or(0)).unwrap_or(0) + 1;
        let leased_until = now + i64::try_from(lease_seconds.saturating_mul(1_000_000)).unwrap_or(i64::MAX);

        match conn
            .execute(
                cx,
                "UPDATE work_queue SET status = 'leased', attempts = ?1, leased_until = ?2, updated_at = ?3 \
                 WHERE job_id = ?4 AND status = 'queued'",
                &[
                    Value::BigInt(i64::from(attempts)),
                    Value::BigInt(leased_until),
                    Value::BigInt(now),
                    Value::Text(job_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(0) => return Ok(None), // lost the race to another worker
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("update cancelled".into())),
        }

        let email_request_json =
            text(row.get_by_name("email_request")).ok_or_else(|| DbError::Schema("email_request missing".into()))?;
        let email_request: EmailRequest = serde_json::from_str(&email_request_json)?;
        Ok(Some(LeasedJob { job_id, email_request, attempts }))
    }

    /// Mark a job permanently finished (success).
    pub async fn ack(&self, cx: &Cx, job_id: Uuid) -> DbResult<()> {
        self.set_status(cx, job_id, JobStatus::Done, None).await
    }

    /// Return a job to `queued`, eligible again after `backoff_secs`.
    pub async fn nack(&self, cx: &Cx, job_id: Uuid, backoff_secs: u64, error: &str) -> DbResult<()> {
        let conn = self.acquire(cx).await?;
        let now = now_micros();
        let available_at = now + i64::try_from(backoff_secs.saturating_mul(1_000_000)).unwrap_or(i64::MAX);
        match conn
            .execute(
                cx,
                "UPDATE work_queue SET status = 'queued', available_at = ?1, leased_until = NULL, \
                 updated_at = ?2, last_error = ?3 WHERE job_id = ?4",
                &[
                    Value::BigInt(available_at),
                    Value::BigInt(now),
                    Value::Text(error.to_string()),
                    Value::Text(job_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }

    /// Mark a job as exhausted its retries — terminal, not re-leased.
    pub async fn fail_permanently(&self, cx: &Cx, job_id: Uuid, error: &str) -> DbResult<()> {
        self.set_status(cx, job_id, JobStatus::Failed, Some(error)).await
    }

    async fn set_status(&self, cx: &Cx, job_id: Uuid, status: JobStatus, error: Option<&str>) -> DbResult<()> {
        let conn = self.acquire(cx).await?;
        match conn
            .execute(
                cx,
                "UPDATE work_queue SET status = ?1, updated_at = ?2, last_error = ?3 WHERE job_id = ?4",
                &[
                    Value::Text(status.as_str().to_string()),
                    Value::BigInt(now_micros()),
                    error.map_or(Value::Null, |m| Value::Text(m.to_string())),
                    Value::Text(job_id.to_string()),
                ],
            )
            .await
        {
            Outcome::Ok(_) => Ok(()),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }

    /// Reclaim jobs whose lease has expired without an ack/nack (worker
    /// crash), returning them to `queued` for re-lease. Returns the number
    /// of rows reclaimed.
    pub async fn reclaim_expired_leases(&self, cx: &Cx) -> DbResult<u64> {
        let conn = self.acquire(cx).await?;
        let now = now_micros();
        match conn
            .execute(
                cx,
                "UPDATE work_queue SET status = 'queued', available_at = ?1, leased_until = NULL, updated_at = ?1 \
                 WHERE status = 'leased' AND leased_until < ?1",
                &[Value::BigInt(now)],
            )
            .await
        {
            Outcome::Ok(n) => Ok(n),
            Outcome::Err(e) => Err(map_sql_err(e)),
            _ => Err(DbError::Internal("update cancelled".into())),
        }
    }

    pub async fn status_of(&self, cx: &Cx, job_id: Uuid) -> DbResult<Option<(JobStatus, u32)>> {
        let conn = self.acquire(cx).await?;
        let row = match conn
            .query_one(cx, "SELECT status, attempts FROM work_queue WHERE job_id = ?1", &[Value::Text(job_id.to_string())])
            .await
        {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Err(map_sql_err(e)),
            _ => return Err(DbError::Internal("query cancelled".into())),
        };
        let Some(row) = row else { return Ok(None) };
        let status = JobStatus::parse(&text(row.get_by_name("status")).unwrap_or_default())?;
        let attempts = u32::try_from(int(row.get_by_name("attempts")).unwrap_or(0)).unwrap_or(0);
        Ok(Some((status, attempts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_roundtrips() {
        for s in [JobStatus::Queued, JobStatus::Leased, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn job_status_parse_rejects_unknown() {
        assert!(JobStatus::parse("bogus").is_err());
    }
}
