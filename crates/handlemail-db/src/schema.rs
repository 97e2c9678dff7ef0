//! SQL schema definitions and per-connection PRAGMAs.

/// PRAGMAs applied to every pooled connection, matching the original
/// Python service's `db.py` event listeners (WAL for concurrent readers,
/// a busy timeout instead of immediate `SQLITE_BUSY` failures).
#[must_use]
pub fn build_conn_pragmas(max_connections: usize) -> String {
    let busy_timeout_ms = 5_000u64;
    format!(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA busy_timeout = {busy_timeout_ms};\n\
         PRAGMA cache_size = -{cache_kib};",
        cache_kib = (max_connections.max(1) * 256),
    )
}

/// Base schema, applied once per database file before the pool opens its
/// first connection. Idempotent (`CREATE TABLE IF NOT EXISTS`).
pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    task_id TEXT PRIMARY KEY,
    owner_email TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    scheduler_job_id TEXT,
    status TEXT NOT NULL,
    email_request TEXT NOT NULL,
    start_time INTEGER,
    expiry_time INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_owner
    ON scheduled_tasks (owner_email, status);

CREATE TABLE IF NOT EXISTS task_runs (
    run_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES scheduled_tasks (task_id),
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_runs_task_id
    ON task_runs (task_id, started_at DESC);

CREATE TABLE IF NOT EXISTS whitelisted_emails (
    email TEXT PRIMARY KEY,
    verified INTEGER NOT NULL DEFAULT 0,
    verification_token TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_queue (
    job_id TEXT PRIMARY KEY,
    email_request TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    available_at INTEGER NOT NULL,
    leased_until INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_work_queue_ready
    ON work_queue (status, available_at);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragmas_scale_cache_size_with_pool_size() {
        let small = build_conn_pragmas(10);
        let large = build_conn_pragmas(100);
        assert!(small.contains("busy_timeout = 5000"));
        assert_ne!(small, large);
    }

    #[test]
    fn schema_sql_declares_all_tables() {
        assert!(SCHEMA_SQL.contains("scheduled_tasks"));
        assert!(SCHEMA_SQL.contains("task_runs"));
        assert!(SCHEMA_SQL.contains("whitelisted_emails"));
        assert!(SCHEMA_SQL.contains("work_queue"));
    }
}
