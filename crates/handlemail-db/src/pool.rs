//! Connection pool configuration and initialization.
//!
//! Uses `sqlmodel_pool` for connection management, scaled for a single
//! ingestion/scheduler service rather than a 1000-agent coordination
//! platform: one writer, a handful of readers (workers + scheduler tick).

use crate::DbConn;
use crate::error::{DbError, DbResult};
use crate::schema;
use asupersync::{Cx, Outcome};
use sqlmodel_core::Error as SqlError;
use sqlmodel_pool::{Pool, PoolConfig, PooledConnection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_OVERFLOW: usize = 10;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_POOL_RECYCLE_MS: u64 = 30 * 60 * 1000;

/// Auto-detect a reasonable pool size from available CPU parallelism.
///
/// Much smaller headroom than a many-agent coordination server needs: this
/// service has one ingress gateway, a small worker pool, and a scheduler
/// tick, so `min = clamp(cpus, 2, 10)` / `max = clamp(cpus * 3, 5, 30)`.
#[must_use]
pub fn auto_pool_size() -> (usize, usize) {
    let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
    let min = cpus.clamp(2, 10);
    let max = (cpus * 3).clamp(5, 30);
    (min, max)
}

#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    pub database_url: String,
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub max_lifetime_ms: u64,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./handlemail.db".to_string(),
            min_connections: DEFAULT_POOL_SIZE,
            max_connections: DEFAULT_POOL_SIZE + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
        }
    }
}

impl DbPoolConfig {
    #[must_use]
    pub fn from_database_url(database_url: String) -> Self {
        let (min, max) = auto_pool_size();
        Self {
            database_url,
            min_connections: min,
            max_connections: max,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
        }
    }

    /// Parse the `SQLite` file path out of a `sqlite://` URL, or `:memory:`
    /// for an in-memory database.
    pub fn sqlite_path(&self) -> DbResult<String> {
        if self.database_url.contains(":memory:") {
            return Ok(":memory:".to_string());
        }
        self.database_url
            .strip_prefix("sqlite://")
            .map(|rest| rest.trim_start_matches('/').to_string())
            .map(|p| if p.is_empty() { p } else { format!("/{p}") })
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                DbError::invalid(
                    "database_url",
                    format!("expected sqlite:///path, got {}", self.database_url),
                )
            })
    }
}

/// A configured `SQLite` connection pool with schema initialization.
#[derive(Clone)]
pub struct DbPool {
    pool: Arc<Pool<DbConn>>,
    sqlite_path: String,
    init_sql: Arc<String>,
    init_gate: Arc<Mutex<HashSet<String>>>,
}

impl DbPool {
    /// Create a new pool. Connections are opened lazily on first acquire.
    pub fn new(config: &DbPoolConfig) -> DbResult<Self> {
        let sqlite_path = config.sqlite_path()?;
        let init_sql = Arc::new(schema::build_conn_pragmas(config.max_connections));

        let pool_config = PoolConfig::new(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout_ms)
            .max_lifetime(config.max_lifetime_ms)
            .test_on_checkout(true);

        Ok(Self {
            pool: Arc::new(Pool::new(pool_config)),
            sqlite_path,
            init_sql,
            init_gate: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    #[must_use]
    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }

    fn ensure_initialized_once(&self) -> Result<(), SqlError> {
        let mut seen = self.init_gate.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(&self.sqlite_path) {
            return Ok(());
        }
        if self.sqlite_path != ":memory:"
            && let Some(parent) = Path::new(&self.sqlite_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                SqlError::Custom(format!("failed to create db dir {}: {e}", parent.display()))
            })?;
        }
        let conn = if self.sqlite_path == ":memory:" {
            DbConn::open_memory()?
        } else {
            DbConn::open_file(&self.sqlite_path)?
        };
        conn.execute_raw(schema::SCHEMA_SQL)?;
        drop(conn);
        seen.insert(self.sqlite_path.clone());
        tracing::debug!(path = %self.sqlite_path, "database schema initialized");
        Ok(())
    }

    /// Acquire a pooled connection, initializing the schema on first use.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection<DbConn>, SqlError> {
        if let Err(e) = self.ensure_initialized_once() {
            return Outcome::Err(e);
        }
        let sqlite_path = self.sqlite_path.clone();
        let init_sql = self.init_sql.clone();
        self.pool
            .acquire(cx, move || {
                let sqlite_path = sqlite_path.clone();
                let init_sql = init_sql.clone();
                async move {
                    let conn = if sqlite_path == ":memory:" {
                        match DbConn::open_memory() {
                            Ok(c) => c,
                            Err(e) => return Outcome::Err(e),
                        }
                    } else {
                        match DbConn::open_file(&sqlite_path) {
                            Ok(c) => c,
                            Err(e) => return Outcome::Err(e),
                        }
                    };
                    if let Err(e) = conn.execute_raw(&init_sql) {
                        return Outcome::Err(e);
                    }
                    Outcome::Ok(conn)
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_handles_memory_url() {
        let cfg = DbPoolConfig::from_database_url("sqlite://:memory:".to_string());
        assert_eq!(cfg.sqlite_path().unwrap(), ":memory:");
    }

    #[test]
    fn sqlite_path_parses_file_url() {
        let cfg = DbPoolConfig::from_database_url("sqlite:///tmp/handlemail/db.sqlite3".to_string());
        assert_eq!(cfg.sqlite_path().unwrap(), "/tmp/handlemail/db.sqlite3");
    }

    #[test]
    fn auto_pool_size_keeps_min_below_max() {
        let (min, max) = auto_pool_size();
        assert!(min <= max);
        assert!(min >= 2);
    }
}
