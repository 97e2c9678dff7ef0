//! Thin wrapper around `asupersync::messaging::RedisClient` exposing only
//! the primitives the rate limiter and idempotency store need: an atomic
//! increment-with-expiry, a set-if-absent-with-expiry, and a plain read for
//! usage reporting.
//!
//! `INCR`/`SETNX`/`EXPIRE`/`EXISTS` are RESP integer-returning commands, so
//! response parsing never has to distinguish bulk-string vs. nil replies;
//! `GET` is the one exception, handled separately below.

use asupersync::Cx;
use asupersync::messaging::RedisClient;
use handlemail_core::{Error, Result};

/// A connected KV client. Reconnection on failure is the caller's
/// responsibility (the rate limiter and idempotency store both fail open).
pub struct KvClient {
    redis: RedisClient,
}

impl KvClient {
    pub async fn connect(cx: &Cx, url: &str) -> Result<Self> {
        let redis = RedisClient::connect(cx, url)
            .await
            .map_err(|e| Error::Internal(format!("kv connect failed: {e}")))?;
        Ok(Self { redis })
    }

    /// `INCR key`, returning the post-increment count.
    pub async fn incr(&self, cx: &Cx, key: &str) -> Result<i64> {
        let resp = self
            .redis
            .cmd_bytes(cx, &[b"INCR", key.as_bytes()])
            .await
            .map_err(|e| Error::Internal(format!("INCR failed: {e}")))?;
        Ok(resp.as_integer().unwrap_or(0))
    }

    /// `EXPIRE key ttl_secs`. Best-effort: callers treat failure as
    /// non-fatal since the counter will simply live longer than intended.
    pub async fn expire(&self, cx: &Cx, key: &str, ttl_secs: u64) -> Result<()> {
        let ttl = ttl_secs.to_string();
        self.redis
            .cmd_bytes(cx, &[b"EXPIRE", key.as_bytes(), ttl.as_bytes()])
            .await
            .map_err(|e| Error::Internal(format!("EXPIRE failed: {e}")))?;
        Ok(())
    }

    /// `SETNX key 1`; returns `true` if this call created the key.
    pub async fn set_nx(&self, cx: &Cx, key: &str) -> Result<bool> {
        let resp = self
            .redis
            .cmd_bytes(cx, &[b"SETNX", key.as_bytes(), b"1"])
            .await
            .map_err(|e| Error::Internal(format!("SETNX failed: {e}")))?;
        Ok(resp.as_integer().unwrap_or(0) == 1)
    }

    /// `EXISTS key`.
    pub async fn exists(&self, cx: &Cx, key: &str) -> Result<bool> {
        let resp = self
            .redis
            .cmd_bytes(cx, &[b"EXISTS", key.as_bytes()])
            .await
            .map_err(|e| Error::Internal(format!("EXISTS failed: {e}")))?;
        Ok(resp.as_integer().unwrap_or(0) == 1)
    }

    /// `GET key`, parsed as an integer. Returns `0` for a missing key (an
    /// unstarted bucket reads the same as an empty one) rather than
    /// distinguishing nil from `"0"`.
    pub async fn get_int(&self, cx: &Cx, key: &str) -> Result<i64> {
        let resp = self
            .redis
            .cmd_bytes(cx, &[b"GET", key.as_bytes()])
            .await
            .map_err(|e| Error::Internal(format!("GET failed: {e}")))?;
        if let Some(n) = resp.as_integer() {
            return Ok(n);
        }
        Ok(resp.as_bytes().and_then(|b| std::str::from_utf8(b).ok()).and_then(|s| s.trim().parse().ok()).unwrap_or(0))
    }
}
