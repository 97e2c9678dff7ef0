//! Bucketed fixed-window rate limiting.
//!
//! Keys look like `rate_limit:<scope>:<id>[:<plan>]:<period>:<time_bucket>`.
//! Each check does an atomic `INCR` and, on first touch of a bucket, an
//! `EXPIRE` sized to the period's `PERIOD_EXPIRY` constant (longer than the
//! window itself, so a counter straddling a boundary still expires shortly
//! after the window it counted closes). Grounded on
//! `original_source/mxgo/config.py`'s `RATE_LIMITS_BY_PLAN` /
//! `RATE_LIMIT_PER_DOMAIN_HOUR` / `PERIOD_EXPIRY` tables.
//!
//! KV errors fail open: a rate limiter outage must never block mail
//! delivery.

use crate::client::KvClient;
use asupersync::Cx;
use chrono::Utc;
use handlemail_core::config::{RATE_LIMIT_PER_DOMAIN_HOUR, RateLimitPlan, RatePeriod};
use handlemail_core::{Error, Result};

const PERIODS: [RatePeriod; 3] = [RatePeriod::Hour, RatePeriod::Day, RatePeriod::Month];

fn time_bucket(period: RatePeriod) -> String {
    let now = Utc::now();
    match period {
        RatePeriod::Hour => now.format("%Y%m%d%H").to_string(),
        RatePeriod::Day => now.format("%Y%m%d").to_string(),
        RatePeriod::Month => now.format("%Y%m").to_string(),
    }
}

fn bucket_key(scope: &str, id: &str, plan: Option<RateLimitPlan>, period: RatePeriod) -> String {
    let bucket = time_bucket(period);
    match plan {
        Some(plan) => format!(
            "rate_limit:{scope}:{id}:{plan}:{period}:{bucket}",
            plan = plan.as_str(),
            period = period.as_str()
        ),
        None => format!("rate_limit:{scope}:{id}:{period}:{bucket}", period = period.as_str()),
    }
}

pub struct RateLimiter {
    client: KvClient,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(client: KvClient) -> Self {
        Self { client }
    }

    /// Increment the counter for `key`, initializing its TTL on first touch.
    /// Returns `Ok(None)` (fail-open) if the KV backend errors.
    async fn touch(&self, cx: &Cx, key: &str, ttl_secs: u64) -> Option<i64> {
        match self.client.incr(cx, key).await {
            Ok(count) => {
                if count == 1
                    && let Err(e) = self.client.expire(cx, key, ttl_secs).await
                {
                    tracing::warn!(error = %e, key, "rate limiter EXPIRE failed; bucket may outlive its window");
                }
                Some(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, key, "rate limiter KV error; failing open");
                None
            }
        }
    }

    /// Check and increment the per-sender hour/day/month buckets for `plan`.
    /// Returns `Err(RateLimitExceeded)` on the first period that would be
    /// exceeded by this request.
    pub async fn check_sender(&self, cx: &Cx, sender_email: &str, plan: RateLimitPlan) -> Result<()> {
        for period in PERIODS {
            let key = bucket_key("sender", sender_email, Some(plan), period);
            let Some(count) = self.touch(cx, &key, period.expiry_seconds()).await else {
                continue;
            };
            let limit = i64::from(period.limit(plan));
            if count > limit {
                return Err(Error::RateLimitExceeded {
                    period: period.as_str().to_string(),
                    scope: format!("sender:{sender_email}"),
                });
            }
        }
        Ok(())
    }

    /// Check and increment the per-domain hourly bucket.
    pub async fn check_domain(&self, cx: &Cx, domain: &str) -> Result<()> {
        let key = bucket_key("domain", domain, None, RatePeriod::Hour);
        let Some(count) = self.touch(cx, &key, RatePeriod::Hour.expiry_seconds()).await else {
            return Ok(());
        };
        if count > i64::from(RATE_LIMIT_PER_DOMAIN_HOUR) {
            return Err(Error::RateLimitExceeded {
                period: RatePeriod::Hour.as_str().to_string(),
                scope: format!("domain:{domain}"),
            });
        }
        Ok(())
    }

    /// Read the sender's current hour/day/month counts without incrementing
    /// them, for usage reporting. Fails open to `0` per period on KV error.
    pub async fn current_usage(&self, cx: &Cx, sender_email: &str, plan: RateLimitPlan) -> UsageSnapshot {
        let mut snapshot = UsageSnapshot::default();
        for period in PERIODS {
            let key = bucket_key("sender", sender_email, Some(plan), period);
            let count = match self.client.get_int(cx, &key).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, key, "usage snapshot KV error; reporting 0");
                    0
                }
            };
            match period {
                RatePeriod::Hour => snapshot.hour = count,
                RatePeriod::Day => snapshot.day = count,
                RatePeriod::Month => snapshot.month = count,
            }
        }
        snapshot
    }
}

/// A point-in-time read of a sender's rate-limit counters, for `/user`'s
/// `usage_info` field.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct UsageSnapshot {
    pub hour: i64,
    pub day: i64,
    pub month: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_key_includes_plan_when_present() {
        let key = bucket_key("sender", "a@example.com", Some(RateLimitPlan::Pro), RatePeriod::Hour);
        assert!(key.starts_with("rate_limit:sender:a@example.com:pro:hour:"));
    }

    #[test]
    fn bucket_key_omits_plan_for_domain_scope() {
        let key = bucket_key("domain", "gmail.com", None, RatePeriod::Hour);
        assert!(key.starts_with("rate_limit:domain:gmail.com:hour:"));
        assert!(!key.contains("pro") && !key.contains("beta") && !key.contains("free"));
    }

    #[test]
    fn time_bucket_widths_differ_by_period() {
        let hour = time_bucket(RatePeriod::Hour);
        let day = time_bucket(RatePeriod::Day);
        let month = time_bucket(RatePeriod::Month);
        assert!(hour.len() > day.len());
        assert!(day.len() > month.len());
    }
}
