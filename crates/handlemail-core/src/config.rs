//! Process configuration, loaded from environment variables.
//!
//! One struct, typed accessors, sane defaults, constructed once at startup
//! and shared read-only across the gateway, workers, and scheduler.

use std::collections::BTreeSet;
use std::env;

/// Subscription plan tier used by the rate limiter and upgrade-hint copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RateLimitPlan {
    Free,
    Beta,
    Pro,
}

/// One plan's per-period request ceiling.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub hour: u32,
    pub day: u32,
    pub month: u32,
}

impl RateLimitPlan {
    /// `original_source/mxgo/config.py::RATE_LIMITS_BY_PLAN`. FREE shares the
    /// BETA ceiling — there is no separate FREE row in the source table.
    #[must_use]
    pub const fn limits(self) -> PlanLimits {
        match self {
            Self::Free | Self::Beta => PlanLimits {
                hour: 10,
                day: 30,
                month: 200,
            },
            Self::Pro => PlanLimits {
                hour: 50,
                day: 100,
                month: 1000,
            },
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Beta => "beta",
            Self::Pro => "pro",
        }
    }
}

/// A rate-limit period bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    Hour,
    Day,
    Month,
}

impl RatePeriod {
    /// TTL to stamp on a fresh bucket counter: period length plus slack, so a
    /// counter that straddles a boundary still expires shortly after the
    /// window it counted closes. `original_source/mxgo/config.py::PERIOD_EXPIRY`.
    #[must_use]
    pub const fn expiry_seconds(self) -> u64 {
        match self {
            Self::Hour => 2 * 3600,
            Self::Day => 25 * 3600,
            Self::Month => 31 * 86_400,
        }
    }

    #[must_use]
    pub const fn limit(self, plan: RateLimitPlan) -> u32 {
        let limits = plan.limits();
        match self {
            Self::Hour => limits.hour,
            Self::Day => limits.day,
            Self::Month => limits.month,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }
}

/// Rate limit applied to sender domains outside the curated provider set.
/// `original_source/mxgo/config.py::RATE_LIMIT_PER_DOMAIN_HOUR`.
pub const RATE_LIMIT_PER_DOMAIN_HOUR: u32 = 50;

/// Major consumer email providers, auto-whitelisted without per-sender
/// verification and exempt from the per-domain rate limit. The source loads
/// this set from a deployment-supplied
/// `email_provider_domains.txt`; since that data file isn't part of this
/// crate's inputs, the common providers it calls out by name in its
/// rejection copy ("Gmail, Outlook, Yahoo, etc.") are hardcoded here instead.
pub const MAJOR_EMAIL_PROVIDER_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "yahoo.co.uk",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
    "zoho.com",
    "gmx.com",
    "mail.com",
];

/// Case-insensitive membership check against [`MAJOR_EMAIL_PROVIDER_DOMAINS`].
#[must_use]
pub fn is_major_email_provider(domain: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    MAJOR_EMAIL_PROVIDER_DOMAINS.contains(&domain.as_str())
}

/// Attachment ceilings. `original_source/mxgo/config.py`.
pub const MAX_ATTACHMENT_SIZE_BYTES: u64 = 15 * 1024 * 1024;
pub const MAX_TOTAL_ATTACHMENTS_SIZE_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_ATTACHMENTS_COUNT: usize = 5;

/// Scheduled-task ceilings. `original_source/mxgo/config.py`.
pub const SCHEDULED_TASKS_MINIMUM_INTERVAL_HOURS: u64 = 1;
pub const SCHEDULED_TASKS_MAX_PER_EMAIL: usize = 5;

/// Agent loop bounds.
pub const AGENT_MAX_STEPS: u32 = 12;
pub const AGENT_PLANNING_INTERVAL: u32 = 4;

/// Work queue retry policy, per `original_source/mxtoai/tasks.py`.
pub const WORK_QUEUE_RETRY_MAX: u32 = 3;
pub const WORK_QUEUE_MIN_BACKOFF_SECS: u64 = 60;
pub const WORK_QUEUE_JOB_TIME_LIMIT_SECS: u64 = 600;

/// Outbound call timeouts.
pub const TIMEOUT_KV_SECS: u64 = 2;
pub const TIMEOUT_DB_SECS: u64 = 5;
pub const TIMEOUT_LLM_SECS: u64 = 120;
pub const TIMEOUT_TOOL_SECS: u64 = 30;
pub const TIMEOUT_DELIVERY_SECS: u64 = 30;

/// Idempotency marker TTLs.
pub const IDEMPOTENCY_QUEUED_TTL_SECS: u64 = 3600;
pub const IDEMPOTENCY_PROCESSED_TTL_SECS: u64 = 24 * 3600;

/// Worker poll cadence defaults, overridable per `Config` field below.
pub const DEFAULT_WORK_QUEUE_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_WORK_QUEUE_RECLAIM_INTERVAL_SECS: u64 = 60;
/// Lease duration must clear the job time limit with slack for the ack
/// itself, or a slow-but-healthy job gets reclaimed out from under its
/// own worker.
pub const DEFAULT_WORK_QUEUE_LEASE_SECS: u64 = WORK_QUEUE_JOB_TIME_LIMIT_SECS + 120;

/// How often the scheduler checks its registered cron jobs against the clock.
pub const DEFAULT_SCHEDULER_TICK_INTERVAL_SECS: u64 = 30;

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_csv(key: &str) -> Vec<String> {
    env_value(key).map(|v| parse_csv(&v)).unwrap_or_default()
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Process-wide configuration assembled once at startup from the environment.
///
/// Every field here corresponds to an environment key this process reads;
/// `Config::from_env` is the single place that interprets them.
#[derive(Debug, Clone)]
pub struct Config {
    // Store
    pub kv_host: String,
    pub kv_port: u16,
    pub kv_db: u8,
    pub kv_password: Option<String>,

    // DB
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_name: Option<String>,

    // Auth
    pub jwt_secret: String,
    pub x_api_key: String,

    // Plan
    pub payments_api_key: Option<String>,
    pub pro_plan_product_id: Option<String>,

    // Model
    pub model_config_path: String,
    pub default_model_group: String,
    pub suggestions_model_group: String,

    // Whitelist
    pub whitelist_enabled: bool,
    pub whitelist_signup_url: String,
    pub frontend_url: String,

    // Ops
    pub skip_email_delivery: BTreeSet<String>,
    pub is_prod: bool,

    // Ambient
    pub data_dir: String,

    // HTTP
    pub http_host: String,
    pub http_port: u16,

    // Worker
    pub work_queue_poll_interval_seconds: u64,
    pub work_queue_lease_seconds: u64,
    pub work_queue_reclaim_interval_seconds: u64,
    pub scheduler_tick_interval_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables, applying the same
    /// defaults the original Python source falls back to.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            kv_host: env_value("KV_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            kv_port: env_value("KV_PORT").and_then(|v| v.parse().ok()).unwrap_or(6379),
            kv_db: env_value("KV_DB").and_then(|v| v.parse().ok()).unwrap_or(0),
            kv_password: env_value("KV_PASSWORD"),

            db_user: env_value("DB_USER"),
            db_password: env_value("DB_PASSWORD"),
            db_host: env_value("DB_HOST"),
            db_port: env_value("DB_PORT").and_then(|v| v.parse().ok()),
            db_name: env_value("DB_NAME"),

            jwt_secret: env_value("JWT_SECRET").unwrap_or_default(),
            x_api_key: env_value("X_API_KEY").unwrap_or_default(),

            payments_api_key: env_value("PAYMENTS_API_KEY"),
            pro_plan_product_id: env_value("PRO_PLAN_PRODUCT_ID"),

            model_config_path: env_value("MODEL_CONFIG_PATH")
                .unwrap_or_else(|| "model_config.toml".to_string()),
            default_model_group: env_value("DEFAULT_MODEL_GROUP")
                .unwrap_or_else(|| "default".to_string()),
            suggestions_model_group: env_value("SUGGESTIONS_MODEL_GROUP")
                .unwrap_or_else(|| "default".to_string()),

            whitelist_enabled: env_bool("WHITELIST_ENABLED", false),
            whitelist_signup_url: env_value("WHITELIST_SIGNUP_URL")
                .unwrap_or_else(|| "https://mxgo.ai/whitelist".to_string()),
            frontend_url: env_value("FRONTEND_URL").unwrap_or_else(|| "https://mxgo.ai".to_string()),

            skip_email_delivery: env_csv("SKIP_EMAIL_DELIVERY").into_iter().collect(),
            is_prod: env_bool("IS_PROD", false),

            data_dir: env_value("HANDLEMAIL_DATA_DIR").unwrap_or_else(|| "./data".to_string()),

            http_host: env_value("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: env_value("HTTP_PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),

            work_queue_poll_interval_seconds: env_value("WORK_QUEUE_POLL_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WORK_QUEUE_POLL_INTERVAL_SECS),
            work_queue_lease_seconds: env_value("WORK_QUEUE_LEASE_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WORK_QUEUE_LEASE_SECS),
            work_queue_reclaim_interval_seconds: env_value("WORK_QUEUE_RECLAIM_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WORK_QUEUE_RECLAIM_INTERVAL_SECS),
            scheduler_tick_interval_seconds: env_value("SCHEDULER_TICK_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_SCHEDULER_TICK_INTERVAL_SECS),
        }
    }

    #[must_use]
    pub fn should_skip_delivery(&self, address: &str) -> bool {
        self.skip_email_delivery.contains(address)
    }

    #[must_use]
    pub fn kv_url(&self) -> String {
        match &self.kv_password {
            Some(password) => format!("redis://:{password}@{}:{}/{}", self.kv_host, self.kv_port, self.kv_db),
            None => format!("redis://{}:{}/{}", self.kv_host, self.kv_port, self.kv_db),
        }
    }

    #[must_use]
    pub fn database_url(&self) -> String {
        match (&self.db_host, &self.db_name) {
            (Some(host), Some(name)) => {
                let user = self.db_user.as_deref().unwrap_or("handlemail");
                let password = self.db_password.as_deref().unwrap_or("");
                let port = self.db_port.unwrap_or(5432);
                format!("postgres://{user}:{password}@{host}:{port}/{name}")
            }
            _ => format!("sqlite://{}/handlemail.db", self.data_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_limits_match_source_table() {
        assert_eq!(RateLimitPlan::Beta.limits().hour, 10);
        assert_eq!(RateLimitPlan::Beta.limits().day, 30);
        assert_eq!(RateLimitPlan::Beta.limits().month, 200);
        assert_eq!(RateLimitPlan::Pro.limits().hour, 50);
        assert_eq!(RateLimitPlan::Pro.limits().day, 100);
        assert_eq!(RateLimitPlan::Pro.limits().month, 1000);
        // FREE mirrors BETA per the source: there is no distinct FREE row.
        assert_eq!(RateLimitPlan::Free.limits().hour, RateLimitPlan::Beta.limits().hour);
    }

    #[test]
    fn period_expiry_matches_source_table() {
        assert_eq!(RatePeriod::Hour.expiry_seconds(), 7200);
        assert_eq!(RatePeriod::Day.expiry_seconds(), 90_000);
        assert_eq!(RatePeriod::Month.expiry_seconds(), 2_678_400);
    }

    #[test]
    fn attachment_and_task_limits_match_source() {
        assert_eq!(MAX_ATTACHMENT_SIZE_BYTES, 15 * 1024 * 1024);
        assert_eq!(MAX_TOTAL_ATTACHMENTS_SIZE_BYTES, 50 * 1024 * 1024);
        assert_eq!(MAX_ATTACHMENTS_COUNT, 5);
        assert_eq!(SCHEDULED_TASKS_MINIMUM_INTERVAL_HOURS, 1);
        assert_eq!(SCHEDULED_TASKS_MAX_PER_EMAIL, 5);
    }

    #[test]
    fn skip_email_delivery_parses_comma_separated_list() {
        let parsed: BTreeSet<String> = parse_csv("a@example.com, b@example.com").into_iter().collect();
        let cfg = Config {
            skip_email_delivery: parsed,
            ..Config::from_env()
        };
        assert!(cfg.should_skip_delivery("a@example.com"));
        assert!(cfg.should_skip_delivery("b@example.com"));
        assert!(!cfg.should_skip_delivery("c@example.com"));
    }

    #[test]
    fn kv_url_includes_password_only_when_set() {
        let cfg = Config {
            kv_password: None,
            ..Config::from_env()
        };
        assert_eq!(cfg.kv_url(), "redis://127.0.0.1:6379/0");
        let cfg = Config {
            kv_password: Some("hunter2".to_string()),
            ..cfg
        };
        assert_eq!(cfg.kv_url(), "redis://:hunter2@127.0.0.1:6379/0");
    }

    #[test]
    fn database_url_falls_back_to_sqlite_without_db_host() {
        let cfg = Config {
            db_host: None,
            db_name: None,
            ..Config::from_env()
        };
        assert!(cfg.database_url().starts_with("sqlite://"));
    }
}
